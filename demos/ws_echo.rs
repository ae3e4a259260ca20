use harbor_web::{route_fn, MessageKind, Router, Server, WsHandler, WsSession};
use std::sync::Arc;

struct Echo;

impl WsHandler for Echo {
    fn on_connect(&self, session: &mut WsSession) {
        let _ = session.send_text("echo service ready");
    }

    fn on_message(&self, session: &mut WsSession, kind: MessageKind, payload: &[u8]) {
        let result = match kind {
            MessageKind::Text => {
                session.send_text(std::str::from_utf8(payload).unwrap_or_default())
            }
            MessageKind::Binary => session.send_binary(payload),
        };
        if result.is_err() {
            log::warn!("echo send after close");
        }
    }

    fn on_close(&self, code: u16, _reason: &[u8]) {
        println!("client left with code {code}");
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut router = Router::new();
    router.add_route(
        "/",
        route_fn(|_req, resp| {
            resp.set_status(200)
                .set_header("content-type", "text/plain")
                .set_body("WebSocket echo at ws://localhost:8080/ws\n");
            Ok(())
        }),
    );

    let server = Server::builder()
        .router(router)
        .ws_handler("/ws", Arc::new(Echo))
        .build()
        .expect("server configuration");

    let stop = server.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop.stop();
    });

    println!("listening on http://0.0.0.0:8080 (echo at /ws)");
    server.listen("0.0.0.0", 8080).await.expect("listen");
}

use harbor_web::{route_fn, Router, Server};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut router = Router::new();
    router.add_route(
        "/",
        route_fn(|_req, resp| {
            resp.set_status(200)
                .set_header("content-type", "text/plain")
                .set_body("Try GET /hello\n");
            Ok(())
        }),
    );
    router.add_route(
        "/hello",
        route_fn(|req, resp| {
            let who = req
                .query()
                .and_then(|q| q.strip_prefix(b"name="))
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .unwrap_or_else(|| "world".to_string());
            resp.set_status(200)
                .set_header("content-type", "text/plain")
                .set_body(format!("Hello, {who}!\n"));
            Ok(())
        }),
    );

    let server = Server::builder()
        .router(router)
        .build()
        .expect("server configuration");

    let stop = server.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("shutting down");
        stop.stop();
    });

    println!("listening on http://0.0.0.0:8080");
    server.listen("0.0.0.0", 8080).await.expect("listen");
}

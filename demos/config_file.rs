//! Loads `harbor.conf` when present, applies the `HARBOR_*` environment
//! overlay and exposes the effective settings at `/config`.

use harbor_web::{route_fn, Router, Server, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ServerConfig::default();
    if std::path::Path::new("harbor.conf").exists() {
        config.apply_file("harbor.conf").expect("config file");
        println!("applied harbor.conf");
    }
    config.apply_env().expect("environment overlay");

    let snapshot = format!(
        "max_connections = {}\n\
         max_requests_per_connection = {}\n\
         max_body_size = {}\n\
         keepalive_timeout = {:?}\n\
         request_timeout = {:?}\n",
        config.max_connections,
        config.max_requests_per_connection,
        config.max_body_size,
        config.keepalive_timeout,
        config.request_timeout,
    );

    let mut router = Router::new();
    router.add_route(
        "/config",
        route_fn(move |_req, resp| {
            resp.set_status(200)
                .set_header("content-type", "text/plain")
                .set_body(&snapshot);
            Ok(())
        }),
    );

    let server = Server::builder()
        .config(config)
        .router(router)
        .build()
        .expect("server configuration");

    let stop = server.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop.stop();
    });

    println!("listening on http://0.0.0.0:8080 (settings at /config)");
    server.listen("0.0.0.0", 8080).await.expect("listen");
}

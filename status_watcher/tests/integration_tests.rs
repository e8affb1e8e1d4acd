use std::{net::SocketAddr, time::Duration};

use axum::{http::StatusCode, routing::get, Json, Router};
use common::status::DistractionStatus;
use status_watcher::{client::StatusClient, Error};

async fn serve(app: Router) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

#[tokio::test]
async fn test_fetch_status() -> Result<(), Error> {
    let app = Router::new()
        .route("/status", get(|| async { Json(DistractionStatus::new(true)) }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/garbage", get(|| async { "not json" }));
    let addr = serve(app).await;
    let timeout = Duration::from_secs(2);

    let client = StatusClient::new(format!("http://{addr}/status"), timeout)?;
    assert_eq!(client.fetch().await?, DistractionStatus::new(true));

    let client = StatusClient::new(format!("http://{addr}/broken"), timeout)?;
    assert!(client.fetch().await.is_err());

    let client = StatusClient::new(format!("http://{addr}/garbage"), timeout)?;
    assert!(client.fetch().await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    // Nothing listens on the discard port
    let client = StatusClient::new("http://127.0.0.1:9/status", Duration::from_secs(2)).unwrap();
    assert!(client.fetch().await.is_err());
}

#[tokio::test]
async fn test_polling_does_not_block_caller() -> Result<(), Error> {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Json(DistractionStatus::new(true))
        }),
    );
    let addr = serve(app).await;

    let client = StatusClient::new(format!("http://{addr}/slow"), Duration::from_secs(2))?;
    let mut statuses = client.spawn_poller(Duration::from_millis(50));

    let mut ticks = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    let status = loop {
        tokio::select! {
            res = statuses.recv() => break res.expect("polling stopped")?,
            _ = ticker.tick() => ticks += 1,
        }
    };

    assert_eq!(status, DistractionStatus::new(true));
    // The ticker kept going while the request was in flight
    assert!(ticks > 10, "only {ticks} ticks");

    Ok(())
}

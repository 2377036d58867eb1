//! Shared helpers for tests that need a live HTTP peer.

use axum::Router;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub(crate) async fn spawn_server(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

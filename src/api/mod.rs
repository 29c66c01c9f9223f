//! HTTP control API
//!
//! A deliberately small HTTP/1.1 server: one task per connection, one
//! request per connection.

pub mod auth;
pub mod handlers;
pub mod http;

pub use handlers::App;

use http::{read_request, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Time allowed for a client to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn to_response(&self) -> Response {
        match self {
            ApiError::BadRequest(msg) => Response::text(400, format!("{}\n", msg)),
            _ => Response::text(500, format!("{}\n", self)),
        }
    }
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, app: Arc<App>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Accept failed: {}", e);
                return Err(e);
            }
        };
        debug!("Connection from {}", peer);

        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &app).await {
                warn!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, app: &App) -> Result<(), ApiError> {
    let response = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => {
            debug!("{} {}", request.method, request.path);
            app.handle(request).await
        }
        Ok(Err(e)) => e.to_response(),
        Err(_) => return Ok(()),
    };
    response.write_to(&mut stream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::tests::app;
    use crate::vpn::routing::tests::scripted_runner;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_error_status() {
        assert_eq!(ApiError::BadRequest("x".into()).to_response().status, 400);
        let io = ApiError::from(std::io::Error::other("boom"));
        assert_eq!(io.to_response().status, 500);
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let temp_dir = TempDir::new().unwrap();
        let app = Arc::new(app(scripted_runner(), &temp_dir));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, app));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /status HTTP/1.1\r\nHost: router\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert!(text.starts_with("HTTP/1.1 303 See Other\r\n"));
        assert!(text.contains("Location: /login\r\n"));
        server.abort();
    }
}

//! HTTP server
//!
//! Uses tokio directly: one task per connection, one request per connection.

pub mod request;
pub mod response;
pub mod routes;

pub use request::{read_request, HttpRequest, ReadError};
pub use response::{status_for, HttpResponse};
pub use routes::{route, AppState};

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("failed to accept connection: {}", e);
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("error handling connection from {}: {}", addr, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("server shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    let response = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Err(_) => Some(simple(408, "request timeout")),
        Ok(Err(ReadError::Closed)) => None,
        Ok(Err(ReadError::TooLarge)) => Some(simple(413, "request too large")),
        Ok(Err(ReadError::LengthRequired)) => Some(simple(411, "chunked bodies are not supported; send Content-Length")),
        Ok(Err(ReadError::Malformed(message))) => Some(simple(400, &message)),
        Ok(Err(ReadError::Io(e))) => return Err(e),
        Ok(Ok(request)) => {
            let started = std::time::Instant::now();
            let response = route(&state, &request).await;
            debug!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                "handled in {}ms",
                started.elapsed().as_millis()
            );
            Some(response)
        }
    };

    if let Some(response) = response {
        stream.write_all(&response.to_bytes()).await?;
        stream.flush().await?;
    }
    Ok(())
}

fn simple(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({"kind": "BadRequest", "message": message}))
}

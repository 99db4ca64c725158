//! Control server on a Unix socket
//!
//! This module implements the server that listens for incoming control
//! connections and dispatches commands to the handler. A `subscribe`
//! request turns its connection into a one-way stream of change events,
//! one JSON object per line, until the client hangs up or the network is
//! deleted.

use crate::control::api::ControlAction;
use crate::control::{ApiError, ApiRequest, ApiResponse, CommandHandler};
use crate::notify::Subscription;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

/// Control server manages the control API socket
pub struct ControlServer {
    socket_path: PathBuf,
    handler: Arc<CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: PathBuf, handler: Arc<CommandHandler>) -> Self {
        Self {
            socket_path,
            handler,
        }
    }

    /// Bind the socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener, ApiError> {
        if self.socket_path.exists() {
            info!("Removing existing socket at {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ApiError::InternalError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::InternalError(format!("Failed to create socket directory: {}", e))
            })?;
        }

        UnixListener::bind(&self.socket_path)
            .map_err(|e| ApiError::InternalError(format!("Failed to bind Unix socket: {}", e)))
    }

    /// Accept connections until the task is cancelled
    pub async fn serve(&self, listener: UnixListener) -> Result<(), ApiError> {
        info!("Control server listening at {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Bind and serve
    pub async fn start(&self) -> Result<(), ApiError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Shutdown the server and clean up
    pub async fn shutdown(&self) -> Result<(), ApiError> {
        info!("Shutting down control server");

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ApiError::InternalError(format!("Failed to remove socket: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<CommandHandler>,
) -> Result<(), ApiError> {
    debug!("New client connection");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Client disconnected");
                break;
            }
            Ok(_) => {
                let request_str = line.trim();
                if request_str.is_empty() {
                    continue;
                }

                debug!("Received request: {}", request_str);

                let request = match ApiRequest::from_json(request_str) {
                    Ok(request) => request,
                    Err(e) => {
                        error!("Failed to parse request: {}", e);
                        let response = ApiResponse::error("unknown".to_string(), e);
                        write_line(&mut writer, &response.to_json()?).await?;
                        continue;
                    }
                };

                if request.action == ControlAction::Subscribe {
                    match handler.subscribe(&request) {
                        Ok(subscription) => {
                            let ack = ApiResponse::success(
                                request.id,
                                Some(serde_json::json!({ "subscriber": subscription.id() })),
                            );
                            write_line(&mut writer, &ack.to_json()?).await?;
                            return stream_events(subscription, reader, writer).await;
                        }
                        Err(e) => {
                            let response = ApiResponse::error(request.id, e);
                            write_line(&mut writer, &response.to_json()?).await?;
                            continue;
                        }
                    }
                }

                let response = handler.handle_request(request).await;
                write_line(&mut writer, &response.to_json()?).await?;
            }
            Err(e) => {
                error!("Failed to read from socket: {}", e);
                break;
            }
        }
    }

    Ok(())
}

async fn stream_events<R, W>(
    mut subscription: Subscription,
    mut reader: BufReader<R>,
    mut writer: W,
) -> Result<(), ApiError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(
        "Streaming changes of network {} to subscriber {}",
        subscription.network_id(),
        subscription.id()
    );
    let mut discard = String::new();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    debug!("Subscription {} ended", subscription.id());
                    return Ok(());
                };
                let json = serde_json::to_string(&event)
                    .map_err(|e| ApiError::SerializationError(e.to_string()))?;
                write_line(&mut writer, &json).await?;
            }
            read = reader.read_line(&mut discard) => {
                match read {
                    Ok(0) => {
                        debug!("Subscriber {} disconnected", subscription.id());
                        return Ok(());
                    }
                    Ok(_) => {
                        warn!("Ignoring input on subscription connection");
                        discard.clear();
                    }
                    Err(e) => {
                        return Err(ApiError::InternalError(format!("Failed to read from socket: {}", e)));
                    }
                }
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), ApiError> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to write response: {}", e)))?;

    writer
        .write_all(b"\n")
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to write newline: {}", e)))?;

    writer
        .flush()
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to flush response: {}", e)))
}

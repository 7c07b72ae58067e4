//! Network Server
//!
//! TCP server answering block propagation requests from followers.
//! Each connection is handled on its own task.

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use super::{read_message, write_message, ErrorCode, Message};
use crate::error::{Error, Result};
use crate::propagation::BlockPropagationResponder;

/// Network server for block propagation
pub struct NetworkServer {
    /// Bind address
    bind_address: String,
    /// Request handler
    responder: Arc<BlockPropagationResponder>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl NetworkServer {
    /// Create a new network server
    pub fn new(bind_address: String, responder: Arc<BlockPropagationResponder>) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Self {
            bind_address,
            responder,
            shutdown: shutdown_tx,
        }
    }

    /// Bind the configured address and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Block propagation server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let responder = Arc::clone(&self.responder);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), responder).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        }

        tracing::info!("Block propagation server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    responder: Arc<BlockPropagationResponder>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);
                let response = dispatch(&responder, message).await;
                write_message(&mut writer, &response).await?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading message from {}: {}", peer_addr, e);
                break;
            }
        }
    }

    Ok(())
}

/// Answer one request
async fn dispatch(responder: &BlockPropagationResponder, message: Message) -> Message {
    match message {
        Message::HeightRequest => Message::HeightResponse {
            height: responder.get_height().await,
        },
        Message::BlockRequest { index } => match responder.get_block(index).await {
            Ok(block) => Message::BlockResponse { block },
            Err(e @ Error::InvalidIndex { .. }) => Message::Error {
                code: ErrorCode::InvalidIndex,
                message: e.to_string(),
            },
            Err(e) => {
                tracing::error!("Failed to serve block {}: {}", index, e);
                Message::Error {
                    code: ErrorCode::Internal,
                    message: e.to_string(),
                }
            }
        },
        other => Message::Error {
            code: ErrorCode::BadRequest,
            message: format!("{} is not a request", other.type_name()),
        },
    }
}

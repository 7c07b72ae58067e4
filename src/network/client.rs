//! Network Client
//!
//! TCP client a follower uses to talk to the server. Keeps one
//! connection open and reconnects when it breaks.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{read_message, write_message, Message};
use crate::error::{Error, Result};

/// Network client for a single remote node
pub struct NetworkClient {
    /// Remote address
    address: String,
    /// Open connection, if any
    conn: Mutex<Option<TcpStream>>,
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(address: String, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            address,
            conn: Mutex::new(None),
            connect_timeout,
            request_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a request and wait for the response
    pub async fn request(&self, message: Message) -> Result<Message> {
        let result = timeout(self.request_timeout, self.request_inner(message)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => {
                // The stream may hold a half-read frame
                self.conn.lock().await.take();
                Err(Error::ConnectionTimeout(self.address.clone()))
            }
        }
    }

    /// Request without timeout wrapper
    async fn request_inner(&self, message: Message) -> Result<Message> {
        let mut guard = self.conn.lock().await;

        // Try the existing connection first
        if let Some(stream) = guard.as_mut() {
            match exchange(stream, &message).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!("Dropping connection to {}: {}", self.address, e);
                    *guard = None;
                }
            }
        }

        // Create new connection
        let mut stream = self.connect().await?;
        let response = exchange(&mut stream, &message).await?;
        *guard = Some(stream);

        Ok(response)
    }

    /// Connect to the remote address
    async fn connect(&self) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(&self.address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }
    }

    /// Drop the open connection
    pub async fn close(&self) {
        self.conn.lock().await.take();
    }

    /// Check whether a connection is currently open
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

async fn exchange(stream: &mut TcpStream, message: &Message) -> Result<Message> {
    let (mut reader, mut writer) = stream.split();
    write_message(&mut writer, message).await?;
    read_message(&mut reader).await
}

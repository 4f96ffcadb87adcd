// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! TCP transport for reload messages
//!
//! Every accepted connection becomes a preview session. Messages are
//! written as newline-delimited JSON; anything the client sends is read
//! and discarded so a hang-up is noticed promptly.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{Notifier, PreviewSession};
use crate::errors::{FlowError, FlowResult};

/// Accepts preview clients and streams reload messages to them
pub struct ReloadServer {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    accept: Option<JoinHandle<()>>,
}

impl ReloadServer {
    /// Bind `addr` (e.g. `127.0.0.1:9000`) and start accepting clients
    pub async fn bind(addr: &str, notifier: Arc<Notifier>) -> FlowResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| FlowError::Server {
            message: format!("cannot bind {}: {}", addr, e),
        })?;
        let local_addr = listener.local_addr().map_err(|e| FlowError::Server {
            message: e.to_string(),
        })?;

        info!("Reload server listening on {}", local_addr);
        let (stop, stopped) = oneshot::channel();
        let accept = tokio::spawn(accept_loop(listener, notifier, stopped));

        Ok(Self {
            local_addr,
            stop: Some(stop),
            accept: Some(accept),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every client connection and drop their sessions
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(accept) = self.accept.take() {
            let _ = accept.await;
        }
        debug!("Reload server on {} shut down", self.local_addr);
    }
}

impl Drop for ReloadServer {
    fn drop(&mut self) {
        if let Some(accept) = &self.accept {
            accept.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    notifier: Arc<Notifier>,
    mut stopped: oneshot::Receiver<()>,
) {
    // Dropping the set aborts the client tasks with it.
    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stopped => {
                clients.shutdown().await;
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = notifier.connect();
                    debug!(session = session.id(), %peer, "Preview client connected");
                    let registration = Registration {
                        id: session.id(),
                        notifier: Arc::clone(&notifier),
                    };
                    clients.spawn(serve_client(stream, session, registration));
                }
                Err(e) => warn!("Failed to accept preview client: {}", e),
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
}

/// Removes a session from the notifier when its client task ends or is aborted
struct Registration {
    id: u64,
    notifier: Arc<Notifier>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.notifier.disconnect(self.id);
    }
}

async fn serve_client(stream: TcpStream, mut session: PreviewSession, _registration: Registration) {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 512];

    loop {
        tokio::select! {
            message = session.recv() => {
                let Some(message) = message else { break };
                let line = match message.to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Cannot encode reload message: {}", e);
                        continue;
                    }
                };
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }
}

//! Broker feed over TCP, newline-delimited JSON.
//!
//! A broker plugin connects and streams one JSON frame per line:
//! - `{"event":"client_connected","session":"s1"}`
//! - `{"event":"client_disconnected","session":"s1"}`
//! - `{"event":"published","topic":"agent/message","payload":"{..}","publisher":"s1"}`
//! - `{"event":"error","message":"broker backend lost"}`
//!
//! Publishes made by the bridge are written back to every connected plugin
//! as `{"topic":"agent/connected","payload":"{..}"}`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};

use thingsverse_protocol::SessionId;

use super::{Publisher, TransportError, TransportEvent};
use crate::config::FeedSection;

/// One line received from a broker plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundFrame {
    ClientConnected {
        session: SessionId,
    },
    ClientDisconnected {
        session: SessionId,
    },
    Published {
        topic: String,
        #[serde(default)]
        payload: Option<String>,
        publisher: SessionId,
    },
    Error {
        message: String,
    },
}

impl From<InboundFrame> for TransportEvent {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::ClientConnected { session } => Self::ClientConnected(session),
            InboundFrame::ClientDisconnected { session } => Self::ClientDisconnected(session),
            InboundFrame::Published {
                topic,
                payload,
                publisher,
            } => Self::Published {
                topic,
                payload: payload.map(String::into_bytes),
                publisher,
            },
            InboundFrame::Error { message } => Self::Error(message),
        }
    }
}

/// One line sent to broker plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub topic: String,
    pub payload: String,
}

/// Publishes by fanning frames out to every connected plugin.
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    outbound: broadcast::Sender<OutboundFrame>,
}

#[async_trait]
impl Publisher for FeedPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let frame = OutboundFrame {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
        };
        self.outbound
            .send(frame)
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }
}

/// The TCP listener broker plugins connect to.
pub struct FeedServer {
    listener: TcpListener,
    events: mpsc::Sender<TransportEvent>,
    outbound: broadcast::Sender<OutboundFrame>,
    max_connections: usize,
}

impl FeedServer {
    /// Bind the listener. Failing here is a bootstrap error.
    pub async fn bind(
        config: &FeedSection,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(Self, FeedPublisher), TransportError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let (outbound, _) = broadcast::channel(config.event_buffer.max(1));
        let publisher = FeedPublisher {
            outbound: outbound.clone(),
        };
        let server = Self {
            listener,
            events,
            outbound,
            max_connections: config.max_connections.max(1),
        };
        Ok((server, publisher))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept plugin connections until the listener fails, which is
    /// reported as a transport error event.
    pub async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    let _ = self
                        .events
                        .send(TransportEvent::Error(format!("feed listener failed: {e}")))
                        .await;
                    return;
                }
            };
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            tracing::info!(peer = %peer_addr, "Broker feed connected");

            let events = self.events.clone();
            let outbound = self.outbound.subscribe();
            tokio::spawn(async move {
                match handle_connection(stream, events, outbound).await {
                    Ok(()) => tracing::info!(peer = %peer_addr, "Broker feed closed"),
                    Err(e) => tracing::warn!(peer = %peer_addr, error = %e, "Broker feed error"),
                }
                drop(permit);
            });
        }
    }
}

/// Pump frames in both directions for one plugin connection.
async fn handle_connection(
    stream: TcpStream,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: broadcast::Receiver<OutboundFrame>,
) -> Result<(), TransportError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundFrame>(&line) {
                    Ok(frame) => {
                        if events.send(frame.into()).await.is_err() {
                            return Err(TransportError::Closed);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unparsable feed frame");
                    }
                }
            }
            frame = outbound.recv() => match frame {
                Ok(frame) => {
                    let mut json = serde_json::to_vec(&frame)?;
                    json.push(b'\n');
                    writer.write_all(&json).await?;
                    writer.flush().await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Broker feed lagging, dropped outbound frames");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

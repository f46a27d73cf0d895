//! Event loop driving a [`Bridge`] from transport events.
//!
//! Each session seen on the transport gets a worker task fed by its own
//! queue. Connect, publish and disconnect events for a session run in
//! arrival order, one at a time, including the persistence and publish
//! calls they await. Sessions do not wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use thingsverse_protocol::SessionId;

use crate::bridge::Bridge;
use crate::errors::BridgeError;
use crate::store::{AgentStore, MetricStore};
use crate::transport::{Publisher, TransportEvent};

enum SessionJob {
    Open,
    Publish { topic: String, payload: Option<Vec<u8>> },
    Close,
}

struct SessionWorker {
    jobs: mpsc::UnboundedSender<SessionJob>,
    handle: JoinHandle<()>,
}

pub struct BridgeRuntime<S, P> {
    bridge: Arc<Bridge<S, P>>,
    workers: HashMap<SessionId, SessionWorker>,
    /// Workers told to close that may still be draining, by session.
    closing: HashMap<SessionId, JoinHandle<()>>,
}

impl<S, P> BridgeRuntime<S, P>
where
    S: AgentStore + MetricStore + 'static,
    P: Publisher + 'static,
{
    pub fn new(bridge: Arc<Bridge<S, P>>) -> Self {
        Self {
            bridge,
            workers: HashMap::new(),
            closing: HashMap::new(),
        }
    }

    /// Process events until shutdown is signalled (`Ok`) or the transport
    /// fails or goes away (fatal `Err`). Pending session work is drained
    /// before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let mut shutdown_live = true;
        tracing::info!("Bridge runtime started");

        let result = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.dispatch(event) {
                            break Err(e);
                        }
                    }
                    None => break Err(BridgeError::TransportClosed),
                },
                changed = shutdown.changed(), if shutdown_live => match changed {
                    Ok(()) if *shutdown.borrow() => break Ok(()),
                    Ok(()) => {}
                    // Sender gone: no shutdown can be requested any more.
                    Err(_) => shutdown_live = false,
                },
            }
        };

        self.drain().await;
        tracing::info!("Bridge runtime stopped");
        result
    }

    fn dispatch(&mut self, event: TransportEvent) -> Result<(), BridgeError> {
        self.closing.retain(|_, h| !h.is_finished());

        match event {
            TransportEvent::ClientConnected(session) => {
                let worker = self.worker_for(&session);
                enqueue(worker, &session, SessionJob::Open);
            }
            TransportEvent::Published {
                topic,
                payload,
                publisher,
            } => {
                // A publisher may predate this runtime and never send a
                // connect; it still gets a queue so its reports stay ordered.
                let worker = self.worker_for(&publisher);
                enqueue(worker, &publisher, SessionJob::Publish { topic, payload });
            }
            TransportEvent::ClientDisconnected(session) => match self.workers.remove(&session) {
                Some(worker) => {
                    enqueue(&worker, &session, SessionJob::Close);
                    self.closing.insert(session, worker.handle);
                }
                None => {
                    tracing::debug!(session = %session, "Disconnect for untracked session");
                }
            },
            TransportEvent::Error(message) => return Err(BridgeError::Transport(message)),
        }
        Ok(())
    }

    fn worker_for(&mut self, session: &SessionId) -> &SessionWorker {
        let bridge = &self.bridge;
        let closing = &mut self.closing;
        self.workers.entry(session.clone()).or_insert_with(|| {
            // A reconnect must wait for the previous connection's teardown,
            // or its late close would evict the new entry.
            let previous = closing.remove(session);
            let (jobs, rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(session_worker(
                Arc::clone(bridge),
                session.clone(),
                rx,
                previous,
            ));
            SessionWorker { jobs, handle }
        })
    }

    async fn drain(&mut self) {
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .drain()
            .map(|(_, w)| w.handle)
            .chain(self.closing.drain().map(|(_, h)| h))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Session worker panicked");
            }
        }
    }
}

fn enqueue(worker: &SessionWorker, session: &SessionId, job: SessionJob) {
    if worker.jobs.send(job).is_err() {
        tracing::debug!(session = %session, "Session worker already stopped, event dropped");
    }
}

async fn session_worker<S, P>(
    bridge: Arc<Bridge<S, P>>,
    session: SessionId,
    mut jobs: mpsc::UnboundedReceiver<SessionJob>,
    previous: Option<JoinHandle<()>>,
) where
    S: AgentStore + MetricStore + 'static,
    P: Publisher + 'static,
{
    if let Some(prev) = previous {
        let _ = prev.await;
    }
    while let Some(job) = jobs.recv().await {
        match job {
            SessionJob::Open => bridge.on_client_connected(&session).await,
            SessionJob::Publish { topic, payload } => {
                bridge.on_published(&topic, payload.as_deref(), &session).await;
            }
            SessionJob::Close => {
                bridge.on_client_disconnected(&session).await;
                break;
            }
        }
    }
}

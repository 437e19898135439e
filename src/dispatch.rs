//! Per-participant ordering of inbound events.
//!
//! Every participant with traffic gets a queue and a worker task that
//! handles that participant's events one at a time, in arrival order.
//! Different participants are handled in parallel. A worker that sees no
//! traffic for `idle_timeout` drains what it already accepted and exits;
//! its replacement waits for it to finish before handling anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::channels::InboundEvent;
use crate::coordinator::Coordinator;
use crate::error::Error;

/// How long a participant's worker lingers without events.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Something that consumes inbound events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: InboundEvent) -> Result<(), Error>;
}

#[async_trait]
impl EventHandler for Coordinator {
    async fn handle_event(&self, event: InboundEvent) -> Result<(), Error> {
        Coordinator::handle_event(self, event).await
    }
}

struct Queue {
    tx: mpsc::UnboundedSender<InboundEvent>,
    worker: JoinHandle<()>,
}

pub struct EventDispatcher<H: EventHandler> {
    handler: Arc<H>,
    idle_timeout: Duration,
    queues: HashMap<String, Queue>,
}

impl<H: EventHandler> EventDispatcher<H> {
    pub fn new(handler: Arc<H>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            idle_timeout,
            queues: HashMap::new(),
        }
    }

    /// Queue an event behind earlier events of the same participant.
    pub fn dispatch(&mut self, event: InboundEvent) {
        let participant = event.participant_id().to_string();

        let event = match self.queues.get(&participant) {
            Some(queue) => match queue.tx.send(event) {
                Ok(()) => return,
                // The worker went idle and closed its queue.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        self.queues.retain(|_, q| !q.worker.is_finished());
        let previous = self.queues.remove(&participant).map(|q| q.worker);

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            return;
        }
        let worker = tokio::spawn(run_queue(
            Arc::clone(&self.handler),
            participant.clone(),
            rx,
            previous,
            self.idle_timeout,
        ));
        self.queues.insert(participant, Queue { tx, worker });
    }

    /// Participants that currently have a queue.
    pub fn active(&self) -> usize {
        self.queues.values().filter(|q| !q.worker.is_finished()).count()
    }
}

async fn run_queue<H: EventHandler>(
    handler: Arc<H>,
    participant: String,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    previous: Option<JoinHandle<()>>,
    idle_timeout: Duration,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => handle(&*handler, &participant, event).await,
            Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    handle(&*handler, &participant, event).await;
                }
                break;
            }
        }
    }
    debug!(participant = %participant, "Event queue closed");
}

async fn handle<H: EventHandler>(handler: &H, participant: &str, event: InboundEvent) {
    if let Err(e) = handler.handle_event(event).await {
        error!(participant = %participant, error = %e, "Failed to handle event");
    }
}

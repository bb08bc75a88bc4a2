use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use relay_core::{ChatMessage, EndpointId};
use relay_store::MessageStore;

/// How long an endpoint waits to hand a message to the hub before
/// dropping it.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registration event: everything the hub needs to track a live endpoint.
pub struct Registration {
    pub id: EndpointId,
    pub username: String,
    pub outbound: mpsc::Sender<Arc<str>>,
}

/// An inbound message together with the endpoint it arrived on.
pub struct Inbound {
    pub origin: EndpointId,
    pub message: ChatMessage,
}

struct Peer {
    username: String,
    outbound: mpsc::Sender<Arc<str>>,
}

/// Cloneable handle endpoints (and the REST frontend) use to talk to the
/// hub. Each method enqueues an event; the hub task applies it.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<EndpointId>,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl HubHandle {
    /// Returns false if the hub task is gone.
    pub async fn register(&self, registration: Registration) -> bool {
        self.register_tx.send(registration).await.is_ok()
    }

    pub async fn unregister(&self, id: EndpointId) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Bounded-wait submission. Returns false if the hub is saturated or
    /// gone; the caller logs and drops the message.
    pub async fn submit(&self, inbound: Inbound) -> bool {
        self.inbound_tx
            .send_timeout(inbound, SUBMIT_TIMEOUT)
            .await
            .is_ok()
    }
}

/// Owns the live set and serializes every membership change and fan-out.
///
/// The hub task is the only writer of the live set; endpoint read/write
/// loops never touch it directly. They send events through a `HubHandle`
/// and drain their own private outbound queue, so no lock is held across
/// a suspension point anywhere on the broadcast path.
pub struct Hub {
    live: HashMap<EndpointId, Peer>,
    store: Arc<dyn MessageStore>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<EndpointId>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

impl Hub {
    /// Create a hub and its handle. `queue` bounds each event source.
    pub fn new(store: Arc<dyn MessageStore>, queue: usize) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(queue);
        let (unregister_tx, unregister_rx) = mpsc::channel(queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue);

        let hub = Self {
            live: HashMap::new(),
            store,
            register_rx,
            unregister_rx,
            inbound_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            inbound_tx,
        };
        (hub, handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Run the coordination loop until every handle is dropped.
    ///
    /// Each event source is FIFO; each event is applied atomically with
    /// respect to the live set before the next one is taken.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => {
                    self.handle_register(registration);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.handle_unregister(&id);
                }
                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound);
                }
                else => break,
            }
        }
        tracing::info!("hub stopped");
    }

    fn handle_register(&mut self, registration: Registration) {
        let Registration {
            id,
            username,
            outbound,
        } = registration;

        tracing::info!(endpoint_id = %id, username = %username, "endpoint registered");
        let notice = ChatMessage::system(format!("{username} joined"));
        self.live.insert(id.clone(), Peer { username, outbound });
        // Joined notice goes to the others, not the newcomer, and is not
        // persisted.
        self.fan_out(&id, &notice);
    }

    /// Idempotent: the read and write paths can both report the same
    /// disconnect, and eviction may already have removed the peer.
    fn handle_unregister(&mut self, id: &EndpointId) {
        let Some(peer) = self.live.remove(id) else {
            return;
        };
        // Dropping `peer` drops the hub's sender, which closes the
        // endpoint's outbound queue. Nothing else ever closes it.
        tracing::info!(endpoint_id = %id, username = %peer.username, "endpoint unregistered");
        let notice = ChatMessage::system(format!("{} left", peer.username));
        drop(peer);
        self.fan_out(id, &notice);
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        let Inbound { origin, message } = inbound;

        // Delivery to live peers is not held up by the store.
        if let Err(err) = self.store.append(&message) {
            tracing::error!(error = %err, sender = %message.sender, "failed to persist message");
        }

        self.fan_out(&origin, &message);
    }

    /// Serialize once, then try-send the shared representation to every
    /// live endpoint except `origin`. A peer whose queue is full cannot be
    /// allowed to stall the others: it is evicted on the spot, as is one
    /// whose queue already closed.
    fn fan_out(&mut self, origin: &EndpointId, message: &ChatMessage) {
        let wire: Arc<str> = match message.to_wire() {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize message, fan-out skipped");
                return;
            }
        };

        let mut evicted = Vec::new();
        for (id, peer) in &self.live {
            if id == origin {
                continue;
            }
            match peer.outbound.try_send(Arc::clone(&wire)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        endpoint_id = %id,
                        username = %peer.username,
                        "outbound queue full, evicting slow consumer"
                    );
                    evicted.push(id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(id.clone());
                }
            }
        }

        for id in evicted {
            self.live.remove(&id);
        }
    }
}

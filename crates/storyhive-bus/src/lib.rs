use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use storyhive_schema::EngineEvent;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    Refresh,
    Transfer,
    ToolCall,
    SubAgentStream,
    SubAgentEnd,
    Data,
    Response,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Refresh,
        Topic::Transfer,
        Topic::ToolCall,
        Topic::SubAgentStream,
        Topic::SubAgentEnd,
        Topic::Data,
        Topic::Response,
    ];

    pub fn from_event(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::Refresh { .. } => Topic::Refresh,
            EngineEvent::Transfer { .. } => Topic::Transfer,
            EngineEvent::ToolCall { .. } => Topic::ToolCall,
            EngineEvent::SubAgentStream { .. } => Topic::SubAgentStream,
            EngineEvent::SubAgentEnd { .. } => Topic::SubAgentEnd,
            EngineEvent::Data { .. } => Topic::Data,
            EngineEvent::Response { .. } => Topic::Response,
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct SubscriptionId(u64);

type Subscriber = (SubscriptionId, mpsc::Sender<EngineEvent>);
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

/// Receiving end of a subscription. Hand the id back to
/// [`EventBus::unsubscribe`] once the observer is done.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<EngineEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            events.push(ev);
        }
        events
    }
}

pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        for topic in topics {
            subs.entry(*topic).or_default().push((id, tx.clone()));
        }
        Subscription { id, rx }
    }

    pub async fn subscribe_all(&self) -> Subscription {
        self.subscribe(&Topic::ALL).await
    }

    /// Removes the subscription from every topic. Returns false if the id was
    /// not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().await;
        let mut removed = false;
        for list in subs.values_mut() {
            let before = list.len();
            list.retain(|(sub_id, _)| *sub_id != id);
            removed |= list.len() != before;
        }
        subs.retain(|_, list| !list.is_empty());
        removed
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .await
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn publish(&self, event: EngineEvent) -> Result<()> {
        deliver(&self.subscribers, event).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

/// Cheap cloneable handle injected into the engine.
#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, event: EngineEvent) -> Result<()> {
        deliver(&self.subscribers, event).await
    }
}

async fn deliver(subscribers: &SubscriberMap, event: EngineEvent) -> Result<()> {
    let topic = Topic::from_event(&event);
    let subs = subscribers.read().await;
    if let Some(list) = subs.get(&topic) {
        for (id, tx) in list {
            if tx.try_send(event.clone()).is_err() {
                tracing::warn!(?topic, ?id, "dropping engine event, subscriber full or closed");
            }
        }
    }
    Ok(())
}

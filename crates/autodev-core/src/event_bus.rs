use crate::event::Event;
use crate::AutodevResult;
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Trait implemented by event subscribers.
///
/// A handler error or panic is logged by the bus and never reaches the
/// publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one published event.
    async fn handle(&self, event: &Event) -> AutodevResult<()>;

    /// Name used in log records.
    fn name(&self) -> &str {
        "anonymous"
    }
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> AutodevResult<()> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> AutodevResult<()> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// In-process publish/subscribe bus.
///
/// Subscribers are kept per event type in subscription order. [`publish`]
/// delivers immediately; [`enqueue`] buffers events for a later
/// [`process_pending`] call or a background dispatcher.
///
/// [`publish`]: EventBus::publish
/// [`enqueue`]: EventBus::enqueue
/// [`process_pending`]: EventBus::process_pending
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    queue_tx: mpsc::UnboundedSender<Event>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Event>>,
}

impl EventBus {
    /// Create a bus with no subscribers and an empty queue.
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }

    /// Register a handler for `event_type`. Unknown types are valid keys.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let event_type = event_type.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            event_type = %event_type,
            handler = handler.name(),
            subscription = %id,
            "Subscribed handler"
        );
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Register a synchronous closure as a handler.
    pub fn subscribe_fn<F>(
        &self,
        event_type: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) -> AutodevResult<()> + Send + Sync + 'static,
    {
        self.subscribe(
            event_type,
            Arc::new(FnHandler {
                name: name.into(),
                f,
            }),
        )
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for (event_type, list) in subscribers.iter_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                info!(event_type = %event_type, subscription = %id, "Unsubscribed handler");
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler currently subscribed to its type.
    ///
    /// Handlers run one after another in subscription order. The handler list
    /// is snapshotted before delivery, so an unsubscribe during delivery only
    /// affects later events.
    pub async fn publish(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.subscribers.read();
            subscribers
                .get(&event.event_type)
                .map(|list| list.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        debug!(
            event_type = %event.event_type,
            source = %event.source,
            handlers = handlers.len(),
            "Publishing event"
        );

        for handler in handlers {
            match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        event_type = %event.event_type,
                        handler = handler.name(),
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(payload) => {
                    warn!(
                        event_type = %event.event_type,
                        handler = handler.name(),
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
    }

    /// Build an event and publish it.
    pub async fn emit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.publish(Event::new(event_type, source, data)).await;
    }

    /// Buffer an event for asynchronous delivery.
    pub fn enqueue(&self, event: Event) {
        debug!(event_type = %event.event_type, source = %event.source, "Event queued");
        if self.queue_tx.send(event).is_err() {
            warn!("Event queue closed, dropping event");
        }
    }

    /// Deliver every buffered event in FIFO order. Returns how many were delivered.
    pub async fn process_pending(&self) -> usize {
        let mut rx = self.queue_rx.lock().await;
        let mut delivered = 0;
        while let Ok(event) = rx.try_recv() {
            self.publish(event).await;
            delivered += 1;
        }
        delivered
    }

    /// Spawn a background task that drains the queue as events arrive.
    ///
    /// The dispatcher holds the queue while waiting, so [`process_pending`]
    /// blocks until the returned handle is aborted.
    ///
    /// [`process_pending`]: EventBus::process_pending
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = bus.queue_rx.lock().await;
            while let Some(event) = rx.recv().await {
                bus.publish(event).await;
            }
        })
    }

    /// Number of handlers subscribed to `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.subscribers.write().clear();
        info!("EventBus cleared");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AutodevError;

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    fn recorder(bus: &EventBus, event_type: &str, label: &'static str, log: &Log) -> SubscriptionId {
        let log = Arc::clone(log);
        bus.subscribe_fn(event_type, label, move |event| {
            log.lock().push(format!("{label}:{}", event.data_str("n").unwrap_or("")));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        recorder(&bus, "ping", "first", &log);
        recorder(&bus, "ping", "second", &log);

        bus.emit("ping", "test", serde_json::json!({"n": "1"})).await;
        bus.emit("ping", "test", serde_json::json!({"n": "2"})).await;

        assert_eq!(
            *log.lock(),
            vec!["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[tokio::test]
    async fn test_only_matching_type_is_delivered() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        recorder(&bus, "ping", "p", &log);

        bus.emit("pong", "test", serde_json::json!({"n": "1"})).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe_fn("ping", "broken", |_| {
            Err(AutodevError::Validation("boom".to_string()))
        });
        recorder(&bus, "ping", "ok", &log);

        bus.emit("ping", "test", serde_json::json!({"n": "1"})).await;
        assert_eq!(*log.lock(), vec!["ok:1"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe_fn("ping", "crashy", |_| panic!("observer bug"));
        recorder(&bus, "ping", "ok", &log);

        bus.emit("ping", "test", serde_json::json!({"n": "1"})).await;
        bus.emit("ping", "test", serde_json::json!({"n": "2"})).await;
        assert_eq!(*log.lock(), vec!["ok:1", "ok:2"]);
    }

    #[test]
    fn test_panic_message() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let literal: Box<dyn std::any::Any + Send> = Box::new("literal");
        assert_eq!(panic_message(literal.as_ref()), "literal");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let id = recorder(&bus, "ping", "a", &log);
        assert_eq!(bus.subscriber_count("ping"), 1);

        bus.emit("ping", "test", serde_json::json!({"n": "1"})).await;
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit("ping", "test", serde_json::json!({"n": "2"})).await;

        assert_eq!(*log.lock(), vec!["a:1"]);
        assert_eq!(bus.subscriber_count("ping"), 0);
    }

    #[tokio::test]
    async fn test_enqueue_then_process_pending() {
        let bus = EventBus::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        recorder(&bus, "ping", "q", &log);

        bus.enqueue(Event::new("ping", "test", serde_json::json!({"n": "1"})));
        bus.enqueue(Event::new("ping", "test", serde_json::json!({"n": "2"})));
        assert!(log.lock().is_empty());

        assert_eq!(bus.process_pending().await, 2);
        assert_eq!(*log.lock(), vec!["q:1", "q:2"]);
        assert_eq!(bus.process_pending().await, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let bus = EventBus::new();
        bus.subscribe_fn("a", "x", |_| Ok(()));
        bus.subscribe_fn("b", "y", |_| Ok(()));
        bus.clear();
        assert_eq!(bus.subscriber_count("a"), 0);
        assert_eq!(bus.subscriber_count("b"), 0);
    }
}

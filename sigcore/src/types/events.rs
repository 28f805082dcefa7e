use crate::protocol::{InboundFrame, Message, MessageType, UnknownMessage};
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// An inbound event as delivered to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    Message(Arc<Message>),
    Unknown(Arc<UnknownMessage>),
}

impl Event {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Unknown(_) => None,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message().map(Message::message_type)
    }
}

impl From<InboundFrame> for Event {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::Message(m) => Self::Message(Arc::new(m)),
            InboundFrame::Unknown(u) => Self::Unknown(Arc::new(u)),
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Which slice of the inbound feed a subscriber wants.
#[derive(Clone)]
pub enum StreamFilter {
    All,
    /// Every call-lifecycle frame.
    Calls,
    /// `chat_message` frames carrying this `chatId`.
    Chat(String),
    Type(MessageType),
    /// Frames with an unrecognized `type`.
    Unknown,
    Custom(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl StreamFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::All, _) => true,
            (Self::Unknown, Event::Unknown(_)) => true,
            (Self::Calls, Event::Message(m)) => m.message_type().is_call_related(),
            (Self::Chat(chat_id), Event::Message(m)) => {
                m.message_type() == MessageType::ChatMessage
                    && m.payload.chat_id() == Some(chat_id.as_str())
            }
            (Self::Type(t), Event::Message(m)) => m.message_type() == *t,
            (Self::Custom(pred), _) => pred(event),
            _ => false,
        }
    }
}

impl fmt::Debug for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Calls => f.write_str("Calls"),
            Self::Chat(id) => write!(f, "Chat({id})"),
            Self::Type(t) => write!(f, "Type({t})"),
            Self::Unknown => f.write_str("Unknown"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    stream: String,
    filter: StreamFilter,
    handler: Arc<dyn EventHandler>,
}

/// Fans inbound events out to every matching subscriber.
///
/// Delivery is synchronous and in call order. There is no replay: a
/// subscriber only sees events dispatched after it registered. Dispatch works
/// on a snapshot of the registry, so handlers may subscribe or unsubscribe
/// while being called.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
    undelivered: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        stream: impl Into<String>,
        filter: StreamFilter,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stream = stream.into();
        debug!(target: "Signal/Dispatch", "Subscribing {id:?} to stream '{stream}' ({filter:?})");
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Subscription {
                id,
                stream,
                filter,
                handler,
            }));
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Names of the streams currently subscribed, in registration order.
    pub fn streams(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.stream.clone())
            .collect()
    }

    /// Delivers `event` to every matching subscriber. Returns the number of
    /// deliveries.
    pub fn dispatch(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for sub in snapshot.iter().filter(|s| s.filter.matches(event)) {
            sub.handler.handle_event(event);
            delivered += 1;
        }

        if delivered == 0 {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
            debug!(target: "Signal/Dispatch", "No subscriber for {:?}", event.message_type());
        }
        delivered
    }

    /// Events that matched no subscriber at dispatch time.
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("streams", &self.streams())
            .field("undelivered", &self.undelivered())
            .finish()
    }
}

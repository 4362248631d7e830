use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Ordered, lossless fan-out of values to any number of subscribers.
///
/// Every subscriber gets its own unbounded queue, so a slow consumer never
/// causes values to be skipped or merged. A replaying topic remembers the last
/// published value and hands it to new subscribers first.
pub struct Topic<T> {
    inner: Arc<Mutex<TopicInner<T>>>,
}

struct TopicInner<T> {
    latest: Option<T>,
    replay: bool,
    subscribers: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Topic<T> {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    pub fn replaying(initial: T) -> Self {
        Self::build(Some(initial), true)
    }

    fn build(latest: Option<T>, replay: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TopicInner {
                latest,
                replay,
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock();
        if let Some(latest) = inner.latest.as_ref() {
            tx.send(latest.clone()).ok();
        }
        inner.subscribers.push(tx);
        rx
    }

    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(value.clone()).is_ok());
        if inner.replay {
            inner.latest = Some(value);
        }
    }

    /// Last published value; always `None` for non-replaying topics.
    pub fn latest(&self) -> Option<T> {
        self.inner.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

//! Explicit publish/subscribe primitives
//!
//! Components expose `subscribe(callback)` and hand back a [`Subscription`]
//! that detaches the callback when dropped. Notifications run synchronously
//! on the caller's task, in publish order.

use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Fan-out list of event callbacks
pub struct Subscribers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribers<T> {
    /// Create an empty subscriber list
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Register a callback
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let Ok(mut registry) = self.inner.lock() else {
                return Subscription::detached();
            };
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut registry) = inner.lock() {
                        registry.callbacks.retain(|(cb_id, _)| *cb_id != id);
                    }
                }
            })),
        }
    }

    /// Deliver a value to every current subscriber
    ///
    /// The registry lock is released before callbacks run, so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = match self.inner.lock() {
            Ok(registry) => registry
                .callbacks
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect(),
            Err(_) => return,
        };

        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of attached callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|r| r.callbacks.len()).unwrap_or(0)
    }

    /// Whether no callbacks are attached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`; detaches the callback when dropped
#[must_use = "dropping a subscription immediately unsubscribes"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    const fn detached() -> Self {
        Self { detach: None }
    }

    /// Detach the callback now
    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// A current value plus change notifications
///
/// New subscribers receive the current value immediately.
pub struct Observable<T> {
    value: Arc<Mutex<T>>,
    subscribers: Subscribers<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    /// Create an observable holding `initial`
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            subscribers: Subscribers::new(),
        }
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> T {
        match self.value.lock() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the value, notifying subscribers when it changed
    ///
    /// Returns `true` if the value changed.
    pub fn set(&self, next: T) -> bool {
        {
            let Ok(mut current) = self.value.lock() else {
                return false;
            };
            if *current == next {
                return false;
            }
            current.clone_from(&next);
        }

        self.subscribers.publish(&next);
        true
    }

    /// Subscribe and receive the current value right away
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        callback(&self.get());
        self.subscribers.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn publish_reaches_all_subscribers_in_order() {
        let subs: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = Arc::clone(&seen);
            subs.subscribe(move |v| seen.lock().unwrap().push(("a", *v)))
        };
        let b = {
            let seen = Arc::clone(&seen);
            subs.subscribe(move |v| seen.lock().unwrap().push(("b", *v)))
        };

        subs.publish(&1);
        subs.publish(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
        drop((a, b));
    }

    #[test]
    fn dropping_subscription_detaches() {
        let subs: Subscribers<u32> = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let sub = {
            let count = Arc::clone(&count);
            subs.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        subs.publish(&1);
        assert_eq!(subs.len(), 1);

        drop(sub);
        subs.publish(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn explicit_unsubscribe() {
        let subs: Subscribers<u32> = Subscribers::new();
        let sub = subs.subscribe(|_| {});
        sub.unsubscribe();
        assert!(subs.is_empty());
    }

    #[test]
    fn callback_may_subscribe_during_publish() {
        let subs: Subscribers<u32> = Subscribers::new();
        let inner_subs = subs.clone();
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);

        let _outer = subs.subscribe(move |_| {
            let sub = inner_subs.subscribe(|_| {});
            held_clone.lock().unwrap().push(sub);
        });

        subs.publish(&7);
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn observable_emits_initial_value_and_changes_only() {
        let obs = Observable::new(0_u32);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let seen = Arc::clone(&seen);
            obs.subscribe(move |v| seen.lock().unwrap().push(*v))
        };

        assert!(obs.set(1));
        assert!(!obs.set(1));
        assert!(obs.set(2));

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(obs.get(), 2);
    }
}

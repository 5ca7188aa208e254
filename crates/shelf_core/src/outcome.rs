//! One-shot outcome notification.
//!
//! An [`OutcomeNotifier`] carries the terminal result of an asynchronous
//! attempt - success with a value or failure with an error - to any number
//! of subscribers. The first terminal transition wins and is cached;
//! subscribers registered after resolution are invoked immediately with
//! the stored outcome. Every subscriber fires exactly once.

use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

type SuccessFn<T> = Box<dyn FnOnce(T) + Send>;
type FailureFn<E> = Box<dyn FnOnce(E) + Send>;

enum State<T, E> {
    Pending {
        on_success: Vec<SuccessFn<T>>,
        on_failure: Vec<FailureFn<E>>,
    },
    Resolved(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn pending() -> Self {
        State::Pending {
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }
}

/// The stored terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The attempt succeeded.
    Success(T),
    /// The attempt failed.
    Failure(E),
}

/// A one-shot, multi-subscriber, replay-capable success/failure signal.
///
/// Cloning is cheap; all clones observe the same outcome.
///
/// # Example
///
/// ```rust
/// use shelf_core::OutcomeNotifier;
///
/// let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
/// notifier.resolve(7);
/// // Late subscribers replay the stored outcome.
/// notifier.on_success(|v| assert_eq!(v, 7));
/// ```
pub struct OutcomeNotifier<T, E> {
    inner: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for OutcomeNotifier<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for OutcomeNotifier<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> OutcomeNotifier<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a pending notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::pending())),
        }
    }

    /// Registers a success subscriber.
    ///
    /// If the notifier is already resolved, the subscriber is invoked
    /// immediately with the stored value. Subscribers registered on a
    /// rejected notifier are dropped.
    pub fn on_success(&self, f: impl FnOnce(T) + Send + 'static) -> &Self {
        let replay = {
            let mut state = self.inner.lock();
            match &mut *state {
                State::Pending { on_success, .. } => {
                    on_success.push(Box::new(f));
                    return self;
                }
                State::Resolved(value) => Some(value.clone()),
                State::Rejected(_) => None,
            }
        };
        if let Some(value) = replay {
            f(value);
        }
        self
    }

    /// Registers a failure subscriber, with the same replay guarantee as
    /// [`OutcomeNotifier::on_success`].
    pub fn on_failure(&self, f: impl FnOnce(E) + Send + 'static) -> &Self {
        let replay = {
            let mut state = self.inner.lock();
            match &mut *state {
                State::Pending { on_failure, .. } => {
                    on_failure.push(Box::new(f));
                    return self;
                }
                State::Rejected(error) => Some(error.clone()),
                State::Resolved(_) => None,
            }
        };
        if let Some(error) = replay {
            f(error);
        }
        self
    }

    /// Resolves the notifier, invoking pending success subscribers in
    /// registration order. A second terminal transition is ignored.
    pub fn resolve(&self, value: T) {
        let subscribers = {
            let mut state = self.inner.lock();
            match mem::replace(&mut *state, State::pending()) {
                State::Pending { on_success, .. } => {
                    *state = State::Resolved(value.clone());
                    on_success
                }
                terminal => {
                    *state = terminal;
                    return;
                }
            }
        };
        // Invoked outside the lock so a subscriber may re-subscribe.
        for subscriber in subscribers {
            subscriber(value.clone());
        }
    }

    /// Rejects the notifier, invoking pending failure subscribers in
    /// registration order. A second terminal transition is ignored.
    pub fn reject(&self, error: E) {
        let subscribers = {
            let mut state = self.inner.lock();
            match mem::replace(&mut *state, State::pending()) {
                State::Pending { on_failure, .. } => {
                    *state = State::Rejected(error.clone());
                    on_failure
                }
                terminal => {
                    *state = terminal;
                    return;
                }
            }
        };
        for subscriber in subscribers {
            subscriber(error.clone());
        }
    }

    /// Returns the stored terminal outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T, E>> {
        match &*self.inner.lock() {
            State::Pending { .. } => None,
            State::Resolved(value) => Some(Outcome::Success(value.clone())),
            State::Rejected(error) => Some(Outcome::Failure(error.clone())),
        }
    }

    /// True while no terminal outcome has been stored.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.inner.lock(), State::Pending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn resolve_fires_pending_subscribers_once() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        let calls = counter();

        let c = Arc::clone(&calls);
        notifier.on_success(move |v| {
            assert_eq!(v, 42);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(notifier.is_pending());

        notifier.resolve(42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_subscriber_replays_stored_outcome() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        notifier.resolve(7);

        let calls = counter();
        let c = Arc::clone(&calls);
        notifier.on_success(move |v| {
            assert_eq!(v, 7);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_failure_subscriber_replays_error() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        notifier.reject("boom".to_string());

        let calls = counter();
        let c = Arc::clone(&calls);
        notifier.on_failure(move |e| {
            assert_eq!(e, "boom");
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_terminal_transition_wins() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        notifier.resolve(1);
        notifier.resolve(2);
        notifier.reject("late".to_string());

        assert_eq!(notifier.outcome(), Some(Outcome::Success(1)));
    }

    #[test]
    fn multiple_subscribers_each_fire_once() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        let calls = counter();

        for _ in 0..3 {
            let c = Arc::clone(&calls);
            notifier.on_success(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        notifier.resolve(0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Resolving again must not re-fire anyone.
        notifier.resolve(0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failure_subscribers_silent_on_success() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        let calls = counter();

        let c = Arc::clone(&calls);
        notifier.on_failure(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        notifier.resolve(5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // A late failure subscriber also stays silent.
        let c = Arc::clone(&calls);
        notifier.on_failure(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_share_the_outcome() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        let other = notifier.clone();
        notifier.resolve(9);
        assert_eq!(other.outcome(), Some(Outcome::Success(9)));
    }

    #[test]
    fn subscriber_may_resubscribe_during_delivery() {
        let notifier: OutcomeNotifier<u32, String> = OutcomeNotifier::new();
        let calls = counter();

        let n = notifier.clone();
        let c = Arc::clone(&calls);
        notifier.on_success(move |_| {
            let c2 = Arc::clone(&c);
            n.on_success(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            });
        });
        notifier.resolve(1);
        // The nested subscription replayed immediately.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

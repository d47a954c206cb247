//! Latest-value subject with replay to late subscribers.
//!
//! A [`BehaviorSubject`] always holds a current value. Each new
//! [`Subscription`] receives that value first, then every later value exactly
//! once, in publication order. Publication happens under the subject's lock,
//! so no subscriber can observe values out of order or miss one between
//! subscribing and the next publication.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

// ---------------------------------------------------------------------------
// BehaviorSubject
// ---------------------------------------------------------------------------

struct SubjectState<T> {
    current: T,
    subscribers: Vec<UnboundedSender<T>>,
    completed: bool,
}

/// Single-slot cache plus subscriber list.
pub struct BehaviorSubject<T> {
    state: Mutex<SubjectState<T>>,
}

impl<T: Clone + Send + 'static> BehaviorSubject<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(SubjectState {
                current: initial,
                subscribers: Vec::new(),
                completed: false,
            }),
        }
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> T {
        self.state.lock().current.clone()
    }

    /// Subscribe. The current value is already queued when this returns, so
    /// [`Subscription::try_next`] yields it without awaiting.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(state.current.clone());
        if !state.completed {
            state.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Replace the current value and deliver it to every live subscriber.
    ///
    /// Returns `false` (and changes nothing) once the subject is completed.
    pub fn next(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.completed {
            return false;
        }
        state.current = value.clone();
        state.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        true
    }

    /// Publish a final value and end every subscription after it.
    ///
    /// Later subscribers still receive the final value, then end.
    pub fn complete(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.completed {
            return false;
        }
        state.current = value.clone();
        state.completed = true;
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(value.clone());
        }
        true
    }

    /// Apply `f` to the current value while holding the lock and publish the
    /// result, if any. Lets callers make read-then-publish atomic.
    pub fn update<R>(&self, f: impl FnOnce(&T) -> (Option<T>, R)) -> R {
        let mut state = self.state.lock();
        let (replacement, result) = f(&state.current);
        if let Some(value) = replacement {
            if !state.completed {
                state.current = value.clone();
                state.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
            }
        }
        result
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Number of subscriptions that have not been dropped.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for BehaviorSubject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BehaviorSubject")
            .field("current", &state.current)
            .field("subscribers", &state.subscribers.len())
            .field("completed", &state.completed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of a [`BehaviorSubject`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Next value if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next value. `None` once the subject completed and every
    /// queued value was taken.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

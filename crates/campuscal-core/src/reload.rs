use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

type Listener = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct ReloadState {
    next_id: u64,
    generation: u64,
    last_refreshed: Option<DateTime<Utc>>,
    listeners: Vec<(SubscriptionId, Listener)>,
}

/// Tells views that the user document changed and must be fetched
/// again. Handed explicitly to whatever mutates data.
#[derive(Default)]
pub struct ReloadSignal {
    state: Mutex<ReloadState>,
}

impl std::fmt::Debug for ReloadSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReloadSignal")
            .field("generation", &state.generation)
            .field("last_refreshed", &state.last_refreshed)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl ReloadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        debug!(id = id.0, listeners = state.listeners.len(), "reload listener added");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(candidate, _)| *candidate != id);
        before != state.listeners.len()
    }

    /// Records a refresh at `at` and calls every listener. Listeners run
    /// outside the lock so they may subscribe or notify again.
    pub fn notify(&self, at: DateTime<Utc>) -> u64 {
        let (generation, listeners) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.last_refreshed = Some(at);
            let listeners = state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>();
            (state.generation, listeners)
        };

        trace!(generation, listeners = listeners.len(), "reload notified");
        for listener in listeners {
            listener(at);
        }
        generation
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_refreshed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};

    use super::ReloadSignal;

    #[test]
    fn listeners_run_until_unsubscribed() {
        let signal = ReloadSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let at = Utc
            .with_ymd_and_hms(2025, 11, 12, 8, 0, 0)
            .single()
            .expect("valid instant");
        assert_eq!(signal.notify(at), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.last_refreshed(), Some(at));

        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.notify(at);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.generation(), 2);
    }

    #[test]
    fn listener_may_reenter_signal() {
        let signal = Arc::new(ReloadSignal::new());
        let inner = Arc::clone(&signal);
        signal.subscribe(move |_| {
            let _ = inner.generation();
        });
        signal.notify(Utc::now());
        assert_eq!(signal.generation(), 1);
    }
}

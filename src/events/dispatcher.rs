use crate::{
    events::canonical::{CanonicalEvent, CanonicalEventKind, MapEvent},
    lock, MapError,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use fxhash::FxHashMap;
use std::{collections::VecDeque, sync::Arc, sync::Mutex};

/// Event listener callback type
pub type Listener = Arc<dyn Fn(&MapEvent) + Send + Sync>;

/// Identifies a registered listener for removal with [`EventDispatcher::off`]
pub type ListenerId = u64;

#[derive(Default)]
struct DispatcherState {
    /// Listeners by event key (`"click"`, ..., `"error"`)
    listeners: FxHashMap<&'static str, Vec<(ListenerId, Listener)>>,
    /// Events waiting for `process_events`
    queue: VecDeque<MapEvent>,
    /// Pull-style subscribers
    senders: Vec<Sender<MapEvent>>,
    next_id: ListenerId,
    closed: bool,
}

/// Fan-out point between the normalizer and the consumer.
///
/// Emitting only queues (and forwards to channel subscribers). Callbacks run
/// in [`EventDispatcher::process_events`], never inside a vendor callback, so
/// a listener may freely call back into the facade.
#[derive(Default)]
pub struct EventDispatcher {
    inner: Mutex<DispatcherState>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one canonical kind
    pub fn on<F>(&self, kind: CanonicalEventKind, callback: F) -> ListenerId
    where
        F: Fn(&CanonicalEvent) + Send + Sync + 'static,
    {
        self.register(
            kind.as_str(),
            Arc::new(move |event: &MapEvent| {
                if let MapEvent::Canonical(event) = event {
                    callback(event);
                }
            }),
        )
    }

    /// Register a listener for surfaced errors
    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&MapError) + Send + Sync + 'static,
    {
        self.register(
            "error",
            Arc::new(move |event: &MapEvent| {
                if let MapEvent::Error(error) = event {
                    callback(error);
                }
            }),
        )
    }

    fn register(&self, key: &'static str, listener: Listener) -> ListenerId {
        let mut state = lock(&self.inner);
        state.next_id += 1;
        let id = state.next_id;
        state.listeners.entry(key).or_default().push((id, listener));
        id
    }

    /// Remove a listener, returning whether it existed
    pub fn off(&self, id: ListenerId) -> bool {
        let mut state = lock(&self.inner);
        let mut found = false;
        for listeners in state.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            found |= listeners.len() != before;
        }
        found
    }

    /// Channel receiving every event as it is emitted. The channel
    /// disconnects when the dispatcher closes.
    pub fn subscribe(&self) -> Receiver<MapEvent> {
        let (sender, receiver) = unbounded();
        let mut state = lock(&self.inner);
        if !state.closed {
            state.senders.push(sender);
        }
        receiver
    }

    /// Emit an event to the queue
    pub fn emit(&self, event: MapEvent) {
        let mut state = lock(&self.inner);
        if state.closed {
            return;
        }
        state
            .senders
            .retain(|sender| sender.send(event.clone()).is_ok());
        state.queue.push_back(event);
    }

    /// Process all queued events
    pub fn process_events(&self) -> Vec<MapEvent> {
        let (events, listeners) = {
            let mut state = lock(&self.inner);
            let events: Vec<_> = state.queue.drain(..).collect();
            let listeners = state.listeners.clone();
            (events, listeners)
        };

        for event in &events {
            if let Some(callbacks) = listeners.get(event.key()) {
                for (_, callback) in callbacks {
                    callback(event);
                }
            }
        }

        events
    }

    /// Get number of pending events
    pub fn pending_events(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Drops pending events, listeners and channels. Nothing is delivered
    /// after this returns.
    pub fn close(&self) {
        let mut state = lock(&self.inner);
        state.closed = true;
        state.queue.clear();
        state.listeners.clear();
        state.senders.clear();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn click() -> MapEvent {
        MapEvent::Canonical(CanonicalEvent::new(CanonicalEventKind::Click))
    }

    #[test]
    fn test_listeners_run_on_process() {
        let dispatcher = EventDispatcher::new();
        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = clicks.clone();
        dispatcher.on(CanonicalEventKind::Click, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(click());
        assert_eq!(clicks.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_events(), 1);

        let processed = dispatcher.process_events();
        assert_eq!(processed.len(), 1);
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_errors_route_to_error_listeners() {
        let dispatcher = EventDispatcher::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        dispatcher.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.on(CanonicalEventKind::Click, |_| panic!("wrong listener"));

        dispatcher.emit(MapEvent::Error(MapError::InvalidState("x".into())));
        dispatcher.process_events();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_and_close() {
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.on(CanonicalEventKind::Click, |_| panic!("removed"));
        assert!(dispatcher.off(id));
        assert!(!dispatcher.off(id));

        let receiver = dispatcher.subscribe();
        dispatcher.emit(click());
        assert_eq!(receiver.try_recv().unwrap(), click());

        dispatcher.close();
        dispatcher.emit(click());
        assert!(dispatcher.process_events().is_empty());
        assert!(receiver.recv().is_err());
    }
}

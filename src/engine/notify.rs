//! engine::notify
//!
//! Asynchronous delivery of committed deltas to listeners.
//!
//! # Architecture
//!
//! The outermost `end` of an operation enqueues one [`ResourceChangeEvent`]
//! and returns. A worker thread pops events and delivers them while holding
//! the notify rule, which conflicts with every other rule: delivery waits
//! for in-flight operations to end and no operation starts while listeners
//! run. The worker shares only the lock manager and the queue with the
//! workspace, never the workspace itself.
//!
//! The queue is bounded. When full, the new delta is folded into the last
//! queued one instead of blocking the committing thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use super::delta::ResourceDelta;
use crate::core::ops::{LockManager, OpId};
use crate::core::progress::Progress;
use crate::core::rule::SchedulingRule;

/// What listeners receive after a commit.
#[derive(Debug, Clone)]
pub struct ResourceChangeEvent {
    /// The committing operation; for merged events, the latest one.
    pub op_id: Option<OpId>,
    /// Committed tree generation after the change.
    pub generation: u64,
    pub delta: ResourceDelta,
}

/// Receives committed deltas on the notification worker.
///
/// Listeners run under the notify rule and must not start operations.
pub trait ResourceChangeListener: Send + Sync {
    fn resource_changed(&self, event: &ResourceChangeEvent);
}

/// Handle returned by `add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct Queue {
    events: VecDeque<ResourceChangeEvent>,
    delivering: bool,
    shutdown: bool,
}

type Listeners = Vec<(ListenerId, Arc<dyn ResourceChangeListener>)>;

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
    idle: Condvar,
    listeners: RwLock<Listeners>,
    locks: Arc<LockManager>,
    capacity: usize,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn ResourceChangeListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

pub(crate) struct Notifier {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub(crate) fn new(locks: Arc<LockManager>, enabled: bool, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            idle: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            locks,
            capacity: capacity.max(1),
        });
        let worker = if enabled {
            let worker_shared = Arc::clone(&shared);
            match thread::Builder::new()
                .name("canopy-notify".into())
                .spawn(move || deliver_loop(&worker_shared))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("notification worker failed to start: {e}");
                    None
                }
            }
        } else {
            None
        };
        Self {
            shared,
            worker,
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn ResourceChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queue an event. Never blocks on delivery.
    pub(crate) fn enqueue(&self, event: ResourceChangeEvent) {
        if self.worker.is_none() {
            return;
        }
        if self
            .shared
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
        {
            return;
        }
        let mut queue = self.shared.queue();
        if queue.events.len() >= self.shared.capacity {
            if let Some(last) = queue.events.back_mut() {
                trace!("notification queue full; merging generation {}", event.generation);
                last.delta.absorb(event.delta);
                last.generation = event.generation;
                last.op_id = event.op_id;
                return;
            }
        }
        queue.events.push_back(event);
        drop(queue);
        self.shared.ready.notify_one();
    }

    /// Block until the queue is empty and nothing is being delivered.
    pub(crate) fn wait_idle(&self) {
        if self.worker.is_none() {
            return;
        }
        let mut queue = self.shared.queue();
        while !queue.events.is_empty() || queue.delivering {
            queue = self
                .shared
                .idle
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shared.queue().shutdown = true;
        self.shared.ready.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("notification worker panicked");
            }
        }
    }
}

fn deliver_loop(shared: &Shared) {
    let notify_rule = SchedulingRule::Notify;
    let progress = Progress::new();
    loop {
        let event = {
            let mut queue = shared.queue();
            loop {
                if let Some(event) = queue.events.pop_front() {
                    queue.delivering = true;
                    break event;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared
                    .ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match shared.locks.begin_rule(&notify_rule, &progress) {
            Ok(()) => {
                let listeners = shared.snapshot_listeners();
                debug!(
                    "delivering generation {} ({} change(s)) to {} listener(s)",
                    event.generation,
                    event.delta.len(),
                    listeners.len()
                );
                for listener in listeners {
                    listener.resource_changed(&event);
                }
                if let Err(e) = shared.locks.end_rule(&notify_rule) {
                    warn!("releasing the notify rule failed: {e}");
                }
            }
            Err(e) => warn!("notification dropped: {e}"),
        }

        let mut queue = shared.queue();
        queue.delivering = false;
        if queue.events.is_empty() {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        generations: Mutex<Vec<u64>>,
    }

    impl ResourceChangeListener for Recorder {
        fn resource_changed(&self, event: &ResourceChangeEvent) {
            self.generations.lock().unwrap().push(event.generation);
        }
    }

    fn event(generation: u64) -> ResourceChangeEvent {
        ResourceChangeEvent {
            op_id: None,
            generation,
            delta: ResourceDelta::default(),
        }
    }

    #[test]
    fn delivers_in_order() {
        let notifier = Notifier::new(Arc::new(LockManager::default()), true, 16);
        let recorder = Arc::new(Recorder::default());
        notifier.add_listener(recorder.clone());
        for g in 1..=3 {
            notifier.enqueue(event(g));
        }
        notifier.wait_idle();
        assert_eq!(*recorder.generations.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn removed_listener_gets_nothing() {
        let notifier = Notifier::new(Arc::new(LockManager::default()), true, 16);
        let recorder = Arc::new(Recorder::default());
        let id = notifier.add_listener(recorder.clone());
        assert!(notifier.remove_listener(id));
        notifier.enqueue(event(1));
        notifier.wait_idle();
        assert!(recorder.generations.lock().unwrap().is_empty());
    }

    #[test]
    fn delivery_waits_for_held_rules() {
        let locks = Arc::new(LockManager::new(Duration::from_millis(5)));
        let notifier = Notifier::new(Arc::clone(&locks), true, 16);
        let recorder = Arc::new(Recorder::default());
        notifier.add_listener(recorder.clone());

        let rule = SchedulingRule::root();
        locks.begin_rule(&rule, &Progress::new()).unwrap();
        notifier.enqueue(event(7));
        thread::sleep(Duration::from_millis(30));
        assert!(recorder.generations.lock().unwrap().is_empty());
        locks.end_rule(&rule).unwrap();

        notifier.wait_idle();
        assert_eq!(*recorder.generations.lock().unwrap(), vec![7]);
    }

    #[test]
    fn disabled_notifier_is_inert() {
        let notifier = Notifier::new(Arc::new(LockManager::default()), false, 16);
        let recorder = Arc::new(Recorder::default());
        notifier.add_listener(recorder.clone());
        notifier.enqueue(event(1));
        notifier.wait_idle();
        assert!(recorder.generations.lock().unwrap().is_empty());
    }
}

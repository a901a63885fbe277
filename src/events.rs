use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

/// Names of the lifecycle events emitted by the core. Listeners are
/// fire-and-forget; the core never depends on any listener being present.
pub mod names {
    pub const GENERATION_STARTED: &str = "generation-started";
    pub const GENERATION_COMPLETED: &str = "generation-completed";
    pub const SELECTION_STARTED: &str = "selection-started";
    pub const SELECTION_COMPLETED: &str = "selection-completed";
    pub const GENERATE_INDIVIDUAL_STARTED: &str = "generate-individual-started";
    pub const GENERATE_INDIVIDUAL_COMPLETED: &str = "generate-individual-completed";
    pub const INDIVIDUAL_COMPLETED: &str = "individual-completed";
    pub const EVALUATION_STARTED: &str = "evaluation-started";
    pub const EVALUATION_COMPLETED: &str = "evaluation-completed";
    pub const EVOLUTION_RESTARTED: &str = "evolution-restarted";
    pub const CLUSTER_JOB_SUBMITTED: &str = "cluster-job-submitted";
}

type Listener = Box<dyn FnMut(&str)>;

/// Named event bus with subscribe/trigger semantics. Single-threaded by
/// design (the core runs on one logical thread of control), so interior
/// mutability via `RefCell` is sufficient.
///
/// A listener may itself trigger events or subscribe new listeners: the
/// listener list is detached from the map while it runs.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<HashMap<String, Vec<Listener>>>,
    trigger_counts: RefCell<HashMap<String, u64>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: RefCell::new(HashMap::new()),
            trigger_counts: RefCell::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, event: &str, listener: impl FnMut(&str) + 'static) {
        self.listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(Box::new(listener));
    }

    pub fn trigger(&self, event: &str) {
        *self
            .trigger_counts
            .borrow_mut()
            .entry(event.to_string())
            .or_insert(0) += 1;

        // Detach listeners while they run so that reentrant subscribe or
        // trigger calls do not hit an active borrow.
        let mut detached = match self.listeners.borrow_mut().remove(event) {
            Some(list) => list,
            None => return,
        };
        for listener in detached.iter_mut() {
            listener(event);
        }
        let mut map = self.listeners.borrow_mut();
        match map.remove(event) {
            Some(added_during_dispatch) => {
                detached.extend(added_during_dispatch);
                map.insert(event.to_string(), detached);
            }
            None => {
                map.insert(event.to_string(), detached);
            }
        }
    }

    /// How often the named event was triggered so far. Mainly used by tests
    /// and progress displays.
    pub fn trigger_count(&self, event: &str) -> u64 {
        self.trigger_counts
            .borrow()
            .get(event)
            .copied()
            .unwrap_or(0)
    }
}

/// Queue of pending host tasks, drained by the generation driver at the
/// defined checkpoints (between individuals, between operator passes,
/// between evaluation groups). Replaces in-algorithm event-loop yielding:
/// the algorithm only ever calls `drain()` at safe points where its own
/// state is consistent.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            tasks: RefCell::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Runs all pending tasks, including tasks enqueued by a running task.
    pub fn drain(&self) {
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_trigger_without_listeners_is_harmless() {
        let bus = EventBus::new();
        bus.trigger(names::GENERATION_STARTED);
        assert_eq!(bus.trigger_count(names::GENERATION_STARTED), 1);
    }

    #[test]
    fn test_listeners_receive_events() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let hits_clone = hits.clone();
        bus.subscribe(names::GENERATION_STARTED, move |_| {
            hits_clone.set(hits_clone.get() + 1);
        });
        bus.trigger(names::GENERATION_STARTED);
        bus.trigger(names::GENERATION_STARTED);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_reentrant_subscribe_during_dispatch() {
        let bus = Rc::new(EventBus::new());
        let inner_hits = Rc::new(Cell::new(0));
        {
            let bus2 = bus.clone();
            let inner = inner_hits.clone();
            bus.subscribe("outer", move |_| {
                let inner = inner.clone();
                bus2.subscribe("outer", move |_| {
                    inner.set(inner.get() + 1);
                });
            });
        }
        bus.trigger("outer");
        assert_eq!(inner_hits.get(), 0);
        bus.trigger("outer");
        assert_eq!(inner_hits.get(), 1);
    }

    #[test]
    fn test_task_queue_drains_nested_tasks() {
        let queue = Rc::new(TaskQueue::new());
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order1 = order.clone();
            let order2 = order.clone();
            let queue2 = queue.clone();
            queue.push(move || {
                order1.borrow_mut().push(1);
                queue2.push(move || order2.borrow_mut().push(2));
            });
        }
        queue.drain();
        assert_eq!(*order.borrow(), vec![1, 2]);
        assert!(queue.is_empty());
    }
}

//! Cancellable delayed-task scheduling behind an explicit seam so tests can
//! advance virtual time deterministically.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::time::ManualClock;

/// Handle to a scheduled task; dropping the handle does not cancel it.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Rc<Cell<bool>>,
}

impl ScheduledTask {
    fn new() -> Self {
        Self {
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    /// Cancels the task if it has not yet run.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Returns whether the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Delayed-task scheduler seam.
pub trait Scheduler {
    /// Schedules `task` to run after `delay_ms`.
    fn schedule(&self, delay_ms: u64, task: Box<dyn FnOnce()>) -> ScheduledTask;
}

/// Scheduler that silently drops every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn schedule(&self, _delay_ms: u64, _task: Box<dyn FnOnce()>) -> ScheduledTask {
        ScheduledTask::new()
    }
}

struct QueuedTask {
    id: u64,
    due_ms: u64,
    handle: ScheduledTask,
    task: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct ManualSchedulerState {
    next_id: u64,
    queue: Vec<QueuedTask>,
}

/// Deterministic virtual-time scheduler for tests.
///
/// Tasks run when [`ManualScheduler::advance`] crosses their due time, in
/// due-time order with ties broken by scheduling order. The bundled
/// [`ManualClock`] advances in lockstep so time predicates observe the same
/// timeline as the task queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    clock: ManualClock,
    inner: Rc<RefCell<ManualSchedulerState>>,
}

impl ManualScheduler {
    /// Creates a scheduler sharing the provided clock.
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock,
            inner: Rc::default(),
        }
    }

    /// Returns the clock driven by this scheduler.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        use crate::time::Clock;
        self.clock.now_ms()
    }

    /// Number of queued, not-yet-cancelled tasks.
    pub fn pending(&self) -> usize {
        self.inner
            .borrow()
            .queue
            .iter()
            .filter(|queued| !queued.handle.is_cancelled())
            .count()
    }

    /// Advances virtual time by `delta_ms`, running every task that comes
    /// due along the way.
    ///
    /// Tasks scheduled by a running task participate in the same advance
    /// when they fall inside the window.
    pub fn advance(&self, delta_ms: u64) {
        let target_ms = self.now_ms().saturating_add(delta_ms);

        loop {
            let next = {
                let mut state = self.inner.borrow_mut();
                let due_index = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, queued)| queued.due_ms <= target_ms)
                    .min_by_key(|(_, queued)| (queued.due_ms, queued.id))
                    .map(|(index, _)| index);
                due_index.map(|index| state.queue.remove(index))
            };

            let Some(queued) = next else {
                break;
            };

            self.clock.set(queued.due_ms.max(self.now_ms()));
            if !queued.handle.is_cancelled() {
                (queued.task)();
            }
        }

        self.clock.set(target_ms);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay_ms: u64, task: Box<dyn FnOnce()>) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let mut state = self.inner.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push(QueuedTask {
            id,
            due_ms: self.now_ms().saturating_add(delay_ms),
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, entry: &'static str) -> Box<dyn FnOnce()> {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(entry))
    }

    #[test]
    fn advance_runs_due_tasks_in_due_order() {
        let scheduler = ManualScheduler::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.schedule(50, record(&log, "late"));
        scheduler.schedule(10, record(&log, "early"));
        scheduler.schedule(10, record(&log, "early-second"));

        scheduler.advance(49);
        assert_eq!(*log.borrow(), vec!["early", "early-second"]);
        assert_eq!(scheduler.pending(), 1);

        scheduler.advance(1);
        assert_eq!(*log.borrow(), vec!["early", "early-second", "late"]);
        assert_eq!(scheduler.now_ms(), 50);
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let scheduler = ManualScheduler::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        let handle = scheduler.schedule(10, record(&log, "cancelled"));
        scheduler.schedule(10, record(&log, "kept"));
        handle.cancel();

        scheduler.advance(20);
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn tasks_scheduled_during_advance_run_when_inside_the_window() {
        let scheduler = ManualScheduler::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        let rearm = {
            let scheduler = scheduler.clone();
            let log = log.clone();
            Box::new(move || {
                log.borrow_mut().push("first");
                scheduler.schedule(5, record(&log, "chained"));
            })
        };
        scheduler.schedule(10, rearm);

        scheduler.advance(20);
        assert_eq!(*log.borrow(), vec!["first", "chained"]);
        assert_eq!(scheduler.now_ms(), 20);
    }
}

//! Per-session double queue bridging the I/O threads and the tick thread.
//!
//! The network side appends decoded tasks; the tick side drains them through
//! the dispatcher and stages the results; the network side then takes the
//! staged results for its next flush. Both queues live behind one mutex.

use crate::messaging::{dispatch, CommandDispatcher, Task, TaskResult};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Queues {
    incoming: Vec<Task>,
    outgoing: Vec<TaskResult>,
}

/// Inbound tasks and outbound results for one WebSocket session.
#[derive(Debug, Default)]
pub struct TaskQueue {
    queues: Mutex<Queues>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends decoded tasks in arrival order.
    pub fn push_tasks(&self, tasks: impl IntoIterator<Item = Task>) {
        self.lock().incoming.extend(tasks);
    }

    /// Dispatches every queued task and stages its result.
    ///
    /// Runs entirely under the queue mutex. Returns the number of tasks
    /// dispatched, so the caller knows whether a flush is due.
    pub fn drain(&self, dispatcher: &dyn CommandDispatcher) -> usize {
        let mut queues = self.lock();
        if queues.incoming.is_empty() {
            return 0;
        }

        let Queues { incoming, outgoing } = &mut *queues;
        let count = incoming.len();
        outgoing.extend(incoming.drain(..).map(|task| dispatch(dispatcher, &task)));
        count
    }

    /// Takes every staged result, leaving the outbound queue empty.
    pub fn take_results(&self) -> Vec<TaskResult> {
        std::mem::take(&mut self.lock().outgoing)
    }

    pub fn pending_tasks(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn pending_results(&self) -> usize {
        self.lock().outgoing.len()
    }

    // A panic while the lock was held cannot leave the vectors half-updated
    // in a way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::task::{Task, TaskId, WeakTask};

/// Tasks created by a session, by identifier. Does not keep tasks alive.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    tasks: Mutex<HashMap<TaskId, WeakTask>>,
}

impl Registry {
    pub(crate) fn insert(&self, task: &Task) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, weak| !weak.is_dropped());
        tasks.insert(task.id(), WeakTask::downgrade(task));
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().get(&id).and_then(WeakTask::upgrade)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

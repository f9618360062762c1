use std::fmt;
use std::sync::{Arc, Weak};

use super::{Task, TaskRef};
use crate::DebugLiteral;

/// A reference to a task which does not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakTask(Weak<TaskRef>);

impl WeakTask {
    pub(crate) fn downgrade(task: &Task) -> Self {
        Self(Arc::downgrade(&task.inner))
    }

    pub(crate) fn upgrade(&self) -> Option<Task> {
        self.0.upgrade().map(|inner| Task { inner })
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.upgrade() {
            Some(task) => DebugLiteral(format!("Task({})", task.id())),
            None => DebugLiteral("dropped".to_owned()),
        };
        f.debug_tuple("WeakTask").field(&state).finish()
    }
}

//! An in-memory [`TaskStore`] tracking each task's visibility deadline.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dwn_node::provider::{ResumableTask, TaskStore};
use dwn_node::Result;

struct Entry {
    task: ResumableTask,
    timeout_secs: u64,
    visible_at: Instant,
}

/// Registered resumable tasks, grouped by tenant.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, HashMap<String, Entry>>>,
}

impl TaskStore for MemoryTaskStore {
    async fn register(&self, owner: &str, task: &ResumableTask, timeout_secs: u64) -> Result<()> {
        let entry = Entry {
            task: task.clone(),
            timeout_secs,
            visible_at: Instant::now() + Duration::from_secs(timeout_secs),
        };
        self.tasks.lock().unwrap().entry(owner.to_string()).or_default().insert(task.task_id.clone(), entry);
        Ok(())
    }

    async fn grab(&self, owner: &str, count: u64) -> Result<Vec<ResumableTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(owner_tasks) = tasks.get_mut(owner) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut grabbed = Vec::new();
        for entry in owner_tasks.values_mut() {
            if grabbed.len() as u64 >= count {
                break;
            }
            if entry.visible_at <= now {
                entry.visible_at = now + Duration::from_secs(entry.timeout_secs);
                grabbed.push(entry.task.clone());
            }
        }
        Ok(grabbed)
    }

    async fn read(&self, owner: &str, task_id: &str) -> Result<Option<ResumableTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(owner)
            .and_then(|tasks| tasks.get(task_id))
            .map(|entry| entry.task.clone()))
    }

    async fn extend(&self, owner: &str, task_id: &str, timeout_secs: u64) -> Result<()> {
        if let Some(entry) = self.tasks.lock().unwrap().get_mut(owner).and_then(|t| t.get_mut(task_id)) {
            entry.timeout_secs = timeout_secs;
            entry.visible_at = Instant::now() + Duration::from_secs(timeout_secs);
        }
        Ok(())
    }

    async fn delete(&self, owner: &str, task_id: &str) -> Result<()> {
        if let Some(tasks) = self.tasks.lock().unwrap().get_mut(owner) {
            tasks.remove(task_id);
        }
        Ok(())
    }

    async fn purge(&self, owner: &str) -> Result<()> {
        self.tasks.lock().unwrap().remove(owner);
        Ok(())
    }
}

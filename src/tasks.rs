//! # Resumable Tasks
//!
//! Some work triggered by a handled message — currently, cascading record
//! deletes — must finish even if the process crashes partway through.
//! [`run`] registers a [`ResumableTask`] with the [`TaskStore`] before
//! executing it and removes it again on completion; [`resume`] lets a
//! recovery worker grab and re-run whatever is left over from a crash.

use serde::{Deserialize, Serialize};

use crate::provider::{Provider, TaskStore};
use crate::records::Delete;
use crate::utils::cid;
use crate::Result;

/// Visibility timeout, in seconds, given to a task before a recovering
/// worker is allowed to grab it again.
const VISIBILITY_TIMEOUT_SECS: u64 = 60;

/// The work a [`ResumableTask`] carries out when run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum TaskType {
    /// Finish tombstoning (and, when pruning, purging the descendants of)
    /// a record.
    RecordsDelete(Delete),
}

/// A unit of durable work registered with the [`TaskStore`] before being
/// run, so another worker can pick it back up if the one that started it
/// never marks it complete.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResumableTask {
    /// Identifies this task to `TaskStore::read`/`extend`/`delete`.
    pub task_id: String,
    /// The work to perform.
    pub task: TaskType,
}

/// A message-handling step that can be carried out as a [`ResumableTask`].
pub trait Task {
    /// Executes the task's work against `owner`'s state.
    async fn run(&self, owner: &str, provider: &impl Provider) -> Result<()>;
}

/// Registers `task_type` with the [`TaskStore`], runs it, then marks it
/// complete.
///
/// # Errors
/// Returns an error if registration, the task itself, or the completion
/// delete fails.
pub async fn run(owner: &str, task_type: TaskType, provider: &impl Provider) -> Result<()> {
    let task_id = cid::from_value(&task_type)?;
    let resumable = ResumableTask { task_id: task_id.clone(), task: task_type };

    TaskStore::register(provider, owner, &resumable, VISIBILITY_TIMEOUT_SECS).await?;
    run_task(owner, &resumable, provider).await?;
    TaskStore::delete(provider, owner, &task_id).await?;

    Ok(())
}

/// Claims up to `count` overdue tasks for `owner` and re-runs each to
/// completion. Intended to be called periodically by a recovery worker.
///
/// # Errors
/// Returns an error if claiming tasks fails, or if a claimed task fails to
/// run (in which case tasks claimed before it are left completed and the
/// rest remain registered for a later attempt).
pub async fn resume(owner: &str, count: u64, provider: &impl Provider) -> Result<()> {
    let overdue = TaskStore::grab(provider, owner, count).await?;
    for resumable in overdue {
        run_task(owner, &resumable, provider).await?;
        TaskStore::delete(provider, owner, &resumable.task_id).await?;
    }
    Ok(())
}

async fn run_task(owner: &str, resumable: &ResumableTask, provider: &impl Provider) -> Result<()> {
    match &resumable.task {
        TaskType::RecordsDelete(delete) => delete.run(owner, provider).await,
    }
}

//! Verification email for newly created users.
//!
//! The handler only confirms the user still exists and logs the send; mail
//! delivery sits behind it.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::db::{Outbox, Store, StoreError};
use crate::queue::{Distributor, EnqueueError, Task, TaskError, TaskHandler, TaskId, TaskInfo, TaskOptions};

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub username: String,
}

/// Enqueue a send-verify-email task directly.
pub fn distribute_send_verify_email(
    distributor: &Distributor,
    payload: &PayloadSendVerifyEmail,
    options: TaskOptions,
) -> Result<TaskInfo, EnqueueError> {
    distributor.enqueue(TASK_SEND_VERIFY_EMAIL, payload, options)
}

/// Stage a send-verify-email task in a unit of work's outbox.
pub fn stage_send_verify_email(
    outbox: &mut Outbox,
    payload: &PayloadSendVerifyEmail,
    options: TaskOptions,
) -> Result<TaskId, EnqueueError> {
    outbox.stage(TASK_SEND_VERIFY_EMAIL, payload, options)
}

/// Handler for [`TASK_SEND_VERIFY_EMAIL`].
pub struct SendVerifyEmail {
    store: Arc<Store>,
}

impl SendVerifyEmail {
    #[must_use]
    pub const fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        let payload: PayloadSendVerifyEmail = serde_json::from_slice(&task.payload)
            .map_err(|e| TaskError::skip(format!("failed to unmarshal payload: {e}")))?;

        let user = match self.store.get_user(&payload.username).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(TaskError::skip("user not found")),
            Err(e) => return Err(TaskError::retry(format!("failed to get user: {e}"))),
        };

        tracing::info!(
            task_type = %task.task_type,
            task_id = %task.id,
            email = %user.email,
            "sending verify email"
        );
        Ok(())
    }
}

impl TaskHandler for SendVerifyEmail {
    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<(), TaskError>> {
        self.run(task).boxed()
    }
}

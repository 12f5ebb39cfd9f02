//! User registration.

use chrono::TimeDelta;

use crate::db::{CreateUserParams, Store, StoreError, User};
use crate::queue::{QUEUE_CRITICAL, TaskOptions};
use crate::worker::{PayloadSendVerifyEmail, stage_send_verify_email};

/// Retries allowed for the verification email.
pub const VERIFY_EMAIL_MAX_RETRY: u32 = 10;

/// Options for the verification email task: critical queue, ten retries,
/// and a ten second delay so the handler reads a settled user row.
#[must_use]
pub fn verify_email_options() -> TaskOptions {
    TaskOptions::default()
        .max_retry(VERIFY_EMAIL_MAX_RETRY)
        .process_in(TimeDelta::seconds(10))
        .queue(QUEUE_CRITICAL)
}

/// Create a user and schedule their verification email.
///
/// The email task is staged in the same unit of work as the user row, so it
/// is dispatched only if the user commits, and the user is rolled back if
/// the task cannot be staged.
pub async fn register_user(store: &Store, params: &CreateUserParams) -> Result<User, StoreError> {
    store
        .create_user_tx(params, |user, outbox| {
            let payload = PayloadSendVerifyEmail {
                username: user.username.clone(),
            };
            stage_send_verify_email(outbox, &payload, verify_email_options())?;
            Ok(())
        })
        .await
}

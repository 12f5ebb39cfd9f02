use crate::db::{CreateUserParams, Outbox, Store, StoreError, User};

impl Store {
    /// Create a user and run `after_create` in the same unit of work.
    ///
    /// `after_create` sees the new row and may stage tasks in the outbox.
    /// If it fails, the insert is rolled back and nothing is enqueued: an
    /// `EnqueueError` surfaces as [`StoreError::Enqueue`], anything else as
    /// [`StoreError::Aborted`]. Staged tasks reach the broker only after the
    /// user row commits.
    pub async fn create_user_tx<F>(
        &self,
        params: &CreateUserParams,
        mut after_create: F,
    ) -> Result<User, StoreError>
    where
        F: FnMut(&User, &mut Outbox) -> Result<(), StoreError>,
    {
        self.exec_tx(|q| {
            let user = q.create_user(params)?;

            let mut outbox = Outbox::new();
            after_create(&user, &mut outbox).map_err(|e| match e {
                StoreError::Enqueue(_) | StoreError::Aborted(_) => e,
                other => StoreError::Aborted(other.to_string()),
            })?;
            for task in outbox.into_tasks() {
                q.insert_outbox(task)?;
            }
            Ok(user)
        })
        .await
    }
}

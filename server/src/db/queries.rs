//! Row-level queries run inside a unit of work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::{CreateSessionParams, CreateUserParams, OutboxEntry, Session, User};
use crate::queue::{NewTask, TaskId};
use crate::storage::Transaction;

const USERS: &str = "users";
const SESSIONS: &str = "sessions";
const OUTBOX: &str = "outbox";

/// Queries bound to one open transaction.
///
/// Nothing written here is visible outside the transaction until the unit of
/// work commits.
pub struct Queries<'t> {
    txn: &'t mut Transaction,
    now: DateTime<Utc>,
    staged: Vec<OutboxEntry>,
}

impl<'t> Queries<'t> {
    pub(crate) const fn new(txn: &'t mut Transaction, now: DateTime<Utc>) -> Self {
        Self {
            txn,
            now,
            staged: Vec::new(),
        }
    }

    /// Outbox entries written by this unit of work.
    pub(crate) fn into_staged(self) -> Vec<OutboxEntry> {
        self.staged
    }

    fn load<T: DeserializeOwned>(&mut self, table: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        self.txn
            .get(table, key)?
            .map(|value| serde_json::from_slice(&value).map_err(StoreError::from))
            .transpose()
    }

    fn store<T: Serialize>(&mut self, table: &str, key: &[u8], row: &T) -> Result<(), StoreError> {
        self.txn.put(table, key, serde_json::to_vec(row)?);
        Ok(())
    }

    /// Insert a user.
    ///
    /// # Errors
    /// `UniqueViolation` if the username is taken.
    pub fn create_user(&mut self, params: &CreateUserParams) -> Result<User, StoreError> {
        let key = params.username.as_bytes();
        if self.txn.get(USERS, key)?.is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "username '{}' already exists",
                params.username
            )));
        }
        let user = User {
            username: params.username.clone(),
            role: params.role,
            hashed_password: params.hashed_password.clone(),
            full_name: params.full_name.clone(),
            email: params.email.clone(),
            is_email_verified: false,
            password_changed_at: DateTime::UNIX_EPOCH,
            created_at: self.now,
        };
        self.store(USERS, key, &user)?;
        Ok(user)
    }

    pub fn get_user(&mut self, username: &str) -> Result<User, StoreError> {
        self.load(USERS, username.as_bytes())?
            .ok_or(StoreError::NotFound)
    }

    /// Insert a session. The id must be the refresh token's payload id.
    pub fn create_session(&mut self, params: &CreateSessionParams) -> Result<Session, StoreError> {
        let key = params.id.as_bytes();
        if self.txn.get(SESSIONS, key)?.is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "session '{}' already exists",
                params.id
            )));
        }
        let session = Session {
            id: params.id,
            username: params.username.clone(),
            refresh_token: params.refresh_token.clone(),
            user_agent: params.user_agent.clone(),
            client_ip: params.client_ip.clone(),
            is_blocked: params.is_blocked,
            expires_at: params.expires_at,
            created_at: self.now,
        };
        self.store(SESSIONS, key, &session)?;
        Ok(session)
    }

    pub fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError> {
        self.load(SESSIONS, id.as_bytes())?
            .ok_or(StoreError::NotFound)
    }

    /// Flip a session's blocked flag. This is the only mutation sessions see.
    pub fn set_session_blocked(&mut self, id: Uuid, blocked: bool) -> Result<Session, StoreError> {
        let mut session = self.get_session(id)?;
        session.is_blocked = blocked;
        self.store(SESSIONS, id.as_bytes(), &session)?;
        Ok(session)
    }

    /// Stage a task in the outbox.
    pub fn insert_outbox(&mut self, task: NewTask) -> Result<OutboxEntry, StoreError> {
        let entry = OutboxEntry {
            id: task.id,
            task,
            created_at: self.now,
        };
        self.store(OUTBOX, entry.id.as_bytes(), &entry)?;
        self.staged.push(entry.clone());
        Ok(entry)
    }

    /// Every staged entry, oldest first.
    pub fn list_outbox(&mut self) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut entries = self
            .txn
            .scan(OUTBOX)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(StoreError::from))
            .collect::<Result<Vec<OutboxEntry>, _>>()?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    pub fn delete_outbox(&mut self, id: TaskId) {
        self.txn.delete(OUTBOX, id.as_bytes());
    }
}

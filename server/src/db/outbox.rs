//! Transactional outbox.
//!
//! A unit of work stages task intents instead of enqueueing them. The
//! intents are written to the `outbox` table in the same transaction as the
//! rows they refer to, so they commit or roll back together. Only after the
//! commit are they handed to the [`Distributor`]; an entry is deleted once
//! the broker has it. Entries whose dispatch failed stay behind for the
//! relay, which retries them until the broker accepts.

use chrono::TimeDelta;
use serde::Serialize;

use crate::db::{OutboxEntry, Store, StoreError};
use crate::queue::{Distributor, EnqueueError, NewTask, TaskId, TaskOptions};

/// Task intents collected by a post-write callback.
#[derive(Debug, Default)]
pub struct Outbox {
    staged: Vec<NewTask>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a `task_type` task with a JSON `payload`.
    ///
    /// # Errors
    /// `EnqueueError::Serialization` if the payload cannot be encoded.
    pub fn stage<P: Serialize>(
        &mut self,
        task_type: &str,
        payload: &P,
        options: TaskOptions,
    ) -> Result<TaskId, EnqueueError> {
        let task = NewTask::json(task_type, payload, options)?;
        let id = task.id;
        self.staged.push(task);
        Ok(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub(crate) fn into_tasks(self) -> Vec<NewTask> {
        self.staged
    }
}

impl Store {
    /// Hand committed outbox entries to the broker, deleting each one the
    /// broker accepted. Returns how many were delivered.
    pub(crate) async fn dispatch(&self, distributor: &Distributor, entries: Vec<OutboxEntry>) -> usize {
        let mut delivered = 0;
        for entry in entries {
            if let Err(e) = distributor.enqueue_task(entry.task) {
                tracing::warn!(
                    outbox_id = %entry.id,
                    "failed to dispatch staged task, leaving it for the relay: {e}"
                );
                continue;
            }
            // A failed delete leaves the entry for the relay. The broker drops
            // the repeat while the task is still queued; once it was acked the
            // repeat is a second delivery.
            match self
                .exec_tx_staged(|q| {
                    q.delete_outbox(entry.id);
                    Ok(())
                })
                .await
            {
                Ok(_) => delivered += 1,
                Err(e) => tracing::warn!(
                    outbox_id = %entry.id,
                    "dispatched staged task but failed to clear it: {e}"
                ),
            }
        }
        delivered
    }

    /// Dispatch outbox entries older than `grace`.
    ///
    /// Younger entries are most likely still being dispatched by the unit of
    /// work that staged them.
    pub async fn relay_outbox(
        &self,
        distributor: &Distributor,
        grace: TimeDelta,
    ) -> Result<usize, StoreError> {
        let cutoff = self.time.now() - grace;
        let (entries, _) = self.exec_tx_staged(|q| q.list_outbox()).await?;
        let due: Vec<OutboxEntry> = entries
            .into_iter()
            .filter(|e| e.created_at <= cutoff)
            .collect();
        if due.is_empty() {
            return Ok(0);
        }
        Ok(self.dispatch(distributor, due).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::StoreConfig;
    use crate::queue::{Broker, StoreBroker};
    use crate::storage::{Database, SimulatedTimeSource, TimeSource};

    #[test]
    fn test_stage_collects_tasks() {
        let mut outbox = Outbox::new();
        assert!(outbox.is_empty());
        let id = outbox
            .stage("task:test", &"x", TaskOptions::default())
            .expect("stage");
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.into_tasks()[0].id, id);
    }

    #[tokio::test]
    async fn test_relay_respects_grace() {
        let time = Arc::new(SimulatedTimeSource::default());
        let broker = Arc::new(StoreBroker::new(Database::in_memory()));
        let distributor = Distributor::new(broker.clone(), time.clone());
        // No distributor on the store: staged tasks wait for the relay
        let store = Store::new(Database::in_memory(), StoreConfig::default(), time.clone());

        let task = NewTask::json("task:test", &"x", TaskOptions::default()).expect("encode");
        let id = task.id;
        store
            .exec_tx(|q| q.insert_outbox(task.clone()))
            .await
            .expect("stage");

        let relayed = store
            .relay_outbox(&distributor, TimeDelta::seconds(5))
            .await
            .expect("relay");
        assert_eq!(relayed, 0);

        time.advance(TimeDelta::seconds(6));
        let relayed = store
            .relay_outbox(&distributor, TimeDelta::seconds(5))
            .await
            .expect("relay");
        assert_eq!(relayed, 1);
        assert!(store.pending_outbox().await.expect("list").is_empty());
        assert!(broker.get("default", id).expect("get").is_some());
    }

    #[tokio::test]
    async fn test_entry_left_after_ack_is_delivered_again() {
        let time = Arc::new(SimulatedTimeSource::default());
        let broker = Arc::new(StoreBroker::new(Database::in_memory()));
        let distributor = Distributor::new(broker.clone(), time.clone());
        let store = Store::new(Database::in_memory(), StoreConfig::default(), time.clone());

        let task = NewTask::json("task:test", &"x", TaskOptions::default()).expect("encode");
        let id = task.id;
        store
            .exec_tx(|q| q.insert_outbox(task.clone()))
            .await
            .expect("stage");
        time.advance(TimeDelta::seconds(6));
        assert_eq!(
            store
                .relay_outbox(&distributor, TimeDelta::seconds(5))
                .await
                .expect("relay"),
            1
        );

        // Repeat enqueue while queued is dropped
        distributor.enqueue_task(task.clone()).expect("enqueue again");
        let leased = broker
            .lease("default", time.now(), TimeDelta::seconds(30))
            .expect("lease")
            .expect("queued once");
        assert!(
            broker
                .lease("default", time.now(), TimeDelta::seconds(30))
                .expect("lease")
                .is_none()
        );
        broker.ack(&leased.lease).expect("ack");

        // An entry whose delete was lost comes back after the ack
        store
            .exec_tx(|q| q.insert_outbox(task.clone()))
            .await
            .expect("stage again");
        time.advance(TimeDelta::seconds(6));
        assert_eq!(
            store
                .relay_outbox(&distributor, TimeDelta::seconds(5))
                .await
                .expect("relay"),
            1
        );
        assert!(broker.get("default", id).expect("get").is_some());
    }
}

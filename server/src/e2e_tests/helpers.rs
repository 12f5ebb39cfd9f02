//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tempfile::TempDir;

use crate::config::ServerConfig;
use crate::db::{CreateUserParams, Store, StoreConfig};
use crate::queue::{
    Broker, BrokerError, Distributor, Lease, LeasedTask, Processor, ProcessorConfig, ServeMux,
    StoreBroker, Task, TaskId, TaskRecord,
};
use crate::session::{SessionConfig, SessionRegistry};
use crate::storage::{Database, SimulatedTimeSource, TimeSource};
use crate::token::{Maker, Role, TokenScheme, new_maker};
use crate::worker;

pub const TOKEN_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

/// A broker whose connection can be cut.
pub struct FlakyBroker {
    inner: StoreBroker,
    down: AtomicBool,
}

impl FlakyBroker {
    pub fn new(database: Database) -> Self {
        Self {
            inner: StoreBroker::new(database),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn archived(&self, queue: &str) -> Vec<TaskRecord> {
        self.inner.archived(queue).expect("list archived")
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Broker for FlakyBroker {
    fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.enqueue(record)
    }

    fn lease(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_for: TimeDelta,
    ) -> Result<Option<LeasedTask>, BrokerError> {
        self.check()?;
        self.inner.lease(queue, now, lease_for)
    }

    fn extend_lease(&self, lease: &Lease, until: DateTime<Utc>) -> Result<Lease, BrokerError> {
        self.check()?;
        self.inner.extend_lease(lease, until)
    }

    fn ack(&self, lease: &Lease) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.ack(lease)
    }

    fn retry(&self, lease: &Lease, run_at: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.retry(lease, run_at, error)
    }

    fn archive(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.archive(lease, now, error)
    }

    fn get(&self, queue: &str, id: TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        self.check()?;
        self.inner.get(queue, id)
    }
}

/// A full bank wired like `main`, on simulated time and temporary logs.
pub struct TestBank {
    pub dir: TempDir,
    pub time: Arc<SimulatedTimeSource>,
    pub broker: Arc<FlakyBroker>,
    pub distributor: Arc<Distributor>,
    pub store: Arc<Store>,
    pub maker: Arc<dyn Maker>,
    pub sessions: SessionRegistry,
}

impl TestBank {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        Self::open(dir, SimulatedTimeSource::default_start().now_ms())
    }

    /// Open the bank whose logs live in `dir`, with the clock at `now_ms`.
    pub fn open(dir: TempDir, now_ms: i64) -> Self {
        let time = Arc::new(SimulatedTimeSource::new(now_ms));
        let bank_db =
            Database::open(&dir.path().join(ServerConfig::BANK_WAL)).expect("open bank log");
        let queue_db =
            Database::open(&dir.path().join(ServerConfig::QUEUE_WAL)).expect("open queue log");

        let broker = Arc::new(FlakyBroker::new(queue_db));
        let distributor = Arc::new(Distributor::new(broker.clone(), time.clone()));
        let store = Arc::new(
            Store::new(bank_db, StoreConfig::default(), time.clone())
                .with_distributor(distributor.clone()),
        );
        let maker = new_maker(TokenScheme::Sealed, TOKEN_KEY, time.clone()).expect("maker");
        let sessions = SessionRegistry::new(
            store.clone(),
            maker.clone(),
            time.clone(),
            SessionConfig::default(),
        );

        Self {
            dir,
            time,
            broker,
            distributor,
            store,
            maker,
            sessions,
        }
    }

    /// Close everything and open it again from the logs.
    pub fn reopen(self) -> Self {
        let now_ms = self.time.now_ms();
        let dir = self.dir;
        drop(self.sessions);
        drop(self.store);
        drop(self.distributor);
        drop(self.broker);
        Self::open(dir, now_ms)
    }

    /// A processor running the real task handlers.
    pub fn processor(&self) -> Processor {
        self.processor_with(worker::new_serve_mux(self.store.clone()))
    }

    pub fn processor_with(&self, mux: ServeMux) -> Processor {
        Processor::new(
            self.broker.clone(),
            mux,
            processor_config(),
            self.time.clone(),
        )
    }
}

/// Processor settings with a fixed one second backoff.
pub fn processor_config() -> ProcessorConfig {
    ProcessorConfig {
        retry_delay: Arc::new(|_: u32, _: &Task| TimeDelta::seconds(1)),
        poll_interval: Duration::from_millis(10),
        ..ProcessorConfig::default()
    }
}

pub fn user_params(username: &str) -> CreateUserParams {
    CreateUserParams {
        username: username.to_string(),
        role: Role::Depositor,
        hashed_password: "$2a$10$hash".to_string(),
        full_name: "Test User".to_string(),
        email: format!("{username}@example.com"),
    }
}

#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

// Life of a request:
// 1. The protocol layer authorizes the bearer header (auth, token)
// 2. Handlers run units of work against the store (db)
//     - Writes that need follow-up work stage tasks in the outbox
//     - After commit the store hands staged tasks to the queue
// 3. Workers lease tasks from the queue and run their handlers (queue, worker)
//
// System components:
//  - Transactional key/value store with a write-ahead log
//  - Token authority and session registry
//  - Durable task queue with weighted scheduling

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod queue;
pub mod session;
pub mod storage;
pub mod token;
pub mod worker;

#[cfg(test)]
mod e2e_tests;

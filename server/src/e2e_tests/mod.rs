//! End-to-end tests at the service level.
//!
//! Each test file covers a specific scenario against a fully wired bank on
//! simulated time, so delays, expiries and retries are checked without
//! sleeping.

#![cfg(test)]

mod helpers;

mod test_authorize_request;
mod test_concurrent_registration;
mod test_create_user_rollback;
mod test_delayed_delivery;
mod test_outbox_relay;
mod test_restart_recovery;
mod test_retry_exhaustion;
mod test_session_renewal;
mod test_skip_retry;

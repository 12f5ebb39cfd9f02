//! Background tasks and their handlers.

mod send_verify_email;

use std::sync::Arc;

pub use send_verify_email::{
    PayloadSendVerifyEmail, SendVerifyEmail, TASK_SEND_VERIFY_EMAIL, distribute_send_verify_email,
    stage_send_verify_email,
};

use crate::db::Store;
use crate::queue::ServeMux;

/// Routes every task type this service produces to its handler.
#[must_use]
pub fn new_serve_mux(store: Arc<Store>) -> ServeMux {
    let mut mux = ServeMux::new();
    mux.handle(TASK_SEND_VERIFY_EMAIL, SendVerifyEmail::new(store));
    mux
}

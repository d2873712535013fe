//! HTTP API over the control plane.
//!
//! Every endpoint answers with a JSON [`crate::error::Outcome`]. Core calls are
//! blocking (SQLite, gate waits) and run on the blocking thread pool.

mod server;
mod state;

pub use server::{ServerHandle, build_router, start_server};
pub use state::ApiState;

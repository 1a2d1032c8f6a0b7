//! State management module for ferraform.
//!
//! This module provides persistent state storage for tracking provisioned
//! resources, their provider identifiers, and run history.

mod local;
mod lock;
mod s3;
mod store;
mod tracked;
mod types;

pub use local::{LocalStateStore, STATE_FILE};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::{StateStore, decode_state, encode_state};
pub use tracked::TrackedState;
pub use types::{
    MAX_HISTORY, ResourceRecord, RunHistoryEntry, RunOperation, STATE_VERSION, State,
};

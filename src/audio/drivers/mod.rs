//! [`CallDriver`](crate::audio::call::CallDriver) backends.
//!
//! - [`DryRunDriver`]: in-memory, logs every call. Used for local runs and tests.
//! - [`BridgeDriver`]: drives a sidecar process that hosts the real voice-call
//!   library, one process per chat, speaking newline-delimited JSON.

pub mod bridge;
pub mod dry_run;

pub use bridge::{BridgeCommand, BridgeDriver};
pub use dry_run::DryRunDriver;

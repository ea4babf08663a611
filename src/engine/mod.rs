// src/engine/mod.rs

//! Change propagation: coalesced events are resolved against the
//! deployment forest and applied to the target tree, with lock-aware
//! retries and debounced redeploy requests.

pub mod hot_sync;
pub mod lock_ops;
pub mod redeploy;
pub mod retry;
pub mod session;

pub use hot_sync::HotSyncEngine;
pub use lock_ops::{CopyOutcome, LockedFileOps, TargetSide};
pub use redeploy::RedeployDebouncer;
pub use retry::{Attempt, RetryExhausted, RetryPolicy};
pub use session::{SessionSettings, WatchSession, start};

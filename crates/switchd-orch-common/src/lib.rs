//! Common orchestration framework for the switchd control plane.
//!
//! Every daemon in the workspace is built from the same pieces:
//!
//! 1. A [`Store`] gateway carries configuration and state between daemons;
//!    tables are streamed through [`TableSubscription`]s.
//! 2. An [`Engine`] buffers mutations per entity key and re-drives them until
//!    the daemon's apply hook reports [`ApplyOutcome::Done`].
//! 3. A [`Scheduler`] multiplexes table subscriptions, notification channels
//!    and periodic timers onto one cooperative event loop.
//! 4. A [`WarmRestartCoordinator`] gates replay after a warm restart and
//!    publishes the daemon's lifecycle state.
//!
//! The apply contract is ternary: `Done` retires the entry, `Retry` keeps it
//! pending for the next wake (dependencies are encoded as preconditions, not
//! ordering), `Error` drops it after logging. A key stuck in `Retry` never
//! starves the others: the engine always finishes the batch before the key is
//! seen again.

mod consumer;
mod engine;
mod errordb;
mod event;
mod executor;
mod mem;
#[cfg(feature = "redis")]
mod redis_store;
mod store;
mod task;
mod warm;

pub use consumer::{Consumer, FieldValue, FieldValues, KeyOpFieldsValues, Operation};
pub use engine::Engine;
pub use errordb::{ErrorDb, FailureDisposition, FailureTracker, CHANNEL_ERROR_NOTIFICATIONS, CHANNEL_FLUSH_ERROR_DB};
pub use event::{EventChannel, NeighborUpdate, PortOperUpdate};
pub use executor::{Executor, Scheduler, WakeEvent};
pub use mem::MemStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};
pub use store::{
    app_key, cfg_key_parts, is_state_ok, Notification, NotificationSubscription, Store,
    StoreError, Stores, TableSubscription, APP_KEY_DELIMITER, CFG_KEY_DELIMITER,
};
pub use task::{ApplyOutcome, TaskError};
pub use warm::{WarmRestartCoordinator, WarmRestartState, WARM_RESTART_TABLE};

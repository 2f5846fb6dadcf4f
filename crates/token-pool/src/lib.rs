//! Token acquisition pool for external sites
//!
//! Hands out short-lived bearer tokens to many concurrent callers and logs in
//! only when it has to. A request flows through:
//!
//! 1. `TokenCache`: fast in-memory tier backed by a `DurableStore`
//! 2. `AccountSelector`: ranks accounts, skips blacklisted and busy ones
//! 3. singleflight: one login per (site, account) no matter how many callers
//! 4. `LoginLimiter`: global and per-site login slots
//! 5. `LoginExecutor`: the actual login, bounded by the request deadline
//! 6. `HistoryRecorder` and `PerformanceMonitor`: every terminal attempt
//!
//! `Coordinator` wires these together. `spawn_maintenance_task` keeps the
//! cache and history tidy in the background.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod durable;
pub mod error;
pub mod history;
pub mod limiter;
pub mod maintenance;
pub mod monitor;
pub mod retry;
pub mod selector;
pub mod singleflight;
pub mod telemetry;
pub mod types;

pub use cache::{CacheStats, TokenCache};
pub use config::{AlertThresholds, BlacklistConfig, PoolConfig, StoreRetryConfig};
pub use coordinator::Coordinator;
pub use durable::{DurableStore, JsonFileStore, MemoryStore};
pub use error::{AttemptFailure, Error, ErrorKind, Result, StoreError, WaitStage};
pub use history::{HistoryRecorder, SiteStatistics};
pub use limiter::LoginLimiter;
pub use maintenance::{MaintenanceConfig, spawn_maintenance_task};
pub use monitor::{HealthReport, HealthStatus, MetricsSnapshot, PerformanceMonitor};
pub use selector::{AccountSelector, Selection};
pub use types::{
    AcquisitionAttempt, AcquisitionRequest, AttemptOutcome, AttemptSource, TokenRecord,
};

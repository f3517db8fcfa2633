//! Token-bucket rate scheduling for active uploads.
//!
//! A single ticker task divides a global byte budget among all active
//! uploads once per tick: each request gets its desired (or default) rate,
//! scaled down proportionally when a client or the whole server would
//! exceed its cap. Workers consume from their per-upload allowance and park
//! on the tick signal when it runs dry.

mod config;
mod registry;
mod scheduler;
mod upload_config;

pub use config::RateLimiterConfig;
pub use registry::{ConfigurationRegistry, DEFAULT_IDLE_TIMEOUT};
pub use scheduler::{LimiterSettings, RateLimiter, DEFAULT_TICK_PERIOD};
pub use upload_config::UploadProcessingConfiguration;

//! Configuration layers of the openrum agent.
//!
//! Four layers with different lifetimes govern what the agent records and
//! transmits:
//!
//! - [`OpenKitConfig`] is immutable for the lifetime of an agent instance and
//!   identifies the application and device.
//! - [`PrivacyConfig`] is the application operator's privacy decision,
//!   evaluated on every record.
//! - [`ServerConfig`] is owned by the collector: it arrives with status
//!   responses and is merged over the previous snapshot atomically.
//! - [`CacheConfig`] and [`WatchdogConfig`] bound the agent's memory use and
//!   background cadence.

#![warn(missing_docs)]

mod agent;
mod openkit;
mod privacy;
mod server;

pub use self::agent::{CacheConfig, HttpClientConfig, WatchdogConfig};
pub use self::openkit::{ConfigError, OpenKitConfig, OpenKitConfigBuilder, AGENT_VERSION};
pub use self::privacy::{CrashReportingLevel, DataCollectionLevel, PrivacyConfig};
pub use self::server::ServerConfig;

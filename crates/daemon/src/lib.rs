pub mod config;
pub mod process;

pub use config::{Config, ConfigError};
pub use process::{spawn_service, start_service, ServiceError, ShutdownHandle, ShutdownReport};

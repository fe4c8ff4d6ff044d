//! Runtime configuration types.
//!
//! These are the validated values the engine runs with. Parsing the config
//! file and CLI is the server crate's job; it converts into these types.

mod config_store;
mod dispatcher;
mod gateway;
mod server;
mod worker;

pub use crate::risk::RiskPolicy;
pub use config_store::{ConfigStore, ConfigWatcher};
pub use dispatcher::{DispatcherConfig, WebhookBackoff};
pub use gateway::GatewayConfig;
pub use server::ServerConfig;
pub use worker::WorkerConfig;

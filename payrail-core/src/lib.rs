#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod events;
pub mod framework;
pub mod gateway;
pub mod ports;
pub mod processors;
pub mod risk;
pub mod state_machine;
pub mod store;
pub mod utils;

pub use context::RequestContext;
pub use error::{LedgerError, PaymentError, StoreError};

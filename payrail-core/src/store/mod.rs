pub mod cache;
pub mod memory;
pub mod postgres;

pub use cache::{CachedAccountDirectory, TtlCache};
pub use postgres::PostgresStore;

use sqlx::PgPool;

/// Executes query objects (see `entities`) against the connection pool.
///
/// Units of work that touch more than one table open their own transaction
/// inside `process`, so callers never hold a transaction across awaits on
/// other services.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

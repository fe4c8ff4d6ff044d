use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub actor: String,
    pub correlation_id: Uuid,
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct InsertAuditRecord {
    pub record: AuditRecord,
}

impl Processor<InsertAuditRecord> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertAuditRecord")]
    async fn process(&self, insert: InsertAuditRecord) -> Result<(), sqlx::Error> {
        let record = insert.record;
        sqlx::query(
            r#"
            INSERT INTO audit_log
                (action, entity_type, entity_id, details, actor, correlation_id, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.action)
        .bind(record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.details)
        .bind(&record.actor)
        .bind(record.correlation_id)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

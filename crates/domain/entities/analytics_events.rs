use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::analytics_events;

/// Write-only analytics sink; nothing in the billing subsystem reads these
/// back.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = analytics_events)]
pub struct NewAnalyticsEventEntity {
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
}

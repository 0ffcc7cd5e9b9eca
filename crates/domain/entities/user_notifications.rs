use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::user_notifications;

/// Outbound user-facing notification; written by the dunning manager and
/// rendered by the (out-of-scope) presentation layer.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_notifications)]
pub struct NewUserNotificationEntity {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
}

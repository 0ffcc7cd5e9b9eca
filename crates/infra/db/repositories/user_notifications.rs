use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::user_notifications},
};
use domain::{
    entities::user_notifications::NewUserNotificationEntity,
    repositories::user_notifications::UserNotificationRepository,
};

pub struct UserNotificationPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserNotificationPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserNotificationRepository for UserNotificationPostgres {
    async fn create_notification(&self, notification: NewUserNotificationEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(user_notifications::table)
            .values(&notification)
            .returning(user_notifications::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }
}

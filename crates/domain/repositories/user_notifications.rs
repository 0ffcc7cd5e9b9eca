use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::user_notifications::NewUserNotificationEntity;

#[async_trait]
#[automock]
pub trait UserNotificationRepository {
    async fn create_notification(&self, notification: NewUserNotificationEntity) -> Result<Uuid>;
}

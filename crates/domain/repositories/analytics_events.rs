use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::analytics_events::NewAnalyticsEventEntity;

#[async_trait]
#[automock]
pub trait AnalyticsEventRepository {
    async fn record_event(&self, event: NewAnalyticsEventEntity) -> Result<()>;
}

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use backend::usecases::{
    dunning::DunningUseCase,
    subscriptions::{ProviderGateway, SubscriptionUseCase},
};
use crates::domain::repositories::{
    analytics_events::AnalyticsEventRepository, payment_failures::PaymentFailureRepository,
    subscribers::SubscriberRepository, user_notifications::UserNotificationRepository,
};
use tracing::{error, info};

// Retry schedules are day-granular; an hourly sweep keeps due charges from
// drifting without hammering the provider.
const DUNNING_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const PLAN_CHANGE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run_dunning_sweep_loop<Sub, Fail, Notif, Provider>(
    usecase: Arc<DunningUseCase<Sub, Fail, Notif, Provider>>,
) -> Result<()>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    loop {
        info!("Checking for due payment retries...");
        match usecase.process_retry_payments().await {
            Ok(summary) => {
                if summary.recovered + summary.failed + summary.skipped > 0 {
                    info!(
                        recovered = summary.recovered,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "Dunning sweep completed"
                    );
                }
            }
            Err(e) => error!("Error while processing payment retries: {}", e),
        }

        tokio::time::sleep(DUNNING_SWEEP_INTERVAL).await;
    }
}

pub async fn run_plan_change_sweep_loop<Sub, Analytics, Provider>(
    usecase: Arc<SubscriptionUseCase<Sub, Analytics, Provider>>,
) -> Result<()>
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    loop {
        info!("Checking for due plan changes...");
        match usecase.process_pending_plan_changes().await {
            Ok(applied) => {
                if applied > 0 {
                    info!(applied, "Plan change sweep completed");
                }
            }
            Err(e) => error!("Error while applying pending plan changes: {}", e),
        }

        tokio::time::sleep(PLAN_CHANGE_SWEEP_INTERVAL).await;
    }
}

pub mod services;

use anyhow::Result;
use backend::config;
use backend::usecases::{
    dunning::{DunningConfig, DunningUseCase},
    subscriptions::SubscriptionUseCase,
};
use crates::{
    cache::TtlCache,
    clock::{Clock, SystemClock},
    infra::db::{
        postgres::postgres_connection,
        repositories::{
            analytics_events::AnalyticsEventPostgres, payment_failures::PaymentFailurePostgres,
            subscribers::SubscriberPostgres, user_notifications::UserNotificationPostgres,
        },
    },
    payments::provider_client::PaymentProviderClient,
    retry::{RetryExecutor, RetryPolicy, TokioSleeper},
};
use std::sync::Arc;
use tracing::info;

pub async fn run() -> Result<()> {
    let dotenvy_env = config::config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool =
        Arc::new(postgres_connection::establish_connection(&dotenvy_env.database.url)?);
    info!("Postgres connection has been established");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(TtlCache::new(Arc::clone(&clock)));
    let retry = RetryExecutor::new(RetryPolicy::default(), Arc::new(TokioSleeper));
    let provider = Arc::new(PaymentProviderClient::new(
        dotenvy_env.payment_provider.base_url.clone(),
        dotenvy_env.payment_provider.access_token.clone(),
        retry,
    ));

    let subscriber_repo = Arc::new(SubscriberPostgres::new(Arc::clone(&postgres_pool)));
    let failure_repo = Arc::new(PaymentFailurePostgres::new(Arc::clone(&postgres_pool)));
    let notification_repo = Arc::new(UserNotificationPostgres::new(Arc::clone(&postgres_pool)));
    let analytics_repo = Arc::new(AnalyticsEventPostgres::new(Arc::clone(&postgres_pool)));

    let dunning_usecase = Arc::new(DunningUseCase::new(
        Arc::clone(&subscriber_repo),
        failure_repo,
        notification_repo,
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&clock),
        DunningConfig::default(),
    ));

    let subscriptions_usecase = Arc::new(SubscriptionUseCase::new(
        subscriber_repo,
        analytics_repo,
        provider,
        cache,
        clock,
        dotenvy_env.payment_provider.callback_base_url.clone(),
    ));

    info!("Worker started");

    let dunning_loop = tokio::spawn(services::sweep_loop::run_dunning_sweep_loop(
        dunning_usecase,
    ));
    let plan_change_loop = tokio::spawn(services::sweep_loop::run_plan_change_sweep_loop(
        subscriptions_usecase,
    ));

    tokio::select! {
        result = dunning_loop => result??,
        result = plan_change_loop => result??,
    };

    Ok(())
}

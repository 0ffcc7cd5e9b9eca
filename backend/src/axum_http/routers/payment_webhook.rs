use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use crates::{
    cache::TtlCache,
    clock::Clock,
    domain::repositories::{
        analytics_events::AnalyticsEventRepository, payment_failures::PaymentFailureRepository,
        subscribers::SubscriberRepository, user_notifications::UserNotificationRepository,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            analytics_events::AnalyticsEventPostgres, payment_failures::PaymentFailurePostgres,
            subscribers::SubscriberPostgres, user_notifications::UserNotificationPostgres,
        },
    },
    payments::provider_client::PaymentProviderClient,
};
use tracing::info;

use crate::config::config_model::DotEnvyConfig;
use crate::usecases::dunning::{DunningConfig, DunningUseCase};
use crate::usecases::payment_webhook::WebhookUseCase;
use crate::usecases::subscriptions::ProviderGateway;

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    config: Arc<DotEnvyConfig>,
    cache: Arc<TtlCache>,
    provider: Arc<PaymentProviderClient>,
    clock: Arc<dyn Clock>,
) -> Router {
    let subscriber_repo = Arc::new(SubscriberPostgres::new(Arc::clone(&db_pool)));
    let analytics_repo = Arc::new(AnalyticsEventPostgres::new(Arc::clone(&db_pool)));
    let failure_repo = Arc::new(PaymentFailurePostgres::new(Arc::clone(&db_pool)));
    let notification_repo = Arc::new(UserNotificationPostgres::new(Arc::clone(&db_pool)));

    let dunning_usecase = Arc::new(DunningUseCase::new(
        Arc::clone(&subscriber_repo),
        failure_repo,
        notification_repo,
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&clock),
        DunningConfig::default(),
    ));

    let webhook_usecase = WebhookUseCase::new(
        subscriber_repo,
        analytics_repo,
        dunning_usecase,
        provider,
        cache,
        clock,
        config.payment_provider.webhook_secret.clone(),
    );

    Router::new()
        .route("/:provider", post(handle_provider_webhook))
        .with_state(Arc::new(webhook_usecase))
}

/// Always acknowledges with 200, including on validation failure or handler
/// error: anything else triggers the provider's own retry storm.
pub async fn handle_provider_webhook<Sub, Analytics, Fail, Notif, Provider>(
    State(webhook_usecase): State<Arc<WebhookUseCase<Sub, Analytics, Fail, Notif, Provider>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Fail: PaymentFailureRepository + Send + Sync + 'static,
    Notif: UserNotificationRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    let signature = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok());

    info!(
        provider,
        payload_bytes = body.len(),
        "webhook: event received"
    );

    webhook_usecase.ingest(&body, signature).await;

    StatusCode::OK
}

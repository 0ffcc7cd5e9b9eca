use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::{
    cache::TtlCache,
    clock::Clock,
    domain::{
        repositories::{
            analytics_events::AnalyticsEventRepository, subscribers::SubscriberRepository,
        },
        value_objects::plans,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            analytics_events::AnalyticsEventPostgres, subscribers::SubscriberPostgres,
        },
    },
    payments::provider_client::PaymentProviderClient,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::axum_http::error_responses::subscription_error_response;
use crate::config::config_model::DotEnvyConfig;
use crate::usecases::subscriptions::{ProviderGateway, SubscriptionUseCase};

#[derive(Debug, Deserialize)]
pub struct CheckSubscriptionRequest {
    pub page: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequestBody {
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequestBody {
    pub plan_id: String,
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    config: Arc<DotEnvyConfig>,
    cache: Arc<TtlCache>,
    provider: Arc<PaymentProviderClient>,
    clock: Arc<dyn Clock>,
) -> Router {
    let subscriber_repo = SubscriberPostgres::new(Arc::clone(&db_pool));
    let analytics_repo = AnalyticsEventPostgres::new(Arc::clone(&db_pool));
    let subscriptions_usecase = SubscriptionUseCase::new(
        Arc::new(subscriber_repo),
        Arc::new(analytics_repo),
        provider,
        cache,
        clock,
        config.payment_provider.callback_base_url.clone(),
    );

    Router::new()
        .route("/plans", get(list_plans))
        .route("/check", post(check_subscription))
        .route("/start-trial", post(start_trial))
        .route("/checkout", post(create_checkout))
        .route("/cancel", post(cancel_subscription))
        .route("/change-plan", post(change_plan))
        .with_state(Arc::new(subscriptions_usecase))
}

pub async fn list_plans<Sub, Analytics, Provider>(
    State(_usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    _auth: AuthUser,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    Json(plans::plan_catalog())
}

pub async fn check_subscription<Sub, Analytics, Provider>(
    State(usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    auth: AuthUser,
    body: Option<Json<CheckSubscriptionRequest>>,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    let page = body.as_ref().and_then(|body| body.page.clone());
    match usecase
        .check_subscription(auth.user_id, auth.is_admin(), page.as_deref())
        .await
    {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(err) => subscription_error_response(&err),
    }
}

pub async fn start_trial<Sub, Analytics, Provider>(
    State(usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    match usecase.start_trial(auth.user_id).await {
        Ok(trial) => (StatusCode::CREATED, Json(trial)).into_response(),
        Err(err) => subscription_error_response(&err),
    }
}

pub async fn create_checkout<Sub, Analytics, Provider>(
    State(usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    auth: AuthUser,
    Json(body): Json<CheckoutRequestBody>,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    match usecase
        .create_checkout(auth.user_id, auth.email.clone(), &body.plan_id)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => subscription_error_response(&err),
    }
}

pub async fn cancel_subscription<Sub, Analytics, Provider>(
    State(usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    match usecase.cancel_subscription(auth.user_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(CancelResponse {
                success: true,
                message: "Subscription will end at the current period".to_string(),
            }),
        )
            .into_response(),
        Err(err) => subscription_error_response(&err),
    }
}

pub async fn change_plan<Sub, Analytics, Provider>(
    State(usecase): State<Arc<SubscriptionUseCase<Sub, Analytics, Provider>>>,
    auth: AuthUser,
    Json(body): Json<ChangePlanRequestBody>,
) -> impl IntoResponse
where
    Sub: SubscriberRepository + Send + Sync + 'static,
    Analytics: AnalyticsEventRepository + Send + Sync + 'static,
    Provider: ProviderGateway + Send + Sync + 'static,
{
    match usecase
        .change_plan(auth.user_id, &body.plan_id, body.immediate)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => subscription_error_response(&err),
    }
}

use crate::{
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
};
use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    cache::{self, TtlCache},
    clock::{Clock, SystemClock},
    infra::db::postgres::postgres_connection::PgPoolSquad,
    payments::provider_client::PaymentProviderClient,
    retry::{RetryExecutor, RetryPolicy, TokioSleeper},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shared_cache = Arc::new(TtlCache::new(Arc::clone(&clock)));
    tokio::spawn(cache::run_purge_loop(
        Arc::clone(&shared_cache),
        cache::PURGE_INTERVAL,
    ));

    let retry = RetryExecutor::new(RetryPolicy::default(), Arc::new(TokioSleeper));
    let provider = Arc::new(PaymentProviderClient::new(
        config.payment_provider.base_url.clone(),
        config.payment_provider.access_token.clone(),
        retry,
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/subscription",
            routers::subscriptions::routes(
                Arc::clone(&db_pool),
                Arc::clone(&config),
                Arc::clone(&shared_cache),
                Arc::clone(&provider),
                Arc::clone(&clock),
            ),
        )
        .nest(
            "/webhooks",
            routers::payment_webhook::routes(
                Arc::clone(&db_pool),
                Arc::clone(&config),
                Arc::clone(&shared_cache),
                Arc::clone(&provider),
                Arc::clone(&clock),
            ),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::PUT,
                    Method::DELETE,
                ])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}

use anyhow::{Ok, Result};

use super::config_model::DotEnvyConfig;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = super::config_model::BackendServer {
        port: std::env::var("SERVER_PORT_BACKEND")
            .expect("SERVER_PORT_BACKEND is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = super::config_model::Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let auth = super::config_model::Auth {
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"),
    };

    let payment_provider = super::config_model::PaymentProvider {
        base_url: std::env::var("PAYMENT_PROVIDER_BASE_URL")
            .expect("PAYMENT_PROVIDER_BASE_URL is invalid"),
        access_token: std::env::var("PAYMENT_PROVIDER_ACCESS_TOKEN")
            .expect("PAYMENT_PROVIDER_ACCESS_TOKEN is invalid"),
        webhook_secret: std::env::var("PAYMENT_PROVIDER_WEBHOOK_SECRET").ok(),
        callback_base_url: std::env::var("PAYMENT_PROVIDER_CALLBACK_BASE_URL")
            .expect("PAYMENT_PROVIDER_CALLBACK_BASE_URL is invalid"),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        auth,
        payment_provider,
    })
}

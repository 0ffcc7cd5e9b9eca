#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub auth: Auth,
    pub payment_provider: PaymentProvider,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct PaymentProvider {
    pub base_url: String,
    pub access_token: String,
    /// Absent means inbound webhooks skip the signature check.
    pub webhook_secret: Option<String>,
    pub callback_base_url: String,
}

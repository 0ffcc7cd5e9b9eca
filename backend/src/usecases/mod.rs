pub mod dunning;
pub mod entitlement;
pub mod payment_webhook;
pub mod subscriptions;

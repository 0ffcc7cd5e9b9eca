pub mod enums;
pub mod plans;
pub mod subscriptions;
pub mod webhooks;

pub mod analytics_events;
pub mod payment_failures;
pub mod subscribers;
pub mod user_notifications;

pub mod access_levels;
pub mod payment_statuses;
pub mod subscription_statuses;

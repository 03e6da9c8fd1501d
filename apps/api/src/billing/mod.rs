pub mod handlers;
pub mod signature;
pub mod usage;
pub mod webhooks;

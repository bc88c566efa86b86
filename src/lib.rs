pub mod algorithms;
pub mod bans;
pub mod bucket_store;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod redis_client;
pub mod response;
pub mod server;
pub mod users;
pub mod zones;

pub use config::{Backend, Config, LimitsFile};
pub use error::{LimiterError, Result};
pub use limiter::Limiter;
pub use server::create_app;

pub mod app_config;
pub mod config;
pub mod error;
pub mod events;
pub mod store;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::ConfigError;
pub use events::{ChangeKind, EventKey, RatingEvent};
pub use store::RatingStore;

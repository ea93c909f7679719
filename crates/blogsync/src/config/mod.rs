pub mod loader;
pub mod schema;
pub mod template;

pub use loader::{
    default_config_path, load_config, load_config_from_str, validate_blog, validate_config,
    ConfigFormat,
};
pub use schema::{AppConfig, BlogConfig, DeploymentConfig, SyncSettings};

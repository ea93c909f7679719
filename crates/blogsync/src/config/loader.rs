use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::{AppConfig, BlogConfig};
use crate::error::ConfigError;

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Default location of the configuration file in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blogsync").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.sync.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "pollIntervalSecs must be greater than zero".to_string(),
        });
    }
    if config.sync.deploy_poll_interval_ms == 0 || config.sync.deploy_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "deployment poll interval and timeout must be greater than zero".to_string(),
        });
    }

    let mut ids = HashSet::new();
    for blog in &config.blogs {
        if !ids.insert(blog.id.as_str()) {
            return Err(ConfigError::InvalidBlog {
                id: blog.id.clone(),
                reason: "Duplicate blog id".to_string(),
            });
        }

        validate_blog(blog)?;
    }

    Ok(())
}

/// Checks one blog's settings; used for config files and blogs added at runtime.
pub fn validate_blog(blog: &BlogConfig) -> Result<(), ConfigError> {
    if blog.id.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "Blog id must not be empty".to_string(),
        });
    }

    let valid_repo = blog
        .repository
        .split_once('/')
        .is_some_and(|(owner, name)| {
            !owner.is_empty() && !name.is_empty() && !name.contains('/')
        });
    if !valid_repo {
        return Err(ConfigError::InvalidBlog {
            id: blog.id.clone(),
            reason: format!(
                "Repository '{}' must be in 'owner/name' form",
                blog.repository
            ),
        });
    }

    if blog.branch.trim().is_empty() {
        return Err(ConfigError::InvalidBlog {
            id: blog.id.clone(),
            reason: "Branch must not be empty".to_string(),
        });
    }

    if !blog.filename_template.contains("$slug") {
        return Err(ConfigError::InvalidBlog {
            id: blog.id.clone(),
            reason: "Filename template must contain '$slug'".to_string(),
        });
    }

    if blog.post_extensions.is_empty() {
        return Err(ConfigError::InvalidBlog {
            id: blog.id.clone(),
            reason: "At least one post extension is required".to_string(),
        });
    }

    if let Some(deployment) = &blog.deployment {
        if deployment.project.trim().is_empty() || deployment.account_id.trim().is_empty() {
            return Err(ConfigError::InvalidBlog {
                id: blog.id.clone(),
                reason: "Deployment tracking needs both accountId and project".to_string(),
            });
        }
        if deployment.poll_interval_ms == Some(0) {
            return Err(ConfigError::InvalidBlog {
                id: blog.id.clone(),
                reason: "deployment.pollIntervalMs must be greater than 0".to_string(),
            });
        }
        if deployment.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidBlog {
                id: blog.id.clone(),
                reason: "deployment.timeoutSecs must be greater than 0".to_string(),
            });
        }
    }

    Ok(())
}

use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker.worker_count == 0 {
        return Err(invalid("worker.worker_count must be greater than 0"));
    }
    if config.worker.poll_interval_ms == 0 {
        return Err(invalid("worker.poll_interval_ms must be greater than 0"));
    }

    let queue = &config.queue;
    if queue.name.trim().is_empty() {
        return Err(invalid("queue.name must not be empty"));
    }
    if queue.max_attempts == 0 {
        return Err(invalid("queue.max_attempts must be greater than 0"));
    }
    if queue.lease_timeout_secs == 0 {
        return Err(invalid("queue.lease_timeout_secs must be greater than 0"));
    }
    let heartbeat_ms = config.worker.heartbeat_interval_ms;
    if heartbeat_ms == 0 || heartbeat_ms >= queue.lease_timeout_secs.saturating_mul(1000) {
        return Err(invalid(format!(
            "worker.heartbeat_interval_ms must be between 1 and the lease timeout ({} s), got {}",
            queue.lease_timeout_secs, heartbeat_ms
        )));
    }

    let ai = &config.ai;
    if ai.model.trim().is_empty() {
        return Err(invalid("ai.model must not be empty"));
    }
    if !ai.base_url.starts_with("http://") && !ai.base_url.starts_with("https://") {
        return Err(invalid(format!(
            "ai.base_url must be an http(s) URL, got '{}'",
            ai.base_url
        )));
    }
    if !(0.0..=2.0).contains(&ai.temperature) {
        return Err(invalid(format!(
            "ai.temperature must be between 0 and 2, got {}",
            ai.temperature
        )));
    }
    if ai.max_tokens == 0 {
        return Err(invalid("ai.max_tokens must be greater than 0"));
    }
    if ai.max_retries == 0 {
        return Err(invalid("ai.max_retries must be greater than 0"));
    }
    if ai.request_timeout_secs == 0 {
        return Err(invalid("ai.request_timeout_secs must be greater than 0"));
    }

    let uploads = &config.uploads;
    if uploads.upload_dir.trim().is_empty() {
        return Err(invalid("uploads.upload_dir must not be empty"));
    }
    if uploads.max_file_size == 0 {
        return Err(invalid("uploads.max_file_size must be greater than 0"));
    }
    if uploads.allowed_mimetypes.is_empty() {
        return Err(invalid("uploads.allowed_mimetypes must not be empty"));
    }

    if config.logging.level.trim().is_empty() {
        return Err(invalid("logging.level must not be empty"));
    }

    Ok(())
}

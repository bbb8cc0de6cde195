use std::{fs, path::Path};

use once_cell::sync::Lazy;
use rand::{distr::Alphanumeric, rng, Rng};
use serde::{Deserialize, Serialize};

// Used for deserializing user-provided config files where all fields are optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secret_key: Option<String>,
    pub db_url: Option<String>,
    pub upstream_base_url: Option<String>,
    pub log_level: Option<String>,
    pub max_attempts: Option<u32>,
    pub attempt_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub lease_wait_millis: Option<u64>,
    pub var_seed: Option<u64>,
    pub models: Option<Vec<String>>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config, overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host { final_config.host = host; }
        if let Some(port) = self.port { final_config.port = port; }
        if let Some(secret_key) = self.secret_key { final_config.secret_key = secret_key; }
        if let Some(db_url) = self.db_url { final_config.db_url = db_url; }
        if let Some(upstream_base_url) = self.upstream_base_url { final_config.upstream_base_url = upstream_base_url; }
        if let Some(log_level) = self.log_level { final_config.log_level = log_level; }
        if let Some(max_attempts) = self.max_attempts { final_config.max_attempts = max_attempts; }
        if let Some(attempt_timeout_secs) = self.attempt_timeout_secs { final_config.attempt_timeout_secs = attempt_timeout_secs; }
        if let Some(request_timeout_secs) = self.request_timeout_secs { final_config.request_timeout_secs = request_timeout_secs; }
        if let Some(lease_wait_millis) = self.lease_wait_millis { final_config.lease_wait_millis = lease_wait_millis; }
        if let Some(var_seed) = self.var_seed { final_config.var_seed = Some(var_seed); }
        if let Some(models) = self.models { final_config.models = models; }
    }
}

// The fully resolved configuration used by the application.
// This is also the format for the default configuration file.
#[derive(Debug, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub secret_key: String,
    pub db_url: String,
    pub upstream_base_url: String,
    pub log_level: String,
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub lease_wait_millis: u64,
    // Fixed seed for the template variable engine. Test harnesses only.
    pub var_seed: Option<u64>,
    // Model identifiers advertised by GET /v1/models.
    pub models: Vec<String>,
}

fn generate_random_string(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        secret_key: get_env_var("SECRET_KEY"),
        db_url: get_env_var("DB_URL"),
        upstream_base_url: get_env_var("UPSTREAM_BASE_URL"),
        log_level: get_env_var("LOG_LEVEL"),
        max_attempts: get_env_var("MAX_ATTEMPTS"),
        attempt_timeout_secs: get_env_var("ATTEMPT_TIMEOUT_SECS"),
        request_timeout_secs: get_env_var("REQUEST_TIMEOUT_SECS"),
        lease_wait_millis: get_env_var("LEASE_WAIT_MILLIS"),
        var_seed: get_env_var("VAR_SEED"),
        models: None,
    }
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(|| {
    let default_config_path = if cfg!(debug_assertions) {
        Path::new("../config.default.yaml")
    } else {
        Path::new("config.default.yaml")
    };
    let user_config_path_release = Path::new("config.yaml");
    let user_config_path_dev_primary = Path::new("../config.local.yaml");
    let user_config_path_dev_fallback = Path::new("../config.yaml");

    // Determine which user config file to use for overrides
    let user_config_path = if cfg!(debug_assertions) {
        if user_config_path_dev_primary.exists() {
            user_config_path_dev_primary
        } else {
            user_config_path_dev_fallback
        }
    } else {
        user_config_path_release
    };

    // Create a FinalConfig with programmatic defaults.
    let mut effective_default_config = FinalConfig {
        host: "0.0.0.0".to_string(),
        port: 8000,
        secret_key: generate_random_string(48),
        db_url: "./storage/passage.db".to_string(),
        upstream_base_url: "https://generativelanguage.googleapis.com".to_string(),
        log_level: "info".to_string(),
        max_attempts: 3,
        attempt_timeout_secs: 120,
        request_timeout_secs: 600,
        lease_wait_millis: 2000,
        var_seed: None,
        models: vec![
            "gemini-2.0-flash".to_string(),
            "gemini-2.5-pro".to_string(),
        ],
    };

    // If a default config file exists, load it as partial and merge it over the programmatic defaults.
    if default_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(default_config_path) {
            let file_defaults: PartialConfig = serde_yaml::from_str(&config_str)
                .unwrap_or_else(|e| panic!("Failed to parse default configuration file at {:?}: {}", default_config_path, e));

            file_defaults.merge_into(&mut effective_default_config);
        }
    }

    // Write the (potentially updated) defaults back to the file so new fields
    // show up in config.default.yaml.
    let yaml_str = serde_yaml::to_string(&effective_default_config).unwrap();
    fs::write(default_config_path, yaml_str)
        .unwrap_or_else(|err| panic!("Failed to write default configuration file: {}", err));

    // Start with the effective defaults.
    let mut final_config = effective_default_config;

    // Load the user's config if it exists. It's optional and overrides the defaults.
    if user_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(user_config_path) {
            let user_config: PartialConfig = serde_yaml::from_str(&config_str)
                .unwrap_or_else(|e| panic!("Failed to parse user configuration file at {:?}: {}", user_config_path, e));

            user_config.merge_into(&mut final_config);
        }
    }

    // Load config from environment variables, which have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
});

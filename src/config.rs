use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Browser origins allowed to call the API
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Allow any origin, for local development
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_origins: Vec::new(),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_google_base_url")]
    pub google_base_url: String,
    #[serde(default = "default_ors_base_url")]
    pub ors_base_url: String,
    #[serde(default = "default_mbta_base_url")]
    pub mbta_base_url: String,
    /// Names of the environment variables holding the API keys
    #[serde(default = "default_google_key_env")]
    pub google_api_key_env: String,
    #[serde(default = "default_ors_key_env")]
    pub ors_api_key_env: String,
    #[serde(default = "default_mbta_key_env")]
    pub mbta_api_key_env: String,
    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Outer bound on one adapter call, retries included
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            google_base_url: default_google_base_url(),
            ors_base_url: default_ors_base_url(),
            mbta_base_url: default_mbta_base_url(),
            google_api_key_env: default_google_key_env(),
            ors_api_key_env: default_ors_key_env(),
            mbta_api_key_env: default_mbta_key_env(),
            request_timeout_secs: default_request_timeout(),
            call_timeout_secs: default_call_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProvidersConfig {
    /// Resolve an API key from the environment, treating blank values as unset
    pub fn api_key(env_name: &str) -> Option<String> {
        std::env::var(env_name)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Share of the historical mean in a blended duration; the route gets the rest
    #[serde(default = "default_historical_weight")]
    pub historical_weight: f64,
    #[serde(default = "default_min_historical_trips")]
    pub min_historical_trips: usize,
    #[serde(default = "default_nearby_radius")]
    pub nearby_stop_radius_miles: f64,
    #[serde(default)]
    pub history_match: MatchPolicy,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            historical_weight: default_historical_weight(),
            min_historical_trips: default_min_historical_trips(),
            nearby_stop_radius_miles: default_nearby_radius(),
            history_match: MatchPolicy::default(),
        }
    }
}

/// How logged trip destinations are matched against a requested destination.
/// Both policies compare case-insensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    Exact,
    #[default]
    Contains,
}

impl MatchPolicy {
    pub fn matches(&self, logged: &str, pattern: &str) -> bool {
        let logged = logged.to_lowercase();
        let pattern = pattern.to_lowercase();
        match self {
            MatchPolicy::Exact => logged == pattern,
            MatchPolicy::Contains => logged.contains(&pattern),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite://data/trips.db".to_string()
}

fn default_google_base_url() -> String {
    "https://maps.googleapis.com/maps/api".to_string()
}

fn default_ors_base_url() -> String {
    "https://api.openrouteservice.org".to_string()
}

fn default_mbta_base_url() -> String {
    "https://api-v3.mbta.com".to_string()
}

fn default_google_key_env() -> String {
    "GOOGLE_MAPS_API_KEY".to_string()
}

fn default_ors_key_env() -> String {
    "ORS_API_KEY".to_string()
}

fn default_mbta_key_env() -> String {
    "MBTA_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_call_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_historical_weight() -> f64 {
    0.4
}

fn default_min_historical_trips() -> usize {
    3
}

fn default_nearby_radius() -> f64 {
    0.3
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_yaml(&content)
    }

    /// Load from `path`, or fall back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weight = self.prediction.historical_weight;
        if !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::Invalid(format!(
                "prediction.historical_weight must be within [0, 1], got {}",
                weight
            )));
        }
        if self.prediction.nearby_stop_radius_miles <= 0.0 {
            return Err(ConfigError::Invalid(
                "prediction.nearby_stop_radius_miles must be positive".to_string(),
            ));
        }
        if self.providers.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "providers.call_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:3000");
        assert_eq!(config.prediction.historical_weight, 0.4);
        assert_eq!(config.prediction.min_historical_trips, 3);
        assert_eq!(config.prediction.history_match, MatchPolicy::Contains);
        assert_eq!(config.providers.max_retries, 2);
    }

    #[test]
    fn sections_override_defaults() {
        let yaml = r#"
server:
  bind_address: "0.0.0.0:8080"
  cors_permissive: true
prediction:
  historical_weight: 0.7
  history_match: exact
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert!(config.server.cors_permissive);
        assert_eq!(config.prediction.historical_weight, 0.7);
        assert_eq!(config.prediction.history_match, MatchPolicy::Exact);
        assert_eq!(config.database.url, "sqlite://data/trips.db");
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let err = Config::from_yaml("prediction:\n  historical_weight: 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = Config::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn match_policy_is_case_insensitive() {
        assert!(MatchPolicy::Exact.matches("Work", "work"));
        assert!(!MatchPolicy::Exact.matches("Work HQ", "work"));
        assert!(MatchPolicy::Contains.matches("Work HQ", "WORK"));
        assert!(!MatchPolicy::Contains.matches("Gym", "work"));
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  // Handle ${VAR_NAME} syntax first (more specific)
  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!(
        "{}{}{}",
        &result[..start],
        value,
        &result[start + end + 1..]
      );
    } else {
      break;
    }
  }

  // Handle $VAR_NAME syntax (word boundary: alphanumeric + underscore)
  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') && !result[i..].starts_with("${") {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let var_name = &rest[..var_len];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += 1;
  }

  result
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub postgres: PostgresSection,
  #[serde(default)]
  pub broker: BrokerSection,
  #[serde(default)]
  pub cache: CacheSection,
  #[serde(default)]
  pub limits: LimitsSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

fn default_host() -> String {
  "0.0.0.0".into()
}
fn default_port() -> u16 {
  8082
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSection {
  #[serde(default = "default_pg_url")]
  pub url: String,
  #[serde(default = "default_max_conn")]
  pub max_connections: usize,
}
fn default_pg_url() -> String {
  "postgres://localhost/orderhub".into()
}
fn default_max_conn() -> usize {
  20
}
impl Default for PostgresSection {
  fn default() -> Self {
    Self {
      url: default_pg_url(),
      max_connections: default_max_conn(),
    }
  }
}

/// Change event queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
  /// Connection string of the queue backend.
  #[serde(default = "default_broker_url")]
  pub url: String,
  #[serde(default = "default_topic")]
  pub topic: String,
  #[serde(default = "default_group_id")]
  pub group_id: String,
  /// How often the consumer polls for new events when idle.
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
}
fn default_broker_url() -> String {
  "postgres://localhost/orderhub".into()
}
fn default_topic() -> String {
  "orders".into()
}
fn default_group_id() -> String {
  "orders_group".into()
}
fn default_poll_interval_ms() -> u64 {
  500
}
impl Default for BrokerSection {
  fn default() -> Self {
    Self {
      url: default_broker_url(),
      topic: default_topic(),
      group_id: default_group_id(),
      poll_interval_ms: default_poll_interval_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
  /// Maximum number of resident orders. Zero disables retention entirely.
  #[serde(default = "default_capacity")]
  pub capacity: usize,
}
fn default_capacity() -> usize {
  1000
}
impl Default for CacheSection {
  fn default() -> Self {
    Self {
      capacity: default_capacity(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
  /// Store round-trip budget for a single cache-miss lookup.
  #[serde(default = "default_lookup_timeout_ms")]
  pub lookup_timeout_ms: u64,
}
fn default_lookup_timeout_ms() -> u64 {
  5000
}
impl Default for LimitsSection {
  fn default() -> Self {
    Self {
      lookup_timeout_ms: default_lookup_timeout_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    let expanded = expand_env_vars(&content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["orderhub.yaml", "orderhub.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }
}

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Result, WrapErr};

use crate::config::models::GatewayConfig;

/// Environment variable prefix (`WAYPOINT_SERVER__PORT=9000`)
pub const ENV_PREFIX: &str = "WAYPOINT";

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    }
}

/// Load configuration: built-in defaults, then the optional file, then
/// `WAYPOINT_*` environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    load_config_with_env(config_path, Environment::with_prefix(ENV_PREFIX))
}

/// Same as [`load_config`] but with a caller-supplied environment source,
/// so tests can inject variables without touching the process environment.
pub fn load_config_with_env(
    config_path: Option<&str>,
    environment: Environment,
) -> Result<GatewayConfig> {
    let defaults = Config::try_from(&GatewayConfig::default())
        .wrap_err("Failed to serialize default configuration")?;

    let mut builder = Config::builder().add_source(defaults);

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        if !path.exists() {
            eyre::bail!("Configuration file not found: {}", path.display());
        }
        builder = builder.add_source(File::new(config_path, file_format(path)));
    }

    let settings = builder
        .add_source(
            environment
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors.allowed_origins")
                .with_list_parse_key("cors.allowed_methods")
                .with_list_parse_key("cors.allowed_headers")
                .try_parsing(true),
        )
        .build()
        .wrap_err("Failed to build configuration")?;

    let config: GatewayConfig = settings.try_deserialize().wrap_err_with(|| match config_path {
        Some(path) => format!("Failed to deserialize config from {path}"),
        None => "Failed to deserialize configuration".to_string(),
    })?;

    Ok(config)
}

/// Commented starter file written by `waypoint init`.
pub const STARTER_CONFIG: &str = r#"# Waypoint gateway configuration
# Every key can be overridden with WAYPOINT_<SECTION>__<KEY>, e.g. WAYPOINT_SERVER__PORT=9000

server:
  host: "0.0.0.0"
  port: 8080
  environment: development
  shutdown_grace_secs: 30

jwt:
  secret: "change-me-in-production"
  expiry: "24h"

rate_limit:
  requests: 100        # bucket capacity
  window_secs: 60      # time to refill an empty bucket
  on_missing_key: allow
  store: memory        # memory | redis
  store_timeout_ms: 5000

# redis:
#   url: "redis://127.0.0.1:6379"

circuit_breaker:
  failure_threshold: 5
  timeout_secs: 30
  half_open_max_requests: 3

timeouts:
  read_secs: 15
  write_secs: 15
  idle_secs: 60

logging:
  level: info
  json: true

# Seed accounts created at startup. Pick a real password before enabling.
# users:
#   - username: admin
#     email: admin@example.com
#     password: "change-me-too"
#     role: admin

services:
  - name: users
    urls:
      - "http://127.0.0.1:9001"
      - "http://127.0.0.1:9002"
    health_path: /health
"#;

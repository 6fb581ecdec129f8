use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub mail: MailConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Shared secret callers present in the `API-Key` header.
    pub api_key: SecretString,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Members of this group are managers; the unclaimed report skips them.
    pub managers_group_id: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub enabled: bool,
    /// Mailbox the report is sent from.
    pub sender: Option<String>,
    /// Distribution list that receives the unclaimed report.
    pub managers_group_mail: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JobsConfig {
    pub report_enabled: bool,
    pub report_interval_minutes: u64,
    pub reconcile_enabled: bool,
    pub reconcile_interval_minutes: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub api_key: Option<String>,
    pub directory_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                api_key: String::new().into(),
                graceful_shutdown_secs: 15,
            },
            database: DatabaseConfig {
                url: "sqlite://orgchart.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            directory: DirectoryConfig {
                base_url: String::new(),
                token_url: String::new(),
                client_id: String::new(),
                client_secret: String::new().into(),
                managers_group_id: None,
                timeout_secs: 30,
            },
            mail: MailConfig { enabled: false, sender: None, managers_group_mail: None },
            jobs: JobsConfig {
                report_enabled: true,
                report_interval_minutes: 1440,
                reconcile_enabled: true,
                reconcile_interval_minutes: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("orgchart.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(api_key_value) = server.api_key {
                self.server.api_key = secret_value(api_key_value);
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(directory) = patch.directory {
            if let Some(base_url) = directory.base_url {
                self.directory.base_url = base_url;
            }
            if let Some(token_url) = directory.token_url {
                self.directory.token_url = token_url;
            }
            if let Some(client_id) = directory.client_id {
                self.directory.client_id = client_id;
            }
            if let Some(client_secret_value) = directory.client_secret {
                self.directory.client_secret = secret_value(client_secret_value);
            }
            if let Some(managers_group_id) = directory.managers_group_id {
                self.directory.managers_group_id = Some(managers_group_id);
            }
            if let Some(timeout_secs) = directory.timeout_secs {
                self.directory.timeout_secs = timeout_secs;
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(enabled) = mail.enabled {
                self.mail.enabled = enabled;
            }
            if let Some(sender) = mail.sender {
                self.mail.sender = Some(sender);
            }
            if let Some(managers_group_mail) = mail.managers_group_mail {
                self.mail.managers_group_mail = Some(managers_group_mail);
            }
        }

        if let Some(jobs) = patch.jobs {
            if let Some(report_enabled) = jobs.report_enabled {
                self.jobs.report_enabled = report_enabled;
            }
            if let Some(report_interval_minutes) = jobs.report_interval_minutes {
                self.jobs.report_interval_minutes = report_interval_minutes;
            }
            if let Some(reconcile_enabled) = jobs.reconcile_enabled {
                self.jobs.reconcile_enabled = reconcile_enabled;
            }
            if let Some(reconcile_interval_minutes) = jobs.reconcile_interval_minutes {
                self.jobs.reconcile_interval_minutes = reconcile_interval_minutes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ORGCHART_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ORGCHART_SERVER_PORT") {
            self.server.port = parse_u16("ORGCHART_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_SERVER_API_KEY") {
            self.server.api_key = secret_value(value);
        }
        if let Some(value) = read_env("ORGCHART_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ORGCHART_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("ORGCHART_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ORGCHART_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ORGCHART_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ORGCHART_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ORGCHART_DIRECTORY_BASE_URL") {
            self.directory.base_url = value;
        }
        if let Some(value) = read_env("ORGCHART_DIRECTORY_TOKEN_URL") {
            self.directory.token_url = value;
        }
        if let Some(value) = read_env("ORGCHART_DIRECTORY_CLIENT_ID") {
            self.directory.client_id = value;
        }
        if let Some(value) = read_env("ORGCHART_DIRECTORY_CLIENT_SECRET") {
            self.directory.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("ORGCHART_DIRECTORY_MANAGERS_GROUP_ID") {
            self.directory.managers_group_id = Some(value);
        }
        if let Some(value) = read_env("ORGCHART_DIRECTORY_TIMEOUT_SECS") {
            self.directory.timeout_secs = parse_u64("ORGCHART_DIRECTORY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ORGCHART_MAIL_ENABLED") {
            self.mail.enabled = parse_bool("ORGCHART_MAIL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_MAIL_SENDER") {
            self.mail.sender = Some(value);
        }
        if let Some(value) = read_env("ORGCHART_MAIL_MANAGERS_GROUP_MAIL") {
            self.mail.managers_group_mail = Some(value);
        }

        if let Some(value) = read_env("ORGCHART_JOBS_REPORT_ENABLED") {
            self.jobs.report_enabled = parse_bool("ORGCHART_JOBS_REPORT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_JOBS_REPORT_INTERVAL_MINUTES") {
            self.jobs.report_interval_minutes =
                parse_u64("ORGCHART_JOBS_REPORT_INTERVAL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_JOBS_RECONCILE_ENABLED") {
            self.jobs.reconcile_enabled = parse_bool("ORGCHART_JOBS_RECONCILE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORGCHART_JOBS_RECONCILE_INTERVAL_MINUTES") {
            self.jobs.reconcile_interval_minutes =
                parse_u64("ORGCHART_JOBS_RECONCILE_INTERVAL_MINUTES", &value)?;
        }

        let log_level =
            read_env("ORGCHART_LOGGING_LEVEL").or_else(|| read_env("ORGCHART_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ORGCHART_LOGGING_FORMAT").or_else(|| read_env("ORGCHART_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(api_key) = overrides.api_key {
            self.server.api_key = secret_value(api_key);
        }
        if let Some(directory_base_url) = overrides.directory_base_url {
            self.directory.base_url = directory_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_database(&self.database)?;
        validate_directory(&self.directory)?;
        validate_mail(&self.mail)?;
        validate_jobs(&self.jobs)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("orgchart.toml"), PathBuf::from("config/orgchart.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.api_key is required; callers authenticate with the API-Key header"
                .to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_directory(directory: &DirectoryConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("directory.base_url", directory.base_url.trim()),
        ("directory.token_url", directory.token_url.trim()),
        ("directory.client_id", directory.client_id.trim()),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{field} is required")));
        }
    }

    for (field, value) in [
        ("directory.base_url", directory.base_url.trim()),
        ("directory.token_url", directory.token_url.trim()),
    ] {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{field} must start with http:// or https://"
            )));
        }
    }

    if directory.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("directory.client_secret is required".to_string()));
    }

    if directory.timeout_secs == 0 || directory.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "directory.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if mail.enabled {
        let sender_missing = mail.sender.as_ref().map(|s| s.trim().is_empty()).unwrap_or(true);
        if sender_missing {
            return Err(ConfigError::Validation(
                "mail.sender is required when mail.enabled is true".to_string(),
            ));
        }
        let recipient_missing =
            mail.managers_group_mail.as_ref().map(|s| s.trim().is_empty()).unwrap_or(true);
        if recipient_missing {
            return Err(ConfigError::Validation(
                "mail.managers_group_mail is required when mail.enabled is true".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_jobs(jobs: &JobsConfig) -> Result<(), ConfigError> {
    if jobs.report_enabled && jobs.report_interval_minutes == 0 {
        return Err(ConfigError::Validation(
            "jobs.report_interval_minutes must be greater than zero".to_string(),
        ));
    }
    if jobs.reconcile_enabled && jobs.reconcile_interval_minutes == 0 {
        return Err(ConfigError::Validation(
            "jobs.reconcile_interval_minutes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    database: Option<DatabasePatch>,
    directory: Option<DirectoryPatch>,
    mail: Option<MailPatch>,
    jobs: Option<JobsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryPatch {
    base_url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    managers_group_id: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    enabled: Option<bool>,
    sender: Option<String>,
    managers_group_mail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobsPatch {
    report_enabled: Option<bool>,
    report_interval_minutes: Option<u64>,
    reconcile_enabled: Option<bool>,
    reconcile_interval_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn set_required_vars() {
        env::set_var("ORGCHART_SERVER_API_KEY", "test-api-key");
        env::set_var("ORGCHART_DIRECTORY_BASE_URL", "https://graph.test/v1.0");
        env::set_var("ORGCHART_DIRECTORY_TOKEN_URL", "https://login.test/token");
        env::set_var("ORGCHART_DIRECTORY_CLIENT_ID", "client-id");
        env::set_var("ORGCHART_DIRECTORY_CLIENT_SECRET", "client-secret");
    }

    const REQUIRED_VARS: &[&str] = &[
        "ORGCHART_SERVER_API_KEY",
        "ORGCHART_DIRECTORY_BASE_URL",
        "ORGCHART_DIRECTORY_TOKEN_URL",
        "ORGCHART_DIRECTORY_CLIENT_ID",
        "ORGCHART_DIRECTORY_CLIENT_SECRET",
    ];

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("TEST_DIRECTORY_SECRET", "secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("orgchart.toml");
            fs::write(
                &path,
                r#"
[directory]
client_secret = "${TEST_DIRECTORY_SECRET}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            // env var override still wins over the interpolated file value
            ensure(
                config.directory.client_secret.expose_secret() == "client-secret",
                "env client secret should win over file",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEST_DIRECTORY_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("ORGCHART_LOG_LEVEL", "warn");
        env::set_var("ORGCHART_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["ORGCHART_LOG_LEVEL", "ORGCHART_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("ORGCHART_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("orgchart.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["ORGCHART_DATABASE_URL"]);
        result
    }

    #[test]
    fn validation_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::remove_var("ORGCHART_SERVER_API_KEY");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("server.api_key") && message.contains("API-Key header")
            );
            ensure(
                has_message,
                "validation failure should mention server.api_key and the API-Key header",
            )
        })();

        clear_vars(REQUIRED_VARS);
        result
    }

    #[test]
    fn mail_enabled_requires_sender_and_recipient() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("ORGCHART_MAIL_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("mail.sender")
            );
            ensure(has_message, "validation failure should mention mail.sender")
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["ORGCHART_MAIL_ENABLED"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("ORGCHART_SERVER_API_KEY", "super-secret-api-key");
        env::set_var("ORGCHART_DIRECTORY_CLIENT_SECRET", "super-secret-client-secret");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-api-key"),
                "debug output should not contain the api key",
            )?;
            ensure(
                !debug.contains("super-secret-client-secret"),
                "debug output should not contain the client secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        result
    }
}

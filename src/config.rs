//! Configuration loading.
//!
//! Settings live in `config/app.yml` by convention (the filename can be
//! changed with `CONFIG_FILENAME`). Before parsing, the file is expanded as a
//! template so values can come from the environment:
//!
//! ```yaml
//! debug: true
//! jwt:
//!   secret: '{{ env "JWT_SECRET" "" }}'
//!   exp: 72
//! db:
//!   driver: sqlite
//!   dsn: '{{ env "DATABASE_URL" "data.db" }}'
//! ```
//!
//! CLI/env overrides (see [`crate::cli::Args`]) are applied last.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cli::Args;

/// Config shared by every request.
pub type SharedConfig = Arc<Config>;

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cors: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub jwt: Jwt,
    #[serde(default)]
    pub db: Db,
    #[serde(default)]
    pub api_client: ApiClient,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hide error details from responses even in debug mode.
    #[serde(default)]
    pub suppress_errors: bool,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            suppress_errors: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9003
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub secret: String,
    /// Cookie lifetime in seconds.
    #[serde(default = "default_session_max_age")]
    pub max_age: i64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            secret: String::new(),
            max_age: default_session_max_age(),
        }
    }
}

fn default_session_max_age() -> i64 {
    86400 * 7
}

/// JWT settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwt {
    #[serde(default)]
    pub secret: String,
    /// Token lifetime in hours.
    #[serde(default = "default_jwt_exp")]
    pub exp: u32,
}

impl Default for Jwt {
    fn default() -> Self {
        Self {
            secret: String::new(),
            exp: default_jwt_exp(),
        }
    }
}

impl Jwt {
    /// Lifetime in hours, treating 0 as unset.
    pub fn exp_hours(&self) -> u32 {
        if self.exp == 0 {
            default_jwt_exp()
        } else {
            self.exp
        }
    }
}

fn default_jwt_exp() -> u32 {
    72
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Db {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_dsn")]
    pub dsn: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: usize,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
}

impl Default for Db {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            dsn: default_dsn(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
        }
    }
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_dsn() -> String {
    "data.db".to_string()
}

pub(crate) fn default_max_open_conns() -> usize {
    20
}

fn default_max_idle_conns() -> usize {
    2
}

/// External API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClient {
    #[serde(default)]
    pub host: String,
    /// Request timeout in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout: u64,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self {
            host: String::new(),
            timeout: default_api_timeout(),
        }
    }
}

fn default_api_timeout() -> u64 {
    35
}

impl Config {
    /// Apply CLI and environment overrides.
    pub fn apply_args(&mut self, args: &Args) -> crate::Result<()> {
        if let Some(port) = args.port()? {
            self.server.port = port;
        }
        if args.suppress_errors {
            self.server.suppress_errors = true;
        }
        Ok(())
    }

    /// Whether error details may be sent to clients.
    pub fn expose_errors(&self) -> bool {
        self.debug && !self.server.suppress_errors
    }
}

/// Directory holding the settings file, relative to the working directory.
pub const CONFIG_DIR: &str = "config";

/// Default settings filename.
pub const DEFAULT_FILENAME: &str = "app.yml";

/// Legacy per-environment settings filename.
pub const SETTINGS_FILENAME: &str = "settings.yaml";

/// Environment selected when `APP_TARGETENV` is unset.
pub const DEFAULT_TARGET_ENV: &str = "development";

/// Settings file loader.
#[derive(Debug, Clone)]
pub struct Loader {
    pub dir: PathBuf,
    pub filename: String,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(CONFIG_DIR),
            filename: DEFAULT_FILENAME.to_string(),
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader for `config/<filename>` using the CLI/env selected filename.
    pub fn from_args(args: &Args) -> Self {
        Self {
            filename: args.config_filename.clone(),
            ..Self::default()
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    /// Read, expand and parse the settings file.
    pub fn load(&self) -> crate::Result<Config> {
        let path = self.path();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let expanded = expand_env(&content)?;

        let config = if is_toml(&path) {
            toml::from_str(&expanded)?
        } else {
            serde_yaml::from_str(&expanded)?
        };
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load the `target_env` section of the legacy `settings.yaml`.
    ///
    /// Sections use the legacy keys (`enabledCors`, `jwt.expire`,
    /// `database.datasource`, `database.maxOpenConns`, `apiClient`).
    /// A missing `maxOpenConns` means 32.
    ///
    /// The file is read from the working directory in development and from
    /// the executable's folder otherwise.
    pub fn load_environment(target_env: &str) -> crate::Result<Config> {
        let dir = if target_env == DEFAULT_TARGET_ENV {
            PathBuf::new()
        } else {
            std::env::current_exe()?
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::Config("Executable has no parent folder".into()))?
        };
        load_environment_from(&dir.join(SETTINGS_FILENAME), target_env)
    }
}

/// Target environment from `APP_TARGETENV`.
pub fn target_env() -> String {
    std::env::var("APP_TARGETENV")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_TARGET_ENV.to_string())
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

/// Parse a YAML settings document held in memory.
pub fn load_from_bytes(bytes: &[u8]) -> crate::Result<Config> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Config(format!("Settings are not UTF-8: {e}")))?;
    Ok(serde_yaml::from_str(&expand_env(text)?)?)
}

fn load_environment_from(path: &Path, target_env: &str) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    let document: serde_yaml::Value = serde_yaml::from_str(&expand_env(&content)?)?;
    let section = document
        .get(target_env)
        .cloned()
        .ok_or_else(|| Error::Config(format!("Environment '{target_env}' not found in settings")))?;
    let legacy: LegacySettings = serde_yaml::from_value(section)?;
    Ok(legacy.into())
}

/// One environment section of `settings.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacySettings {
    enabled_cors: bool,
    debug: bool,
    port: Option<u16>,
    session: LegacySession,
    jwt: LegacyJwt,
    database: LegacyDatabase,
    api_client: ApiClient,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacySession {
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LegacyJwt {
    secret: String,
    /// Hours.
    expire: u32,
}

impl Default for LegacyJwt {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire: default_jwt_exp(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyDatabase {
    driver: String,
    datasource: String,
    max_open_conns: usize,
    max_idle_conns: usize,
}

impl Default for LegacyDatabase {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            datasource: default_dsn(),
            max_open_conns: LEGACY_MAX_OPEN_CONNS,
            max_idle_conns: default_max_idle_conns(),
        }
    }
}

/// Pool size when `settings.yaml` leaves `maxOpenConns` out.
const LEGACY_MAX_OPEN_CONNS: usize = 32;

impl From<LegacySettings> for Config {
    fn from(legacy: LegacySettings) -> Self {
        let mut server = Server::default();
        if let Some(port) = legacy.port {
            server.port = port;
        }
        Config {
            cors: legacy.enabled_cors,
            debug: legacy.debug,
            server,
            session: Session {
                secret: legacy.session.secret,
                ..Session::default()
            },
            jwt: Jwt {
                secret: legacy.jwt.secret,
                exp: legacy.jwt.expire,
            },
            db: Db {
                driver: legacy.database.driver,
                dsn: legacy.database.datasource,
                max_open_conns: legacy.database.max_open_conns,
                max_idle_conns: legacy.database.max_idle_conns,
            },
            api_client: legacy.api_client,
        }
    }
}

/// Expand `{{ env "NAME" "default" }}` actions.
///
/// The default is used when the variable is unset or empty and may be
/// omitted (empty string).
pub fn expand_env(text: &str) -> crate::Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::Config("Unclosed template action".into()))?;
        out.push_str(&eval_action(after[..end].trim())?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

fn eval_action(action: &str) -> crate::Result<String> {
    let args = action
        .strip_prefix("env")
        .filter(|a| a.starts_with(char::is_whitespace))
        .ok_or_else(|| Error::Config(format!("Unknown template action: {action}")))?;
    let args = parse_quoted(args)?;

    let (name, default) = match args.as_slice() {
        [name] => (name.as_str(), ""),
        [name, default] => (name.as_str(), default.as_str()),
        _ => {
            return Err(Error::Config(format!(
                "env expects a name and an optional default: {action}"
            )));
        }
    };

    Ok(std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string()))
}

fn parse_quoted(input: &str) -> crate::Result<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = input.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c != '"' {
            return Err(Error::Config(format!(
                "Template arguments must be quoted: {input}"
            )));
        }
        let mut arg = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        arg.push(escaped);
                    }
                }
                '"' => {
                    closed = true;
                    break;
                }
                _ => arg.push(c),
            }
        }
        if !closed {
            return Err(Error::Config(format!("Unterminated string in: {input}")));
        }
        args.push(arg);
    }

    Ok(args)
}

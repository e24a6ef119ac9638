//! Configuration for the jobstream listener.
//!
//! Values come from three layers: built-in defaults, an optional TOML file,
//! and `JOBSTREAM_*` environment variables. Environment variables take
//! precedence over file values and defaults.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Raw, everything-optional shape of the config file.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub transport: Option<TransportSection>,
    #[serde(default)]
    pub topics: Option<TopicsSection>,
    #[serde(default)]
    pub jobs: Option<JobsSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
pub struct TransportSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keep_alive: Option<u64>,
    #[serde(default)]
    pub auto_reconnect: Option<bool>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TopicsSection {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub qos: Option<u8>,
    #[serde(default)]
    pub retain: Option<bool>,
    #[serde(default)]
    pub results_topic: Option<String>,
    #[serde(default)]
    pub error_topic: Option<String>,
    #[serde(default)]
    pub log_topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsSection {
    #[serde(default)]
    pub max_jobs_in_memory: Option<usize>,
    #[serde(default)]
    pub job_cleanup_interval: Option<u64>,
    #[serde(default)]
    pub job_retention: Option<u64>,
    #[serde(default)]
    pub job_id_field: Option<String>,
    #[serde(default)]
    pub allow_job_id_generation: Option<bool>,
    #[serde(default)]
    pub duplicate_action: Option<DuplicateAction>,
    #[serde(default)]
    pub shutdown_grace: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

/// What to do when a message arrives for a job id that already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    Skip,
    Reprocess,
    Error,
}

impl std::fmt::Display for DuplicateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Reprocess => "reprocess",
            Self::Error => "error",
        })
    }
}

impl std::str::FromStr for DuplicateAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "reprocess" => Ok(Self::Reprocess),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::Parse(format!(
                "invalid duplicate_action: {other} (expected skip, reprocess or error)"
            ))),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Concrete listener configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub transport: TransportConfig,
    pub topics: TopicsConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: u64,
    pub auto_reconnect: bool,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicsConfig {
    /// Topic the listener subscribes to.
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    /// Destination for handler outcomes that do not name their own topic.
    pub results_topic: String,
    /// Destination for per-job failure documents.
    pub error_topic: String,
    pub log_topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobsConfig {
    /// Size bound enforced by the cleanup sweeper.
    pub max_jobs_in_memory: usize,
    /// Seconds between sweeper ticks.
    pub job_cleanup_interval: u64,
    /// Seconds a terminal job stays queryable before eviction.
    pub job_retention: u64,
    /// Field in the message document holding the job id.
    pub job_id_field: String,
    pub allow_job_id_generation: bool,
    pub duplicate_action: DuplicateAction,
    /// Seconds in-flight handlers get to finish on shutdown.
    pub shutdown_grace: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "jobstream-listener".to_string(),
                username: None,
                password: None,
                keep_alive: 10,
                auto_reconnect: true,
                connect_timeout_secs: None,
            },
            topics: TopicsConfig {
                topic: "jobs".to_string(),
                qos: 0,
                retain: false,
                results_topic: "jobs/results".to_string(),
                error_topic: "jobs/error".to_string(),
                log_topic: "jobs/log".to_string(),
            },
            jobs: JobsConfig {
                max_jobs_in_memory: 5000,
                job_cleanup_interval: 300,
                job_retention: 259_200,
                job_id_field: "job_id".to_string(),
                allow_job_id_generation: false,
                duplicate_action: DuplicateAction::Skip,
                shutdown_grace: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

/// Load a RawConfigFile from a TOML file.
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    toml::from_str(&s).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load the concrete `Config` from an optional file and the environment.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(t) = raw.transport {
            apply_opt!(cfg.transport.host, t.host);
            apply_opt!(cfg.transport.port, t.port);
            apply_opt!(cfg.transport.client_id, t.client_id);
            apply_opt!(cfg.transport.username, t.username, wrap);
            apply_opt!(cfg.transport.password, t.password, wrap);
            apply_opt!(cfg.transport.keep_alive, t.keep_alive);
            apply_opt!(cfg.transport.auto_reconnect, t.auto_reconnect);
            apply_opt!(
                cfg.transport.connect_timeout_secs,
                t.connect_timeout_secs,
                wrap
            );
        }
        if let Some(t) = raw.topics {
            apply_opt!(cfg.topics.topic, t.topic);
            apply_opt!(cfg.topics.qos, t.qos);
            apply_opt!(cfg.topics.retain, t.retain);
            apply_opt!(cfg.topics.results_topic, t.results_topic);
            apply_opt!(cfg.topics.error_topic, t.error_topic);
            apply_opt!(cfg.topics.log_topic, t.log_topic);
        }
        if let Some(j) = raw.jobs {
            apply_opt!(cfg.jobs.max_jobs_in_memory, j.max_jobs_in_memory);
            apply_opt!(cfg.jobs.job_cleanup_interval, j.job_cleanup_interval);
            apply_opt!(cfg.jobs.job_retention, j.job_retention);
            apply_opt!(cfg.jobs.job_id_field, j.job_id_field);
            apply_opt!(cfg.jobs.allow_job_id_generation, j.allow_job_id_generation);
            apply_opt!(cfg.jobs.duplicate_action, j.duplicate_action);
            apply_opt!(cfg.jobs.shutdown_grace, j.shutdown_grace);
        }
        if let Some(l) = raw.logging {
            apply_opt!(cfg.logging.level, l.level);
            apply_opt!(cfg.logging.json, l.json);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Transport
    if let Some(v) = env_str("JOBSTREAM_TRANSPORT_HOST") {
        cfg.transport.host = v;
    }
    if let Some(v) = env_parse::<u16>("JOBSTREAM_TRANSPORT_PORT")? {
        cfg.transport.port = v;
    }
    if let Some(v) = env_str("JOBSTREAM_CLIENT_ID") {
        cfg.transport.client_id = v;
    }
    if let Some(v) = env_str("JOBSTREAM_TRANSPORT_USERNAME") {
        cfg.transport.username = Some(v);
    }
    if let Some(v) = env_str("JOBSTREAM_TRANSPORT_PASSWORD") {
        cfg.transport.password = Some(v);
    }
    if let Some(v) = env_parse::<u64>("JOBSTREAM_KEEP_ALIVE")? {
        cfg.transport.keep_alive = v;
    }
    if let Some(v) = env_bool("JOBSTREAM_AUTO_RECONNECT")? {
        cfg.transport.auto_reconnect = v;
    }

    // Topics
    if let Some(v) = env_str("JOBSTREAM_TOPIC") {
        cfg.topics.topic = v;
    }
    if let Some(v) = env_parse::<u8>("JOBSTREAM_QOS")? {
        cfg.topics.qos = v;
    }
    if let Some(v) = env_bool("JOBSTREAM_RETAIN")? {
        cfg.topics.retain = v;
    }
    if let Some(v) = env_str("JOBSTREAM_RESULTS_TOPIC") {
        cfg.topics.results_topic = v;
    }
    if let Some(v) = env_str("JOBSTREAM_ERROR_TOPIC") {
        cfg.topics.error_topic = v;
    }
    if let Some(v) = env_str("JOBSTREAM_LOG_TOPIC") {
        cfg.topics.log_topic = v;
    }

    // Jobs
    if let Some(v) = env_parse::<usize>("JOBSTREAM_MAX_JOBS_IN_MEMORY")? {
        cfg.jobs.max_jobs_in_memory = v;
    }
    if let Some(v) = env_parse::<u64>("JOBSTREAM_JOB_CLEANUP_INTERVAL")? {
        cfg.jobs.job_cleanup_interval = v;
    }
    if let Some(v) = env_parse::<u64>("JOBSTREAM_JOB_RETENTION")? {
        cfg.jobs.job_retention = v;
    }
    if let Some(v) = env_str("JOBSTREAM_JOB_ID_FIELD") {
        cfg.jobs.job_id_field = v;
    }
    if let Some(v) = env_bool("JOBSTREAM_ALLOW_JOB_ID_GENERATION")? {
        cfg.jobs.allow_job_id_generation = v;
    }
    if let Some(v) = env_str("JOBSTREAM_DUPLICATE_ACTION") {
        cfg.jobs.duplicate_action = v.parse()?;
    }
    if let Some(v) = env_parse::<u64>("JOBSTREAM_SHUTDOWN_GRACE")? {
        cfg.jobs.shutdown_grace = v;
    }

    // Logging
    if let Some(v) = env_str("JOBSTREAM_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("JOBSTREAM_LOG_JSON")? {
        cfg.logging.json = v;
    }

    Ok(())
}

#[inline]
fn check_publish_topic(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{name} must not be empty")));
    }
    if value.contains('+') || value.contains('#') {
        return Err(ConfigError::Validation(format!(
            "{name} must not contain wildcards: {value}"
        )));
    }
    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.transport.port == 0 {
        return Err(ConfigError::Validation("transport.port must be > 0".into()));
    }
    if cfg.transport.keep_alive == 0 {
        return Err(ConfigError::Validation(
            "transport.keep_alive must be > 0".into(),
        ));
    }

    if cfg.topics.topic.is_empty() {
        return Err(ConfigError::Validation(
            "topics.topic must not be empty".into(),
        ));
    }
    if cfg.topics.qos > 2 {
        return Err(ConfigError::Validation(format!(
            "topics.qos must be 0, 1 or 2, got {}",
            cfg.topics.qos
        )));
    }
    check_publish_topic("topics.results_topic", &cfg.topics.results_topic)?;
    check_publish_topic("topics.error_topic", &cfg.topics.error_topic)?;
    check_publish_topic("topics.log_topic", &cfg.topics.log_topic)?;

    if cfg.jobs.max_jobs_in_memory == 0 {
        return Err(ConfigError::Validation(
            "jobs.max_jobs_in_memory must be > 0".into(),
        ));
    }
    if cfg.jobs.job_cleanup_interval == 0 {
        return Err(ConfigError::Validation(
            "jobs.job_cleanup_interval must be > 0".into(),
        ));
    }
    if cfg.jobs.job_retention == 0 {
        return Err(ConfigError::Validation(
            "jobs.job_retention must be > 0".into(),
        ));
    }
    if cfg.jobs.job_id_field.is_empty() {
        return Err(ConfigError::Validation(
            "jobs.job_id_field must not be empty".into(),
        ));
    }

    Ok(())
}

//! Configuration types for tracksys-enrich
//!
//! Everything is read from `VIRGO4_TRACKSYS_ENRICH_*` environment variables at
//! startup. Missing or malformed required values are reported as
//! [`Error::Config`] naming the offending variable; the binary treats that as
//! fatal.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Largest number of messages the queue accepts in a single batch call
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest long-poll wait the queue accepts, in seconds
pub const MAX_POLL_TIMEOUT_SECS: u64 = 20;

/// Variable naming the bucket that holds oversize queue messages
pub const MESSAGE_BUCKET_VAR: &str = "VIRGO4_SQS_MESSAGE_BUCKET";

const ENV_PREFIX: &str = "VIRGO4_TRACKSYS_ENRICH_";

/// Retry behaviour for outbound HTTP calls
#[derive(Clone, Debug, Serialize)]
pub struct RetryConfig {
    /// Total attempts including the first call (default: 3)
    pub max_attempts: u32,

    /// Fixed sleep between attempts (default: 100ms)
    #[serde(serialize_with = "serialize_millis")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

/// Deployment mode of the Tracksys service
///
/// `Sirsi` serves a JSON directory of catalog keys and multi-part item
/// records; `Pid` serves a comma separated directory and single-part records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Catalog-key records with per-part OCR lookups
    #[default]
    Sirsi,
    /// Legacy single-pid records
    Pid,
}

impl FromStr for ServiceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sirsi" => Ok(ServiceMode::Sirsi),
            "pid" => Ok(ServiceMode::Pid),
            other => Err(Error::config(
                format!("{ENV_PREFIX}MODE"),
                format!("unknown service mode '{other}'"),
            )),
        }
    }
}

/// What to do when a scheduled identifier cache reload fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadFailurePolicy {
    /// Stop processing; wrong membership answers are worse than no answers
    #[default]
    Fatal,
    /// Keep answering from the previous snapshot and try again after another max-age
    ServeStale,
}

impl FromStr for ReloadFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(ReloadFailurePolicy::Fatal),
            "serve-stale" | "serve_stale" | "stale" => Ok(ReloadFailurePolicy::ServeStale),
            other => Err(Error::config(
                format!("{ENV_PREFIX}CACHE_RELOAD_POLICY"),
                format!("unknown reload policy '{other}'"),
            )),
        }
    }
}

/// Tracksys endpoint settings
#[derive(Clone, Debug, Serialize)]
pub struct TracksysConfig {
    /// Base URL of the Tracksys service
    pub service_url: String,

    /// Per-request timeout
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,

    /// Path of the identifier directory endpoint
    pub directory_path: String,

    /// Path of the item detail endpoint
    pub details_path: String,

    /// Path of the per-part detail endpoint
    pub pid_path: String,

    /// Deployment mode
    pub mode: ServiceMode,

    /// Retry behaviour for every call made against the service
    pub retry: RetryConfig,
}

impl TracksysConfig {
    /// URL of the full identifier directory
    pub fn directory_url(&self) -> String {
        join_url(&self.service_url, &self.directory_path)
    }

    /// URL of the detail record for one identifier
    pub fn details_url(&self, id: &str) -> String {
        format!("{}/{}", join_url(&self.service_url, &self.details_path), id)
    }

    /// URL of the detail record for one part
    pub fn pid_url(&self, pid: &str) -> String {
        format!("{}/{}", join_url(&self.service_url, &self.pid_path), pid)
    }
}

/// Identifier cache settings
#[derive(Clone, Debug, Serialize)]
pub struct CacheConfig {
    /// Maximum age of the identifier snapshot before a reload
    #[serde(serialize_with = "serialize_secs")]
    pub max_age: Duration,

    /// Behaviour when a reload fails after startup
    pub reload_failure: ReloadFailurePolicy,
}

/// Metadata cache (blob store) settings; the step is disabled without them
#[derive(Clone, Debug, Serialize)]
pub struct MetadataCacheConfig {
    /// Bucket receiving the metadata documents
    pub bucket: String,
    /// Public root under which the bucket is served
    pub root_url: String,
    /// Root of the OCR service, joined with a pid for OCR candidates
    pub ocr_root: String,
    /// Root of the oEmbed service, joined with a pid
    pub oembed_root: String,
}

/// Main configuration for the enrichment service
#[derive(Clone, Debug, Serialize)]
pub struct Config {
    /// Inbound queue name
    pub in_queue: String,

    /// Outbound queue name
    pub out_queue: String,

    /// Long-poll timeout for inbound reads
    #[serde(serialize_with = "serialize_secs")]
    pub poll_timeout: Duration,

    /// Bucket holding message bodies too large to send inline
    pub message_bucket: String,

    /// Depth of the channel between the poller and the workers
    pub work_queue_size: usize,

    /// Number of batch coordinators
    pub workers: usize,

    /// Messages per flush, capped at [`MAX_BATCH_SIZE`]
    pub batch_size: usize,

    /// Idle time after which a partial batch is flushed
    #[serde(serialize_with = "serialize_secs")]
    pub wait_timeout: Duration,

    /// Tracksys service settings
    pub tracksys: TracksysConfig,

    /// Identifier cache settings
    pub cache: CacheConfig,

    /// Rights service base URL
    pub rights_url: String,

    /// Metadata cache settings (None disables the step)
    pub metadata_cache: Option<MetadataCacheConfig>,

    /// Fields to remove and re-add with a fixed value on every document
    pub rewrite_fields: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let metadata_cache = match env.optional("CONTENT_CACHE_BUCKET") {
            Some(bucket) => Some(MetadataCacheConfig {
                bucket,
                root_url: env.required("CONTENT_CACHE_ROOT")?,
                ocr_root: env.required("OCR_ROOT")?,
                oembed_root: env.required("OEMBED_ROOT")?,
            }),
            None => None,
        };

        let config = Config {
            in_queue: env.required("IN_QUEUE")?,
            out_queue: env.required("OUT_QUEUE")?,
            poll_timeout: env.seconds("QUEUE_POLL_TIMEOUT")?,
            message_bucket: env.shared(MESSAGE_BUCKET_VAR)?,
            work_queue_size: env.number("WORK_QUEUE_SIZE")?,
            workers: env.number("WORKERS")?,
            batch_size: default_batch_size(),
            wait_timeout: default_wait_timeout(),
            tracksys: TracksysConfig {
                service_url: env.required("SERVICE_URL")?,
                timeout: env.seconds("SERVICE_TIMEOUT")?,
                directory_path: env
                    .optional("DIRECTORY_PATH")
                    .unwrap_or_else(default_directory_path),
                details_path: env
                    .optional("DETAILS_PATH")
                    .unwrap_or_else(default_details_path),
                pid_path: env.optional("PID_PATH").unwrap_or_else(default_pid_path),
                mode: env
                    .optional("MODE")
                    .map(|m| m.parse::<ServiceMode>())
                    .transpose()?
                    .unwrap_or_default(),
                retry: RetryConfig::default(),
            },
            cache: CacheConfig {
                max_age: env.seconds("CACHE_AGE")?,
                reload_failure: env
                    .optional("CACHE_RELOAD_POLICY")
                    .map(|p| p.parse::<ReloadFailurePolicy>())
                    .transpose()?
                    .unwrap_or_default(),
            },
            rights_url: env.required("RIGHTS_URL")?,
            metadata_cache,
            rewrite_fields: parse_rewrite_fields(
                &env.optional("REWRITE_FIELDS").unwrap_or_default(),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot run
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config(
                format!("{ENV_PREFIX}WORKERS"),
                "at least one worker is required",
            ));
        }
        if self.work_queue_size == 0 {
            return Err(Error::config(
                format!("{ENV_PREFIX}WORK_QUEUE_SIZE"),
                "work queue size must be non-zero",
            ));
        }
        if self.poll_timeout.as_secs() > MAX_POLL_TIMEOUT_SECS {
            return Err(Error::config(
                format!("{ENV_PREFIX}QUEUE_POLL_TIMEOUT"),
                format!("poll timeout may not exceed {MAX_POLL_TIMEOUT_SECS} seconds"),
            ));
        }
        if self.tracksys.timeout.is_zero() {
            return Err(Error::config(
                format!("{ENV_PREFIX}SERVICE_TIMEOUT"),
                "service timeout must be non-zero",
            ));
        }
        if self.cache.max_age.is_zero() {
            return Err(Error::config(
                format!("{ENV_PREFIX}CACHE_AGE"),
                "cache age must be non-zero",
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config {
                message: "batch size must be non-zero".to_string(),
                key: None,
            });
        }
        url::Url::parse(&self.tracksys.service_url).map_err(|e| {
            Error::config(
                format!("{ENV_PREFIX}SERVICE_URL"),
                format!("invalid URL '{}': {e}", self.tracksys.service_url),
            )
        })?;
        url::Url::parse(&self.rights_url).map_err(|e| {
            Error::config(
                format!("{ENV_PREFIX}RIGHTS_URL"),
                format!("invalid URL '{}': {e}", self.rights_url),
            )
        })?;
        Ok(())
    }

    /// Effective flush size after applying the queue ceiling
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    /// Effective settings as one JSON object
    pub fn summary(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Log every setting once at startup
    pub fn log_summary(&self) {
        match self.summary() {
            Ok(summary) => tracing::info!(config = %summary, "[CONFIG] effective configuration"),
            Err(e) => tracing::warn!(error = %e, "[CONFIG] could not serialize configuration"),
        }
        tracing::info!(
            directory = %self.tracksys.directory_url(),
            batch_size = self.effective_batch_size(),
            "[CONFIG] derived"
        );
    }
}

/// Parse `name=value,name=value` into an ordered map
pub fn parse_rewrite_fields(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(Error::config(
                format!("{ENV_PREFIX}REWRITE_FIELDS"),
                format!("expected name=value, got '{pair}'"),
            ));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::config(
                format!("{ENV_PREFIX}REWRITE_FIELDS"),
                format!("empty field name in '{pair}'"),
            ));
        }
        fields.insert(name.to_string(), value.trim().to_string());
    }
    Ok(fields)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name).ok_or_else(|| {
            Error::config(
                format!("{ENV_PREFIX}{name}"),
                "environment variable not set",
            )
        })
    }

    /// A variable shared with other services, read without the service prefix
    fn shared(&self, name: &str) -> Result<String> {
        (self.lookup)(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::config(name, "environment variable not set"))
    }

    fn number(&self, name: &str) -> Result<usize> {
        let raw = self.required(name)?;
        raw.trim().parse().map_err(|_| {
            Error::config(
                format!("{ENV_PREFIX}{name}"),
                format!("expected a non-negative integer, got '{raw}'"),
            )
        })
    }

    fn seconds(&self, name: &str) -> Result<Duration> {
        self.number(name).map(|n| Duration::from_secs(n as u64))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_directory_path() -> String {
    "api/published/virgo".to_string()
}

fn default_details_path() -> String {
    "api/sirsi".to_string()
}

fn default_pid_path() -> String {
    "api/pid".to_string()
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

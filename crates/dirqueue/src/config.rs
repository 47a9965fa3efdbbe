//! Provider types and configuration.

use crate::error::{ConfigurationError, ValidationError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest visibility timeout accepted by any provider (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

/// Prefix for environment variable overrides, e.g. `DIRQUEUE__PROVIDER__ROOT_DIR`
pub const ENV_PREFIX: &str = "DIRQUEUE";

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    File,
    InMemory,
    AwsSqs,
}

impl ProviderType {
    /// Check if queues can be shared between operating system processes
    pub fn is_shared(&self) -> bool {
        match self {
            Self::File => true,
            Self::InMemory => false,
            Self::AwsSqs => true,
        }
    }

    /// Check if pull order is guaranteed to match push order
    pub fn is_strict_fifo(&self) -> bool {
        match self {
            Self::File => false, // Tail-biased, see FileQueue::pull
            Self::InMemory => true,
            Self::AwsSqs => false, // Standard queues are best-effort ordered
        }
    }
}

/// How the file backend learns about visibility-timeout changes made by
/// other processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Filesystem change notifications with a polling backstop
    #[default]
    Auto,
    /// Polling only
    Poll,
}

/// File backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileQueueConfig {
    /// Directory holding one sub-directory per queue
    pub root_dir: PathBuf,
    /// Character between the handle and the body of a stored record
    pub separator: char,
    /// Visibility timeout written when a queue directory has none yet
    pub default_visibility_timeout_secs: u64,
    /// Back-off between attempts to take the queue lock
    pub lock_retry_interval_ms: u64,
    /// Give up on the queue lock after this long; `None` waits forever
    pub lock_timeout_ms: Option<u64>,
    pub watch_mode: WatchMode,
    pub poll_interval_ms: u64,
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("queues"),
            separator: '|',
            default_visibility_timeout_secs: 10,
            lock_retry_interval_ms: 50,
            lock_timeout_ms: Some(10_000),
            watch_mode: WatchMode::Auto,
            poll_interval_ms: 1_000,
        }
    }
}

impl FileQueueConfig {
    /// Create a configuration rooted at `root_dir` with default settings
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn default_visibility_timeout(&self) -> Duration {
        visibility_timeout_from_secs(self.default_visibility_timeout_secs)
    }

    pub fn lock_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn lock_timeout(&self) -> Option<std::time::Duration> {
        self.lock_timeout_ms.map(std::time::Duration::from_millis)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Check the configuration for values the file backend cannot work with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let separator = self.separator;
        if separator == '\n' || separator == '\r' {
            return Err(ConfigurationError::Invalid {
                message: "separator cannot be a line break".to_string(),
            });
        }

        // Handles are `<digits>_<digits>`; the first separator must follow them
        if separator.is_ascii_digit() || separator == '_' {
            return Err(ConfigurationError::Invalid {
                message: format!("separator '{}' can appear inside handles", separator),
            });
        }

        if self.lock_retry_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "lock_retry_interval_ms must be greater than zero".to_string(),
            });
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }

        check_default_timeout(self.default_visibility_timeout_secs)
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub default_visibility_timeout_secs: u64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout_secs: 10,
        }
    }
}

impl InMemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_default_timeout(self.default_visibility_timeout_secs)
    }

    pub fn default_visibility_timeout(&self) -> Duration {
        visibility_timeout_from_secs(self.default_visibility_timeout_secs)
    }
}

/// AWS SQS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Override for the service endpoint, e.g. a local emulator
    pub endpoint: Option<String>,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    File(FileQueueConfig),
    InMemory(InMemoryConfig),
    AwsSqs(AwsSqsConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::File(FileQueueConfig::default())
    }
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::File(_) => ProviderType::File,
            Self::InMemory(_) => ProviderType::InMemory,
            Self::AwsSqs(_) => ProviderType::AwsSqs,
        }
    }
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
}

impl RuntimeConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Sources are applied in order, later ones overriding earlier ones:
    ///  1. `path`, if given (format taken from the extension)
    ///  2. Environment variables prefixed `DIRQUEUE__`, using `__` between
    ///     keys, e.g. `DIRQUEUE__PROVIDER__ROOT_DIR=/var/lib/queues`
    ///
    /// With no file and no variables the built-in defaults are returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let runtime: RuntimeConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        runtime.validate()?;
        Ok(runtime)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match &self.provider {
            ProviderConfig::File(file) => file.validate(),
            ProviderConfig::InMemory(memory) => memory.validate(),
            ProviderConfig::AwsSqs(aws) if aws.region.is_empty() => {
                Err(ConfigurationError::Missing {
                    key: "provider.region".to_string(),
                })
            }
            ProviderConfig::AwsSqs(_) => Ok(()),
        }
    }
}

/// Convert a visibility timeout into whole seconds
///
/// Timeouts must be non-negative, whole seconds and no longer than
/// [`MAX_VISIBILITY_TIMEOUT_SECS`].
pub fn visibility_timeout_secs(timeout: Duration) -> Result<u64, ValidationError> {
    let in_range = u64::try_from(timeout.num_seconds())
        .is_ok_and(|secs| secs <= MAX_VISIBILITY_TIMEOUT_SECS);
    if timeout < Duration::zero() || !in_range {
        return Err(ValidationError::OutOfRange {
            field: "visibility_timeout".to_string(),
            message: format!("must be 0-{} seconds", MAX_VISIBILITY_TIMEOUT_SECS),
        });
    }

    if timeout.subsec_nanos() != 0 {
        return Err(ValidationError::InvalidFormat {
            field: "visibility_timeout".to_string(),
            message: "must be a whole number of seconds".to_string(),
        });
    }

    Ok(timeout.num_seconds() as u64)
}

/// Convert stored whole seconds back into a visibility timeout
///
/// Values above [`MAX_VISIBILITY_TIMEOUT_SECS`] saturate at the maximum.
pub(crate) fn visibility_timeout_from_secs(secs: u64) -> Duration {
    let secs = i64::try_from(secs.min(MAX_VISIBILITY_TIMEOUT_SECS)).unwrap_or(i64::MAX);
    Duration::try_seconds(secs).unwrap_or(Duration::MAX)
}

fn check_default_timeout(secs: u64) -> Result<(), ConfigurationError> {
    if secs > MAX_VISIBILITY_TIMEOUT_SECS {
        return Err(ConfigurationError::Invalid {
            message: format!(
                "default_visibility_timeout_secs must be at most {}, got {}",
                MAX_VISIBILITY_TIMEOUT_SECS, secs
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

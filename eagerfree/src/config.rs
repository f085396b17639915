//! Environment-driven configuration, read once at load time.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How the intercept routine treats a failed corrective `mprotect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FailurePolicy {
    /// Drop the failure.
    Ignore = 0,
    /// Add it to [`crate::Stats::failures`].
    #[default]
    Count = 1,
    /// Count it and emit a `warn!` record.
    ///
    /// Logging may allocate; only use this when the allocator does not call
    /// `madvise` while holding its own locks.
    Log = 2,
}

impl FailurePolicy {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => FailurePolicy::Ignore,
            2 => FailurePolicy::Log,
            _ => FailurePolicy::Count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown failure policy '{0}' (expected ignore, count or log)")]
pub struct UnknownPolicy(pub String);

impl FromStr for FailurePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" | "off" => Ok(FailurePolicy::Ignore),
            "count" => Ok(FailurePolicy::Count),
            "log" | "warn" => Ok(FailurePolicy::Log),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Ignore => "ignore",
            FailurePolicy::Count => "count",
            FailurePolicy::Log => "log",
        })
    }
}

/// Failure policy for corrective calls: `ignore`, `count` or `log`.
pub const ENV_ON_FAILURE: &str = "EAGERFREE_ON_FAILURE";
/// `env_logger` filter for this crate's records; unset means no logger is installed.
pub const ENV_LOG: &str = "EAGERFREE_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Bad values fall back
    /// to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let failure_policy = match lookup(ENV_ON_FAILURE) {
            None => FailurePolicy::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e: UnknownPolicy| {
                log::warn!("{}: {}, using {}", ENV_ON_FAILURE, e, FailurePolicy::default());
                FailurePolicy::default()
            }),
        };
        Config { failure_policy }
    }
}

/// Install an `env_logger` backend when `EAGERFREE_LOG` is set.
///
/// Uses `try_init`, so an application that already installed a logger keeps it.
pub fn init_logging() {
    let Ok(filter) = std::env::var(ENV_LOG) else {
        return;
    };
    let _ = env_logger::Builder::new().parse_filters(&filter).try_init();
}

//! Resolver configuration.
//!
//! # Responsibility
//! - Hold tunables of the identity resolver.
//! - Resolve them from explicit values, then environment, then defaults.
//!
//! # Invariants
//! - `max_attempts` is always at least 1.
//! - Invalid environment values never fail startup; they fall back to the
//!   default and emit a warning.

use log::warn;

/// Environment variable overriding [`ResolverConfig::max_attempts`].
pub const MAX_ATTEMPTS_ENV: &str = "IDENTITY_MAX_ATTEMPTS";
/// Attempts per `identify` call when nothing else is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Total transaction attempts per call, first try included.
    pub max_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ResolverConfig {
    /// Builds a config with an explicit retry bound, clamped to at least 1.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Reads `IDENTITY_MAX_ATTEMPTS`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::resolve(None, std::env::var(MAX_ATTEMPTS_ENV).ok().as_deref())
    }

    /// Resolves the config with explicit value taking priority over the
    /// environment value.
    pub fn resolve(explicit: Option<u32>, env_value: Option<&str>) -> Self {
        if let Some(max_attempts) = explicit {
            return Self::with_max_attempts(max_attempts);
        }

        match env_value.map(str::trim) {
            None | Some("") => Self::default(),
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => Self::with_max_attempts(value),
                _ => {
                    warn!(
                        "event=config_load module=config status=fallback key={} value={} default={}",
                        MAX_ATTEMPTS_ENV, raw, DEFAULT_MAX_ATTEMPTS
                    );
                    Self::default()
                }
            },
        }
    }
}

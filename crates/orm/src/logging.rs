//! Tracing subscriber setup
//!
//! The record layer only emits `tracing` events; applications that do not
//! install their own subscriber can call [`init`].

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Environment;

/// Default filter directive for an environment when `RUST_LOG` is unset
pub fn default_directive(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "strata_orm=debug",
        Environment::Testing => "strata_orm=warn",
        Environment::Production => "strata_orm=info",
    }
}

/// Install a global fmt subscriber; JSON lines in production. Returns false
/// when a subscriber was already installed.
pub fn init(environment: Environment) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(environment)));

    let result = if environment.is_production() {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directive(Environment::Testing), "strata_orm=warn");
        assert!(default_directive(Environment::Development).ends_with("debug"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init(Environment::Testing);
        assert!(!init(Environment::Testing));
    }
}

//! Startup version reporting
//!
//! The teacher checks npm for newer releases over HTTP; this core has no
//! package registry to check against, so this module only exposes the
//! running version. `AppConfig.update.enabled` still gates whether
//! `app.rs` calls this at startup, preserving the CLI/env toggle.

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the current version string
pub fn current_version() -> &'static str {
    CURRENT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_parses() {
        assert!(!CURRENT_VERSION.is_empty());
    }
}

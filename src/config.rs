/// Application-level constants
pub const APP_NAME: &str = "medchron";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable pointing at a JSON file that overrides `ReconcileConfig` defaults.
pub const CONFIG_ENV_VAR: &str = "MEDCHRON_CONFIG";

/// Log filter used when `RUST_LOG` is not set.
/// Pipeline stages log at info, everything else at warn.
pub fn default_log_filter() -> &'static str {
    "warn,medchron_lib=info,medchron=info"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_medchron() {
        assert_eq!(APP_NAME, "medchron");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn default_filter_enables_crate_info() {
        let filter = default_log_filter();
        assert!(filter.starts_with("warn"));
        assert!(filter.contains("medchron_lib=info"));
    }
}

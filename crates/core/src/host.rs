use std::env;

use tracing::warn;

pub const DISPLAY_NAME_ENV: &str = "NEW_RELIC_PROCESS_HOST_DISPLAY_NAME";

/// Resolves `host.displayName`: env override, then the configured value, then
/// the machine hostname.
pub fn resolve_display_name(configured: Option<&str>) -> String {
    if let Some(name) = non_empty(env::var(DISPLAY_NAME_ENV).ok()) {
        return name;
    }
    if let Some(name) = non_empty(configured.map(str::to_string)) {
        return name;
    }
    system_hostname()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn system_hostname() -> String {
    if let Some(name) = non_empty(env::var("HOSTNAME").ok()) {
        return name;
    }

    #[cfg(unix)]
    match nix::unistd::gethostname() {
        Ok(name) => {
            if let Some(name) = non_empty(name.to_str().map(str::to_string)) {
                return name;
            }
        }
        Err(e) => warn!(error = %e, "failed to read system hostname"),
    }

    warn!("could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

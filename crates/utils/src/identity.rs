//! Identity of the current process: host, user, and operating system

/// Hostname of this machine, or `"unknown"` when it cannot be determined
pub fn hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::debug!("Could not resolve hostname: {e}");
            "unknown".to_string()
        }
    }
}

/// Name of the user running this process
pub fn user_name() -> String {
    whoami::username()
}

/// Operating system and architecture, e.g. `linux x86_64`
pub fn operating_system() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

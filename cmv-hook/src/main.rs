//! cmv-hook - auto-trim hook for the host assistant
//!
//! Registered as the PreCompact / PostToolUse hook command. Reads the hook
//! payload from stdin and trims the transcript in place when warranted.
//! Exits 0 unconditionally; a hook must never break the host.

fn main() {
    // Logging is best-effort here: a hook without a writable state dir
    // still has to do its job silently.
    let config = cmv_core::Config::load_from_home(&cmv_core::config::cmv_home())
        .unwrap_or_default();
    let _log_guard = cmv_core::logging::init(&config.logging).ok();

    std::process::exit(cmv_core::run_auto_trim_hook());
}

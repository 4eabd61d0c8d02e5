//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=rkdemand::geometry=trace` to watch cache hits.
///
/// # Example
/// ```
/// rkdemand::core::logging::init();
/// log::info!("Demand loading started");
/// ```
pub fn init() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();
}

/// Initialize logging, ignoring the error if a logger is already installed.
///
/// Useful from tests and tools that may run initialization more than once.
pub fn try_init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).is_test(cfg!(test)).try_init();
}

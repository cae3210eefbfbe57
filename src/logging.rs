//! Logger initialisation for the command-line application

use env_logger::Env;
use log::LevelFilter;

/// Initialize the logger with the given [LevelFilter]; `RUST_LOG` takes
/// precedence when it is set.
pub fn initialize_logger(filter: LevelFilter) {
    env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
        .format_target(false)
        .format_timestamp(None)
        .init();
}

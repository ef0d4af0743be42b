//! Logging setup

use log::LevelFilter;

/// Map `-v` count and `--quiet` to a level filter
pub fn level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize env_logger; `RUST_LOG` still refines individual modules
pub fn init(verbose: u8, quiet: bool) {
    env_logger::Builder::new()
        .filter_level(level(verbose, quiet))
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;

use crate::config::LoggingConfig;

// Defaults used when no logging section is configured
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "actor.log";

/// Initializes the global logger with built-in defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Example: `RUST_LOG=info cargo run`
///
/// If `RUST_LOG` is not set, it defaults to `info`.
pub fn init() {
    init_from(&LoggingConfig::default());
}

/// Initializes the global logger from the `logging` config section.
///
/// Should be called once at the very beginning of the process; a second call
/// is a no-op apart from an error line on stderr.
///
/// `RUST_LOG` overrides the configured level. Logs go to the console and to
/// `<log_directory>/<log_file>`.
pub fn init_from(config: &LoggingConfig) {
    let log_dir = if config.log_directory.is_empty() { LOG_DIR } else { &config.log_directory };
    let log_file = if config.log_file.is_empty() { LOG_FILE } else { &config.log_file };

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory at '{}': {}", log_dir, e);
    }

    let log_file_path = format!("{}/{}", log_dir, log_file);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new().level(log_level_filter).level_for("serde", LevelFilter::Warn).level_for("uuid", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            // Use fern's colored formatting
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_config = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
        })
        .chain(fern::log_file(&log_file_path).unwrap_or_else(|e| {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            fern::log_file("/dev/stderr").expect("Failed to open stderr as fallback")
        }));

    base_config
        .chain(console_config) // Log to console
        .chain(file_config) // Log to file
        .apply()
        .unwrap_or_else(|e| {
            eprintln!("Failed to apply logger configuration: {}", e);
        });

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}

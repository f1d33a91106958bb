// Re-export logging functions for convenience.
pub use log::*;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{runtime::ConfigErrors, Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use thiserror::Error;

/// Directory log files are written to.
pub const LOG_DIRECTORY: &str = "./logs";

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("unable to create log file: {0}")]
    File(#[from] std::io::Error),
    #[error("invalid logging configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("a logger was already installed")]
    AlreadyInitialized(#[from] SetLoggerError),
}

/// Initializes logging. Should be called before any other logging functions. Provided
/// `LevelFilter` will remove all logs below the provided level.
pub fn init(filter: LevelFilter) -> Result<(), LogInitError> {
    // Output to console
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
        .build();

    // Output to log file. Name of the file is based on the current time.
    let now = chrono::Local::now();
    let log_file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} - {m}{n}")))
        .build(format!(
            "{}/{}.txt",
            LOG_DIRECTORY,
            now.format("%Y-%m-%d %H-%M-%S")
        ))?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .build(
            Root::builder()
                .appender("log_file")
                .appender("stdout")
                .build(filter),
        )?;

    log4rs::init_config(config)?;

    log_panics::init();

    Ok(())
}

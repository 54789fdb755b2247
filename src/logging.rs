// log4rs setup: console plus a timestamped file under the configured log dir

use std::str::FromStr;

use anyhow::Context;
use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use novagen_config::ServerConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

/// Parse a level name; unknown names fall back to `info`.
pub fn level_filter(name: &str) -> LevelFilter {
    LevelFilter::from_str(name.trim()).unwrap_or(LevelFilter::Info)
}

pub fn setup_logging(config: &ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;
    let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
    let log_path = config.log_dir.join(format!("{timestamp}.log"));

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;
    let console_appender = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let log_config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .appender(Appender::builder().build("console", Box::new(console_appender)))
        .build(
            Root::builder()
                .appender("file")
                .appender("console")
                .build(level_filter(&config.log_level)),
        )
        .context("building log configuration")?;

    log4rs::init_config(log_config).context("installing logger")?;
    Ok(())
}

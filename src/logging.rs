use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

static LOGGER: OnceLock<ChannelLogger> = OnceLock::new();

const LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Forwards log records to subscribers (a UI log panel) and mirrors them to stderr
pub struct ChannelLogger {
    level: Level,
    sender: broadcast::Sender<LogMessage>,
}

impl ChannelLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { level, sender }
    }

    /// Installs the logger globally. Fails if another logger is already set.
    pub fn init(level: Level) -> Result<&'static ChannelLogger, SetLoggerError> {
        let logger = LOGGER.get_or_init(|| ChannelLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))?;
        Ok(logger)
    }

    /// The installed logger, if [`ChannelLogger::init`] succeeded
    pub fn installed() -> Option<&'static ChannelLogger> {
        LOGGER.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    fn emit_log(&self, record: &Record) {
        // No subscribers is normal before a UI attaches.
        let _ = self.sender.send(LogMessage::from_record(record));
    }
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Sets up logging: the channel logger when possible, env_logger otherwise
pub fn init_logging(level: Level) {
    if ChannelLogger::init(level).is_err() {
        let _ = env_logger::builder()
            .filter_level(level.to_level_filter())
            .try_init();
    }
    log::info!("Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn forwards_enabled_records() {
        let logger = ChannelLogger::new(Level::Info);
        let mut logs = logger.subscribe();

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .args(format_args!("Connected to {}", "AA:BB"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("filtered"))
                .build(),
        );

        let message = logs.try_recv().unwrap();
        assert_eq!(message.level, "INFO");
        assert_eq!(message.message, "Connected to AA:BB");
        assert!(logs.try_recv().is_err());
    }
}

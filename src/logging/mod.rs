use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_term::{FullFormat, TermDecorator};

/// Configuration for setting up the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    async_buffer_size: usize,
    use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: 1024,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    /// Small uncolored drain, suitable for test output.
    pub fn quiet() -> Self {
        Self {
            async_buffer_size: 128,
            use_color: false,
        }
    }
}

/// Sets up a logger with configurable options
pub fn setup_logger(config: LoggerConfig) -> Logger {
    let decorator = {
        let builder = TermDecorator::new();
        let builder = if config.use_color {
            builder.force_color()
        } else {
            builder
        };
        builder.build()
    };

    let drain = FullFormat::new(decorator).build().fuse();

    let drain = Async::new(drain)
        .chan_size(config.async_buffer_size)
        .build()
        .fuse();

    Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_logger_emits_without_panicking() {
        let logger = setup_logger(LoggerConfig::quiet());
        slog::info!(logger, "logger smoke test"; "component" => "tests");
    }

    #[test]
    fn child_loggers_inherit_the_drain() {
        let root = setup_logger(LoggerConfig::quiet());
        let child = root.new(o!("component" => "child"));
        slog::debug!(child, "child logger smoke test");
    }
}

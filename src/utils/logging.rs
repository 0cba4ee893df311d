//! Logging Module
//!
//! Structured logging with the `tracing` crate, plus small progress helpers for
//! the two long-running stages of the pipeline: the feature-extraction pass and
//! classifier training.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
    /// Let `RUST_LOG` override `level` when it is set
    pub respect_env: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
            respect_env: true,
        }
    }
}

impl LogConfig {
    /// Verbose config: per-image and per-batch detail
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ..Self::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Returns an error message if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if config.respect_env && !directives.is_empty() => {
            EnvFilter::new(directives)
        }
        _ => EnvFilter::new(config.level.to_string()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Progress logger for the per-image feature-extraction pass
pub struct ProgressLogger {
    operation: String,
    total: usize,
    current: usize,
    log_interval: usize,
    start_time: Instant,
}

impl ProgressLogger {
    /// Create a new progress logger that reports roughly every 10%
    pub fn new(operation: &str, total: usize) -> Self {
        Self {
            operation: operation.to_string(),
            total,
            current: 0,
            log_interval: (total / 10).max(1),
            start_time: Instant::now(),
        }
    }

    /// Create with custom log interval
    pub fn with_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    /// Number of items reported so far
    pub fn current(&self) -> usize {
        self.current
    }

    /// Increment progress by 1
    pub fn increment(&mut self) {
        self.current += 1;

        if self.current % self.log_interval == 0 || self.current == self.total {
            let percentage = 100.0 * self.current as f64 / self.total.max(1) as f64;
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let items_per_sec = if elapsed > 0.0 {
                self.current as f64 / elapsed
            } else {
                0.0
            };

            let eta = if items_per_sec > 0.0 {
                let remaining = self.total.saturating_sub(self.current);
                format!("{:.0}s", remaining as f64 / items_per_sec)
            } else {
                "N/A".to_string()
            };

            tracing::info!(
                "{}: {}/{} ({:.1}%) - {:.1} items/s - ETA: {}",
                self.operation,
                self.current,
                self.total,
                percentage,
                items_per_sec,
                eta
            );
        }
    }

    /// Log completion
    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();

        tracing::info!(
            "{}: completed {} of {} items in {:.2}s",
            self.operation,
            self.current,
            self.total,
            elapsed
        );
    }
}

/// Epoch-level logger for classifier training
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its training metrics
    pub fn end_epoch(&self, loss: f64, accuracy: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {:.2}s | Loss: {:.4} | Acc: {:.2}% | ETA: {:.0}s",
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            loss,
            accuracy * 100.0,
            eta_secs
        );
    }

    /// Log training completion
    pub fn log_complete(&self, final_accuracy: f64) {
        let total_time = self.training_start.elapsed();

        tracing::info!(
            "Training complete: {} epochs in {:.1}s | Final accuracy: {:.2}%",
            self.total_epochs,
            total_time.as_secs_f64(),
            final_accuracy * 100.0
        );
    }
}

//! Stderr logging for the control loop and the CLI.
//!
//! Records print as `[  12.345s  WARN fieldbot] message`, timed from logger
//! installation so lines can be matched against frame timestamps.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

/// Environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "FIELDBOT_LOG";

struct FrameClockLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for FrameClockLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let crate_name = record.target().split("::").next().unwrap_or_default();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {crate_name}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<FrameClockLogger> = OnceLock::new();

/// Install the stderr logger. Only the first call has an effect.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| FrameClockLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install the stderr logger at the level named by `FIELDBOT_LOG`
/// (`off`, `error` .. `trace`), falling back to `default`.
pub fn init_from_env(default: LevelFilter) -> Result<(), log::SetLoggerError> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| parse_level(&v))
        .unwrap_or(default);
    init_with_level(level)
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(value.trim()).ok()
}

/// Output layout of [`init_tracing`].
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    /// Human readable, uptime timestamps, span close events.
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Install a `tracing` fmt subscriber on stderr. `RUST_LOG` overrides the
/// default of `info` for the fieldbot crates.
#[cfg(feature = "tracing")]
pub fn init_tracing(format: TraceFormat) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("fieldbot=info,fieldbot_core=info,fieldbot_tracker=info,fieldbot_nav=info")
    });
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    let _ = match format {
        TraceFormat::Compact => builder
            .compact()
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
        TraceFormat::Json => builder
            .json()
            .with_current_span(true)
            .flatten_event(true)
            .finish()
            .try_init(),
    };
}

//! Stderr logging for the registration pipeline.
//!
//! Records from the `wsireg*` crates pass at the requested level; records
//! from dependencies are capped at `warn`. Lines look like
//! `[  1.234s  WARN wsireg_prealign] message`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const CRATE_PREFIX: &str = "wsireg";

struct PipelineLogger {
    level: LevelFilter,
    started: Instant,
}

impl PipelineLogger {
    fn limit_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(CRATE_PREFIX) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

fn format_line(
    elapsed_s: f64,
    level: Level,
    target: &str,
    message: &std::fmt::Arguments,
) -> String {
    let origin = target.split("::").next().unwrap_or_default();
    format!("[{elapsed_s:7.3}s {level:>5} {origin}] {message}")
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.limit_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<PipelineLogger> = OnceLock::new();

/// Install the stderr logger with the given level filter.
///
/// Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| PipelineLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber honouring `RUST_LOG` (default
/// `wsireg=info`). Span close events carry the time spent in each stage.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{CRATE_PREFIX}=info")));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    if json {
        let _ = builder.json().flatten_event(true).finish().try_init();
    } else {
        let _ = builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

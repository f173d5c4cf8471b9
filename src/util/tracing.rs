//! Log output setup
// (c) 2024 Ross Younger

use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
};

use anyhow::Context as _;
use indicatif::MultiProgress;
use serde::{Deserialize, Serialize, de};
use strum::VariantNames as _;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{
        MakeWriter,
        format::Writer,
        time::{ChronoLocal, ChronoUtc, FormatTime},
    },
    prelude::*,
};

use crate::cli::styles::{maybe_strip_color, use_colours};
use crate::client::Parameters;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Console filter, unless overridden by the environment
const CONSOLE_FILTER_VAR: &str = "RUST_LOG";
/// Log file filter; falls back to the console filter
const FILE_FILTER_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Selects the format of time stamps in log lines
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "kebab-case")]
pub enum TimeFormat {
    /// Local time, as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC, as "year-month-day HH:MM:SS"
    Utc,
    /// Local time in [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339) format, with sub-second precision
    Rfc3339,
}

impl<'de> Deserialize<'de> for TimeFormat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s.to_ascii_lowercase())
            .map_err(|_| de::Error::unknown_variant(&s, TimeFormat::VARIANTS))
    }
}

/// The chrono timer behind each [`TimeFormat`]
enum Timestamps {
    Local(ChronoLocal),
    Utc(ChronoUtc),
}

impl From<TimeFormat> for Timestamps {
    fn from(format: TimeFormat) -> Self {
        match format {
            TimeFormat::Local => Self::Local(ChronoLocal::new("%Y-%m-%d %H:%M:%SL".into())),
            TimeFormat::Utc => Self::Utc(ChronoUtc::new("%Y-%m-%d %H:%M:%SZ".into())),
            TimeFormat::Rfc3339 => Self::Local(ChronoLocal::rfc_3339()),
        }
    }
}

impl FormatTime for Timestamps {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        match self {
            Self::Local(t) => t.format_time(w),
            Self::Utc(t) => t.format_time(w),
        }
    }
}

/// Where console log lines go
pub(crate) enum ConsoleTraceType {
    /// Straight to stderr (server mode)
    Standard,
    /// Printed above the load generator's progress bar, so it doesn't get torn
    Indicatif(MultiProgress),
    /// Nowhere
    #[allow(dead_code)] // used by tests
    None,
}

/// How to log, as decided by the command line and configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogSettings {
    /// Level for our own events when no filter is set in the environment
    pub(crate) level: &'static str,
    /// Also log to this file
    pub(crate) log_file: Option<PathBuf>,
    pub(crate) time_format: TimeFormat,
    /// Colourise console output
    pub(crate) ansi: bool,
}

impl LogSettings {
    pub(crate) fn new(params: &Parameters, time_format: TimeFormat) -> Self {
        let level = if params.debug {
            "debug"
        } else if params.quiet {
            "error"
        } else {
            "info"
        };
        Self {
            level,
            log_file: params.log_file.as_ref().map(PathBuf::from),
            time_format,
            ansi: use_colours(),
        }
    }
}

/// A filter and whether it was taken from the environment.
///
/// An environment filter may admit other crates' events, so those lines show their target.
struct ChosenFilter {
    filter: EnvFilter,
    from_env: bool,
}

impl ChosenFilter {
    /// Takes the filter from `var` if set, otherwise logs our own events at `level`
    fn select(var: &str, level: &str) -> anyhow::Result<Self> {
        if let Ok(directives) = std::env::var(var) {
            let filter = EnvFilter::try_new(directives)
                .with_context(|| format!("{var} (set in environment) was not understood"))?;
            return Ok(Self {
                filter,
                from_env: true,
            });
        }
        Ok(Self {
            filter: EnvFilter::try_new(format!("copybench={level}"))?,
            from_env: false,
        })
    }

    fn layer<W>(
        self,
        writer: W,
        time_format: TimeFormat,
        ansi: bool,
    ) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(self.from_env)
            .with_thread_names(true)
            .with_ansi(ansi)
            .with_timer(Timestamps::from(time_format))
            .with_writer(writer)
            .with_filter(self.filter)
            .boxed()
    }
}

/// Installs the global subscriber: console output (possibly via a progress display) and
/// optionally a log file.
///
/// By default only this crate's events are shown, at the level in `settings`.
/// `RUST_LOG` overrides that for the console, and `RUST_LOG_FILE_DETAIL` for the file.
///
/// Only the first call in a process has any effect. If it fails, nothing is installed and
/// the caller must report the error some other way.
pub(crate) fn setup(settings: &LogSettings, console: ConsoleTraceType) -> anyhow::Result<()> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        tracing::warn!("logging was already set up (ignoring)");
        return Ok(());
    }
    let layers = build_layers(settings, console)?;
    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

fn build_layers(
    settings: &LogSettings,
    console: ConsoleTraceType,
) -> anyhow::Result<Vec<Box<dyn Layer<Registry> + Send + Sync>>> {
    let mut layers = Vec::new();
    let chosen = ChosenFilter::select(CONSOLE_FILTER_VAR, settings.level)?;
    match console {
        ConsoleTraceType::None => (),
        ConsoleTraceType::Standard => {
            layers.push(chosen.layer(std::io::stderr, settings.time_format, settings.ansi));
        }
        ConsoleTraceType::Indicatif(display) => layers.push(chosen.layer(
            Mutex::new(ProgressLines(display)),
            settings.time_format,
            settings.ansi,
        )),
    }

    if let Some(path) = &settings.log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let var = if std::env::var(FILE_FILTER_VAR).is_ok() {
            FILE_FILTER_VAR
        } else {
            CONSOLE_FILTER_VAR
        };
        let chosen = ChosenFilter::select(var, settings.level)?;
        layers.push(chosen.layer(Arc::new(file), settings.time_format, false));
    }
    Ok(layers)
}

/// Whether [`setup`] has run
pub(crate) fn is_initialized() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

/// Routes log lines through a `MultiProgress` so they appear above the bars
struct ProgressLines(MultiProgress);

impl Write for ProgressLines {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = std::str::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let text = maybe_strip_color(text);
        if self.0.is_hidden() {
            eprint!("{text}");
        } else {
            self.0.println(text.trim_end())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

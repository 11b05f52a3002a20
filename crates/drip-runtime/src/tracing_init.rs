use std::fmt::{self as stdfmt, Write as _};
use std::path::Path;

use anyhow::{Context, Result};
use drip_config::{LogFormat, LoggingConfig};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, FormattedFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// DomainFormat
// ---------------------------------------------------------------------------

/// Plain-text event format with the `domain` field lifted into a prefix:
///
/// ```text
/// 2026-02-21T01:17:14Z  INFO [eval] walk complete rule="welcome" offsets=3
/// ```
///
/// Events without a domain (dependencies, `log` records) get no prefix.
struct DomainFormat;

impl<S, N> FormatEvent<S, N> for DomainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'w> FormatFields<'w> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let ansi = writer.has_ansi_escapes();

        if SystemTime.format_time(&mut writer).is_err() {
            writer.write_str("<unknown time>")?;
        }

        let level = *event.metadata().level();
        if ansi {
            write!(writer, " \x1b[{}m{level:>5}\x1b[0m ", level_color(level))?;
        } else {
            write!(writer, " {level:>5} ")?;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        if let Some(domain) = &fields.domain {
            write!(writer, "[{domain}] ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}{{", span.name())?;
                if let Some(formatted) = span.extensions().get::<FormattedFields<N>>() {
                    write!(writer, "{formatted}")?;
                }
                writer.write_str("}: ")?;
            }
        }

        writer.write_str(&fields.message)?;
        if !fields.rest.is_empty() {
            write!(writer, " {}", fields.rest)?;
        }
        writeln!(writer)
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "31",
        Level::WARN => "33",
        Level::INFO => "32",
        Level::DEBUG => "34",
        Level::TRACE => "35",
    }
}

/// Splits an event into domain, message and the remaining `k=v` pairs.
#[derive(Default)]
struct EventFields {
    domain: Option<String>,
    message: String,
    rest: String,
}

impl EventFields {
    fn push(&mut self, name: &str, value: stdfmt::Arguments<'_>) {
        if !self.rest.is_empty() {
            self.rest.push(' ');
        }
        write!(self.rest, "{name}={value}").ok();
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.push(name, format_args!("{value:?}")),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => self.domain = Some(format!("{value:?}").trim_matches('"').to_string()),
            "message" => {
                write!(self.message, "{value:?}").ok();
            }
            name => self.push(name, format_args!("{value:?}")),
        }
    }
}

/// Separate field formatter for the file layer so span fields cached by the
/// (possibly ANSI) stderr layer are not reused in the file.
#[derive(Default)]
struct FileFields(DefaultFields);

impl<'w> FormatFields<'w> for FileFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'w>,
        fields: R,
    ) -> stdfmt::Result {
        self.0.format_fields(writer, fields)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(DomainFormat)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .fmt_fields(FileFields::default())
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(DomainFormat)
            .fmt_fields(FileFields::default())
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Build the filter: `RUST_LOG` when set, otherwise the config directives.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }
    let directives = config.directives();
    EnvFilter::try_new(&directives).with_context(|| format!("invalid log filter {directives:?}"))
}

/// Install the global subscriber: stderr always, plus a non-blocking file
/// writer when `logging.file` is set (relative to `base_dir`).
///
/// Hold the returned guard until exit; dropping it flushes the file writer.
/// `log` records from library crates are bridged by `tracing-subscriber`.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;
    let mut layers: Vec<BoxedLayer> = vec![stderr_layer(config.format)];
    let mut guard = None;

    if let Some(file) = &config.file {
        let path = if file.is_relative() {
            base_dir.join(file)
        } else {
            file.clone()
        };
        let dir = path
            .parent()
            .context("log file path has no parent directory")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        let name = path.file_name().context("log file path has no file name")?;

        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        layers.push(file_layer(config.format, writer));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("tracing subscriber already installed")?;
    Ok(guard)
}

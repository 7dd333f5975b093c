pub mod error;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod request;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use jiff::tz::TimeZone;
use tracing::Level;

pub use crate::error::{ConfigError, Error, ExtractError, FetchError, OutputError};
pub use crate::extract::{Row, TRAILING_FOOTER_ROWS, extract_rows};
pub use crate::fetch::{Downloader, Fetch, HISTORICAL_DATA_URL, HttpFetcher};
pub use crate::output::{DateStyle, Format, Tick};
pub use crate::request::{DateRange, FetchRequest, Interval, Pair, RequestDate};

/// Download historical exchange rates from investing.com and print them as CSV.
///
/// Columns are date, close, open, high and low. Dates default to the five years ending today
/// in Japan Standard Time.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Currency pair label, e.g. USD/JPY
    #[arg(short, long, default_value = "USD/JPY")]
    pub pair: String,
    /// Sampling interval
    #[arg(short = 'u', long, value_enum, default_value_t = Interval::Daily)]
    pub tick_unit: Interval,
    /// Begin date of the history (format: YYYY/MM/DD)
    #[arg(short, long, value_name = "DATE")]
    pub begin_date: Option<String>,
    /// End date of the history (format: YYYY/MM/DD)
    #[arg(short, long, value_name = "DATE")]
    pub end_date: Option<String>,

    /// Print dates as ISO 8601 local time instead of unix seconds
    #[arg(short, long)]
    pub iso_date: bool,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Csv)]
    pub format: Format,

    /// Where the HTML comes from
    #[arg(short, long, value_enum, default_value_t = Source::Downloader)]
    pub source: Source,
    /// Downloader script, run with --interpreter
    #[arg(long, env = "FX_HISTORY_DOWNLOADER", default_value = "download-coded.zsh")]
    pub downloader: PathBuf,
    /// Program that runs the downloader script
    #[arg(long, env = "FX_HISTORY_INTERPRETER", default_value = "zsh")]
    pub interpreter: String,
    /// Give up on the fetch after this many seconds (default: wait forever)
    #[arg(long, env = "FX_HISTORY_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Historical data endpoint used by --source http
    #[arg(long, env = "FX_HISTORY_ENDPOINT", default_value = HISTORICAL_DATA_URL)]
    pub endpoint: String,

    /// Log level for messages on stderr
    #[arg(short, long, env = "FX_HISTORY_LOG", default_value_t = Level::WARN)]
    pub log_level: Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// External downloader script (stdout is the document)
    Downloader,
    /// Direct POST to the provider
    Http,
}

impl Cli {
    /// Validate the arguments into a request. Missing dates fall back to the default window.
    pub fn request(&self) -> Result<FetchRequest, ConfigError> {
        let window = DateRange::default_window();
        let begin = self
            .begin_date
            .clone()
            .unwrap_or_else(|| window.begin.to_string());
        let end = self
            .end_date
            .clone()
            .unwrap_or_else(|| window.end.to_string());

        FetchRequest::new(&self.pair, &begin, &end, Some(self.tick_unit))
    }

    pub fn date_style(&self) -> DateStyle {
        if self.iso_date {
            DateStyle::Iso(TimeZone::system())
        } else {
            DateStyle::Raw
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn fetcher(&self) -> Box<dyn Fetch> {
        match self.source {
            Source::Downloader => Box::new(
                Downloader::new(&self.interpreter, &self.downloader).with_timeout(self.timeout()),
            ),
            Source::Http => Box::new(HttpFetcher::new(&self.endpoint, self.timeout())),
        }
    }
}

/// Fetch one request and extract its table.
pub fn retrieve_rows<F: Fetch + ?Sized>(
    fetcher: &F,
    request: &FetchRequest,
) -> Result<Vec<Row>, Error> {
    let html = fetcher.fetch(request)?;
    Ok(extract_rows(&html)?)
}

/// Validate `args`, fetch through `fetcher` and write the result to `out`.
///
/// Nothing is fetched or written when the arguments are invalid.
pub fn export<F: Fetch + ?Sized, W: Write>(args: &Cli, fetcher: &F, out: W) -> Result<(), Error> {
    let request = args.request()?;
    let rows = retrieve_rows(fetcher, &request)?;
    output::write(out, args.format, &rows, &args.date_style())?;
    Ok(())
}

pub fn run<W: Write>(args: &Cli, out: W) -> Result<(), Error> {
    export(args, args.fetcher().as_ref(), out)
}

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use jiff::civil::Date;
use jiff::tz::{self, TimeZone};
use jiff::{ToSpan, Zoned};
use regex::Regex;

use crate::error::ConfigError;

static DATE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4})/([0-9]{2})/([0-9]{2})$").expect("date shape pattern is valid")
});

/// Currency pairs known to the provider, keyed by their numeric instrument id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pair {
    EurUsd,
    GbpUsd,
    UsdJpy,
    EurJpy,
    ChfJpy,
    AudJpy,
    BrlJpy,
}

impl Pair {
    pub const ALL: [Pair; 7] = [
        Pair::EurUsd,
        Pair::GbpUsd,
        Pair::UsdJpy,
        Pair::EurJpy,
        Pair::ChfJpy,
        Pair::AudJpy,
        Pair::BrlJpy,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::EurUsd => "EUR/USD",
            Self::GbpUsd => "GBP/USD",
            Self::UsdJpy => "USD/JPY",
            Self::EurJpy => "EUR/JPY",
            Self::ChfJpy => "CHF/JPY",
            Self::AudJpy => "AUD/JPY",
            Self::BrlJpy => "BRL/JPY",
        }
    }

    /// Instrument id expected in the provider's `curr_id` field
    pub const fn id(self) -> u32 {
        match self {
            Self::EurUsd => 1,
            Self::GbpUsd => 2,
            Self::UsdJpy => 3,
            Self::EurJpy => 9,
            Self::ChfJpy => 13,
            Self::AudJpy => 49,
            Self::BrlJpy => 1513,
        }
    }
}

impl FromStr for Pair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::ALL
            .into_iter()
            .find(|pair| pair.label() == s)
            .ok_or_else(|| ConfigError::UnknownPair {
                label: s.to_string(),
            })
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sampling granularity of the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Interval {
    #[value(name = "Daily", alias = "daily")]
    Daily,
    #[value(name = "Weekly", alias = "weekly")]
    Weekly,
    #[value(name = "Monthly", alias = "monthly")]
    Monthly,
}

impl Interval {
    /// Label sent as `interval_sec`
    pub const fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }

    /// Downloader switch, the lower-cased initial of the label
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Daily => "-d",
            Self::Weekly => "-w",
            Self::Monthly => "-m",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Daily, Self::Weekly, Self::Monthly]
            .into_iter()
            .find(|interval| interval.label() == label)
    }
}

/// A calendar date written as `YYYY/MM/DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestDate(Date);

impl RequestDate {
    /// Validates both the textual shape and that the date exists.
    ///
    /// `field` names the argument in error messages.
    pub fn parse(field: &'static str, text: &str) -> Result<Self, ConfigError> {
        let caps = DATE_SHAPE
            .captures(text)
            .ok_or_else(|| ConfigError::MalformedDate {
                field,
                value: text.to_string(),
            })?;
        let invalid = || ConfigError::InvalidDate {
            field,
            value: text.to_string(),
        };

        // The shape guarantees 4 and 2 digit runs, so these never overflow
        let year: i16 = caps[1].parse().map_err(|_| invalid())?;
        let month: i8 = caps[2].parse().map_err(|_| invalid())?;
        let day: i8 = caps[3].parse().map_err(|_| invalid())?;
        Date::new(year, month, day)
            .map(RequestDate)
            .map_err(|_| invalid())
    }

    pub fn date(self) -> Date {
        self.0
    }
}

impl From<Date> for RequestDate {
    fn from(date: Date) -> Self {
        RequestDate(date)
    }
}

impl fmt::Display for RequestDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.strftime("%Y/%m/%d"))
    }
}

/// Default history window used when no dates are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub begin: RequestDate,
    pub end: RequestDate,
}

impl DateRange {
    /// `years` whole years ending on `today`. A Feb 29 start is clamped to Feb 28.
    pub fn trailing_years(today: Date, years: i16) -> Self {
        DateRange {
            begin: today.saturating_sub(years.years()).into(),
            end: today.into(),
        }
    }

    /// Five years ending today, as seen from Japan Standard Time.
    pub fn default_window() -> Self {
        let jst = TimeZone::fixed(tz::offset(9));
        Self::trailing_years(Zoned::now().with_time_zone(jst).date(), 5)
    }
}

/// A validated history request, ready to hand to a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub pair: Pair,
    pub begin: RequestDate,
    pub end: RequestDate,
    /// `None` leaves the granularity to the provider's default.
    pub interval: Option<Interval>,
}

impl FetchRequest {
    pub fn new(
        pair: &str,
        begin: &str,
        end: &str,
        interval: Option<Interval>,
    ) -> Result<Self, ConfigError> {
        Ok(FetchRequest {
            begin: RequestDate::parse("begin date", begin)?,
            end: RequestDate::parse("end date", end)?,
            pair: pair.parse()?,
            interval,
        })
    }

    /// Arguments for the external downloader script.
    pub fn downloader_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.pair.label().to_string(),
            "-b".to_string(),
            self.begin.to_string(),
            "-e".to_string(),
            self.end.to_string(),
        ];
        if let Some(interval) = self.interval {
            args.push(interval.flag().to_string());
        }
        args
    }

    /// Form fields for the provider's historical data endpoint.
    pub fn form_payload(&self) -> Vec<(&'static str, String)> {
        let mut payload = vec![
            ("action", "historical_data".to_string()),
            ("curr_id", self.pair.id().to_string()),
            ("st_date", self.begin.to_string()),
            ("end_date", self.end.to_string()),
        ];
        if let Some(interval) = self.interval {
            payload.push(("interval_sec", interval.label().to_string()));
        }
        payload
    }
}

//! Core records shared by the export and upload stages.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use secrecy::SecretString;

use crate::clock::Clock;

/// Date format the bank UI expects in its search fields.
pub const UI_DATE_FMT: &str = "%d/%m/%Y";

/// Extension of the portable export format produced by the bank.
pub const EXPORT_EXTENSION: &str = "ofx";

/// Login credentials for one of the remote systems.
///
/// The password is wrapped so it cannot leak through Debug or logging.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid date range: {from} is after {to}")]
pub struct DateRangeError {
    from: NaiveDate,
    to: NaiveDate,
}

/// Inclusive calendar range for a transaction export.
///
/// Construction fails immediately when `from > to` rather than at use time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DateRangeError> {
        if from > to {
            return Err(DateRangeError { from, to });
        }
        Ok(Self { from, to })
    }

    /// The default export window: the 365 days ending today.
    pub fn last_year(clock: &dyn Clock) -> Self {
        let to = clock.today();
        let from = to.checked_sub_days(Days::new(365)).unwrap_or(to);
        Self { from, to }
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to
    }

    /// Render both endpoints the way the bank's search widget expects them.
    pub fn ui_strings(&self) -> (String, String) {
        (
            self.from.format(UI_DATE_FMT).to_string(),
            self.to.format(UI_DATE_FMT).to_string(),
        )
    }
}

/// Account categories the bank renders with distinct export UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountType {
    HomeLoan,
    CompleteAccess,
    CreditCard,
    Misa,
    Unknown,
}

impl AccountType {
    /// Classify an account by its rendered display name.
    ///
    /// Matching is case-insensitive and by substring; names outside the
    /// vocabulary classify as `Unknown`.
    pub fn classify(display_name: &str) -> Self {
        let name = display_name.to_lowercase();
        if name.contains("home loan") {
            Self::HomeLoan
        } else if name.contains("complete access") {
            Self::CompleteAccess
        } else if name.contains("mastercard platinum") {
            Self::CreditCard
        } else if name.contains("misa") {
            Self::Misa
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HomeLoan => "home-loan",
            Self::CompleteAccess => "complete-access",
            Self::CreditCard => "credit-card",
            Self::Misa => "misa",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home-loan" | "homeloan" => Ok(Self::HomeLoan),
            "complete-access" | "completeaccess" => Ok(Self::CompleteAccess),
            "credit-card" | "creditcard" => Ok(Self::CreditCard),
            "misa" => Ok(Self::Misa),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "unknown account type {other:?} (expected home-loan, complete-access, \
                 credit-card, misa, or unknown)"
            )),
        }
    }
}

/// Brokerage/shares rows have no export capability and are skipped outright.
pub fn is_excluded_category(display_name: &str) -> bool {
    let name = display_name.to_lowercase();
    name.contains("commsec") || name.contains("shares")
}

/// Strip everything but digits from the rendered BSB + account number text.
pub fn normalize_account_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Deterministic artifact name for one account and range:
/// `{id}-{from:YYYYMMDD}-{to:YYYYMMDD}.ofx`.
pub fn export_filename(id: &str, range: &DateRange) -> String {
    format!(
        "{id}-{}-{}.{EXPORT_EXTENSION}",
        range.from_date().format("%Y%m%d"),
        range.to_date().format("%Y%m%d"),
    )
}

/// One account scraped from the rendered portfolio page.
///
/// Records live only for the duration of a session; the files they name are
/// the durable artifact.
#[derive(Debug, Clone)]
pub struct Account {
    /// Normalized digits-only id; dedup key within a discovery pass.
    pub id: String,
    pub display_name: String,
    /// Balance as displayed; kept verbatim for reporting.
    pub balance: String,
    /// Available funds as displayed.
    pub available: String,
    /// Opaque navigation target (href) for the account's transaction page.
    pub navigation_target: String,
    pub account_type: AccountType,
    /// Where the exported file ends up, derived from `(id, DateRange)`.
    pub target_filename: String,
}

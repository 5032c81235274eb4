//! Capability abstraction for driving a rendered web page.
//!
//! Everything above this trait is testable without a browser; the one
//! production implementation lives in [`chrome`].

pub mod chrome;

pub use chrome::ChromeDriver;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// A way of finding an element within the remote UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css {s:?}"),
            Self::XPath(s) => write!(f, "xpath {s:?}"),
        }
    }
}

/// Opaque token for a located element; only the issuing driver can
/// resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("element not found: {locator}")]
    NotFound { locator: String },

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("stale element reference")]
    StaleReference,

    #[error("driver transport error: {0}")]
    Transport(String),
}

impl DriverError {
    /// Whether a bounded retry may succeed where this attempt failed.
    ///
    /// Missing elements, timeouts, and stale references are all symptoms of
    /// a page that has not finished rendering; anything else propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Timeout { .. } | Self::StaleReference
        )
    }
}

/// Commands a remote UI driver must support.
///
/// The driver's notion of "current page" is global mutable state, so one
/// session owns exactly one driver and issues commands strictly
/// sequentially.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Single lookup; absence is an error, not a wait.
    async fn locate(&self, locator: &Locator) -> Result<ElementHandle, DriverError>;

    async fn click(&self, handle: &ElementHandle) -> Result<(), DriverError>;

    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError>;

    /// Choose an option of a select control by its value attribute.
    async fn select_option(&self, handle: &ElementHandle, value: &str) -> Result<(), DriverError>;

    /// Rendered text content of the element.
    async fn text(&self, handle: &ElementHandle) -> Result<String, DriverError>;

    /// An attribute value, or `None` when the attribute is absent.
    async fn attr(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Release the underlying browser. Safe to call more than once.
    async fn quit(&self) -> Result<(), DriverError>;
}

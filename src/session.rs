//! Login/logout state machine for the primary banking session.
//!
//! The controller is the exclusive owner of the browser resource and of the
//! authenticated navigation context (the recorded home URL). Once a session
//! has failed or logged out it cannot be revived; construct a fresh one.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::driver::{DriverError, Locator, UiDriver};
use crate::model::Credentials;
use crate::retry::{wait_for, RetryError, RetryPolicy};

/// NetBank logon entry point.
pub const LOGIN_URL: &str = "https://www.my.commbank.com.au/netbank/Logon/Logon.aspx";

pub mod locators {
    use crate::driver::Locator;

    pub fn username_field() -> Locator {
        Locator::css("#txtMyClientNumber_field")
    }

    pub fn password_field() -> Locator {
        Locator::css("#txtMyPassword_field")
    }

    pub fn submit_button() -> Locator {
        Locator::css("#btnLogon_field")
    }

    /// Present only on authenticated pages, so it doubles as the
    /// landed-successfully marker.
    pub fn logout_link() -> Locator {
        Locator::css("#ctl00_HeaderControl_logOffLink")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    LoggedOut,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("could not locate the {what} within the retry policy")]
    MissingControl {
        what: &'static str,
        #[source]
        source: RetryError,
    },

    #[error("driver error while {stage}")]
    Driver {
        stage: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("session is {state:?}; a fresh session must be constructed")]
    InvalidState { state: SessionState },
}

pub struct SessionController {
    driver: Arc<dyn UiDriver>,
    credentials: Credentials,
    policy: RetryPolicy,
    state: SessionState,
    home_url: Option<String>,
}

impl SessionController {
    pub fn new(driver: Arc<dyn UiDriver>, credentials: Credentials, policy: RetryPolicy) -> Self {
        Self {
            driver,
            credentials,
            policy,
            state: SessionState::Anonymous,
            home_url: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn driver(&self) -> &dyn UiDriver {
        self.driver.as_ref()
    }

    /// The post-login landing URL, once authenticated.
    pub fn home_url(&self) -> Option<&str> {
        self.home_url.as_deref()
    }

    /// Navigate to the logon page, fill in credentials, submit, and record
    /// the landing URL as home.
    pub async fn login(&mut self) -> Result<(), AuthenticationError> {
        if self.state != SessionState::Anonymous {
            return Err(AuthenticationError::InvalidState { state: self.state });
        }
        self.state = SessionState::Authenticating;

        match self.login_inner().await {
            Ok(()) => {
                self.state = SessionState::Authenticated;
                tracing::info!(home = self.home_url.as_deref(), "logged in");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    async fn login_inner(&mut self) -> Result<(), AuthenticationError> {
        let driver = self.driver.as_ref();

        driver
            .navigate(LOGIN_URL)
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "opening the logon page",
                source,
            })?;

        let username = wait_for(driver, &locators::username_field(), &self.policy)
            .await
            .map_err(|source| AuthenticationError::MissingControl {
                what: "username field",
                source,
            })?;
        let password = wait_for(driver, &locators::password_field(), &self.policy)
            .await
            .map_err(|source| AuthenticationError::MissingControl {
                what: "password field",
                source,
            })?;
        let submit = wait_for(driver, &locators::submit_button(), &self.policy)
            .await
            .map_err(|source| AuthenticationError::MissingControl {
                what: "logon button",
                source,
            })?;

        driver
            .send_keys(&username, &self.credentials.username)
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "entering the client number",
                source,
            })?;
        driver
            .send_keys(&password, self.credentials.password.expose_secret())
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "entering the password",
                source,
            })?;
        driver
            .click(&submit)
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "submitting the logon form",
                source,
            })?;

        // The logout control only renders once authentication went through.
        wait_for(driver, &locators::logout_link(), &self.policy)
            .await
            .map_err(|source| AuthenticationError::MissingControl {
                what: "authenticated landing page",
                source,
            })?;

        let home = driver
            .current_url()
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "recording the home URL",
                source,
            })?;
        self.home_url = Some(home);

        Ok(())
    }

    /// Best-effort logout. A timeout here must not mask exports that already
    /// completed, so failures are logged and swallowed.
    pub async fn logout(&mut self) {
        if self.state != SessionState::Authenticated {
            tracing::debug!(state = ?self.state, "skipping logout");
            return;
        }

        let driver = self.driver.as_ref();
        let result = async {
            let link = wait_for(driver, &locators::logout_link(), &self.policy).await?;
            driver
                .click(&link)
                .await
                .map_err(RetryError::Fatal)?;
            Ok::<(), RetryError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.state = SessionState::LoggedOut;
                tracing::info!("logged out");
            }
            Err(err) => {
                self.state = SessionState::Failed;
                tracing::warn!(error = %err, "logout failed; continuing shutdown");
            }
        }
    }

    /// Re-navigate to the recorded home URL to reset to a known UI state
    /// between per-account operations.
    pub async fn return_home(&self) -> Result<(), DriverError> {
        let home = self.home_url.as_deref().ok_or_else(|| {
            DriverError::Transport("no home URL recorded; login has not completed".to_string())
        })?;
        self.driver.navigate(home).await
    }
}

//! Wires the stages together and guarantees the browser is released.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::SecondaryConfig;
use crate::discovery::AccountDiscovery;
use crate::driver::UiDriver;
use crate::export::{ExportController, ExportError};
use crate::model::{AccountType, Credentials, DateRange};
use crate::retry::RetryPolicy;
use crate::session::SessionController;
use crate::upload::{UploadPipeline, UploadReport};

/// Per-account outcomes for one export run. A failed account never stops
/// the batch; it is recorded here instead.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub exported: Vec<PathBuf>,
    pub failures: Vec<(String, ExportError)>,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The primary stage: login, discover, export each account, logout.
pub struct ExportStage {
    driver: Arc<dyn UiDriver>,
    credentials: Credentials,
    range: DateRange,
    work_dir: PathBuf,
    policy: RetryPolicy,
    filter: Option<AccountType>,
    debug: bool,
    file_poll_interval: Duration,
}

impl ExportStage {
    pub fn new(
        driver: Arc<dyn UiDriver>,
        credentials: Credentials,
        range: DateRange,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            credentials,
            range,
            work_dir: work_dir.into(),
            policy: RetryPolicy::default(),
            filter: None,
            debug: false,
            file_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_filter(mut self, filter: Option<AccountType>) -> Self {
        self.filter = filter;
        self
    }

    /// When set, a failed run leaves the session and browser open so the
    /// page can be inspected.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_file_poll_interval(mut self, interval: Duration) -> Self {
        self.file_poll_interval = interval;
        self
    }

    pub async fn run(self) -> Result<ExportReport> {
        let driver = self.driver.clone();
        let mut session =
            SessionController::new(driver.clone(), self.credentials.clone(), self.policy);

        let outcome = self.stage_inner(&mut session).await;

        let failed = match &outcome {
            Ok(report) => !report.is_success(),
            Err(_) => true,
        };
        if self.debug && failed {
            tracing::warn!("debug mode: leaving the session and browser open for inspection");
        } else {
            session.logout().await;
            if let Err(err) = driver.quit().await {
                tracing::warn!(error = %err, "failed to release the browser");
            }
        }

        outcome
    }

    async fn stage_inner(&self, session: &mut SessionController) -> Result<ExportReport> {
        session.login().await.context("login to the bank failed")?;

        let accounts = AccountDiscovery::new(session.driver(), self.policy, self.range)
            .discover(self.filter)
            .await
            .context("account discovery failed")?;
        if accounts.is_empty() {
            tracing::warn!("no accounts discovered; nothing to export");
        }

        let exporter = ExportController::new(
            session.driver(),
            self.policy,
            self.range,
            self.work_dir.clone(),
        )
        .with_file_poll_interval(self.file_poll_interval);

        let mut report = ExportReport::default();
        for account in &accounts {
            match exporter.export_account(account).await {
                Ok(path) => report.exported.push(path),
                Err(err) => {
                    tracing::error!(
                        account = %account.id,
                        error = %err,
                        "export failed; continuing with the remaining accounts"
                    );
                    report.failures.push((account.id.clone(), err));
                }
            }

            // Reset to a known UI state before the next account.
            session
                .return_home()
                .await
                .context("could not return to the home page")?;
        }

        Ok(report)
    }
}

/// The secondary stage: log in to the import target and upload whatever
/// export files are on disk.
pub struct UploadStage {
    driver: Arc<dyn UiDriver>,
    secondary: SecondaryConfig,
    work_dir: PathBuf,
    policy: RetryPolicy,
}

impl UploadStage {
    pub fn new(
        driver: Arc<dyn UiDriver>,
        secondary: SecondaryConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            secondary,
            work_dir: work_dir.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(self) -> Result<UploadReport> {
        let pipeline = UploadPipeline::new(
            self.driver.clone(),
            self.secondary.base_url.clone(),
            self.secondary.credentials(),
            self.work_dir.clone(),
        )
        .with_policy(self.policy);

        let outcome = async {
            pipeline
                .login()
                .await
                .context("login to the import target failed")?;
            let report = pipeline
                .upload_all()
                .await
                .context("scanning for export files failed")?;
            pipeline.logout().await;
            Ok(report)
        }
        .await;

        if let Err(err) = self.driver.quit().await {
            tracing::warn!(error = %err, "failed to release the browser");
        }

        outcome
    }
}

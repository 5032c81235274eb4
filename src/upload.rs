//! Uploads exported OFX files into the secondary ledger application.
//!
//! The pipeline is deliberately decoupled from the export run: it operates
//! on whatever matching files exist in the working directory at invocation
//! time, so files left behind by a crashed run are picked up on the next.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::driver::{DriverError, Locator, UiDriver};
use crate::model::{Credentials, EXPORT_EXTENSION};
use crate::retry::{wait_for, RetryError, RetryPolicy};
use crate::session::AuthenticationError;

mod locators {
    use crate::driver::Locator;

    // The ledger app's login form carries no ids; positional selection is
    // all its markup offers.
    pub fn username_field() -> Locator {
        Locator::xpath("/html/body//form//fieldset/div[1]/input")
    }

    pub fn password_field() -> Locator {
        Locator::xpath("/html/body//form//fieldset/div[2]/input")
    }

    pub fn submit_button() -> Locator {
        Locator::xpath("/html/body//form//fieldset/input")
    }

    pub fn upload_input() -> Locator {
        Locator::css("#upload")
    }

    pub fn upload_submit() -> Locator {
        Locator::xpath(r#"//*[@id="page-wrapper"]//form//input[@type="submit"]"#)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("could not operate the {what} on the import page")]
    Control {
        what: &'static str,
        #[source]
        source: RetryError,
    },

    #[error("driver error during upload")]
    Driver(#[from] DriverError),

    #[error("filesystem error")]
    Io(#[from] std::io::Error),
}

/// What happened to each file; failures never abort the rest of the batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, UploadError)>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct UploadPipeline {
    driver: Arc<dyn UiDriver>,
    base_url: String,
    credentials: Credentials,
    policy: RetryPolicy,
    work_dir: PathBuf,
}

impl UploadPipeline {
    pub fn new(
        driver: Arc<dyn UiDriver>,
        base_url: impl Into<String>,
        credentials: Credentials,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            base_url: base_url.into(),
            credentials,
            policy: RetryPolicy::default(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    pub async fn login(&self) -> Result<(), AuthenticationError> {
        use secrecy::ExposeSecret;

        let driver = self.driver.as_ref();
        driver
            .navigate(&self.endpoint("login"))
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "opening the import login page",
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
                what: "login button",
                source,
            })?;

        driver
            .send_keys(&username, &self.credentials.username)
            .await
            .map_err(|source| AuthenticationError::Driver {
                stage: "entering the username",
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
                stage: "submitting the login form",
                source,
            })?;

        tracing::info!("logged in to the import target");
        Ok(())
    }

    /// Best-effort; the import target logs out by navigation, and a failure
    /// here must not mask uploads that already succeeded.
    pub async fn logout(&self) {
        if let Err(err) = self.driver.navigate(&self.endpoint("logout")).await {
            tracing::warn!(error = %err, "logout from the import target failed");
        }
    }

    /// Upload every matching file in the working directory, deleting each
    /// local file once its upload succeeds.
    pub async fn upload_all(&self) -> Result<UploadReport, UploadError> {
        let files = self.pending_files()?;
        tracing::info!(count = files.len(), "found files to upload");

        let mut report = UploadReport::default();
        for file in files {
            match self.upload_one(&file).await {
                Ok(()) => match std::fs::remove_file(&file) {
                    Ok(()) => {
                        tracing::info!(file = %file.display(), "uploaded");
                        report.uploaded.push(file);
                    }
                    Err(err) => report.failures.push((file, err.into())),
                },
                Err(err) => {
                    tracing::warn!(file = %file.display(), error = %err, "upload failed");
                    report.failures.push((file, err));
                }
            }
        }

        Ok(report)
    }

    /// Export files present on disk right now, in a stable order.
    fn pending_files(&self) -> Result<Vec<PathBuf>, UploadError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.work_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(EXPORT_EXTENSION))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    async fn upload_one(&self, file: &Path) -> Result<(), UploadError> {
        let driver = self.driver.as_ref();

        driver.navigate(&self.endpoint("transactions/import")).await?;

        let input = wait_for(driver, &locators::upload_input(), &self.policy)
            .await
            .map_err(|source| UploadError::Control {
                what: "file input",
                source,
            })?;

        // The form needs an absolute path typed into the file input.
        let absolute = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.work_dir.join(file)
        };
        driver
            .send_keys(&input, &absolute.to_string_lossy())
            .await?;

        let submit = wait_for(driver, &locators::upload_submit(), &self.policy)
            .await
            .map_err(|source| UploadError::Control {
                what: "import submit control",
                source,
            })?;
        driver.click(&submit).await?;

        Ok(())
    }
}

//! Per-account export: navigate, apply the date range, trigger the OFX
//! download, and wait for the file to land on disk.

use std::path::PathBuf;
use std::time::Duration;

use crate::driver::{DriverError, ElementHandle, Locator, UiDriver};
use crate::model::{Account, AccountType, DateRange};
use crate::retry::{wait_for, RetryError, RetryPolicy};

/// Fixed name the browser gives every export; renamed per account once it
/// appears.
pub const DOWNLOAD_FILENAME: &str = "OFXData.ofx";

/// The export format this workflow understands. Always selected explicitly;
/// the UI defaults to CSV.
pub const EXPORT_FORMAT: &str = "OFX";

/// The export controls for one account category.
///
/// The re-platformed "complete access" pages use a different set of controls
/// than the legacy toolbar; the set is chosen once per account, before any
/// driver call, and never mixed across a retry.
#[derive(Debug, Clone)]
pub struct LocatorSet {
    /// "View transactions" link that must be activated first, when present.
    pub pre_step: Option<Locator>,
    pub export_trigger: Locator,
    pub format_select: Locator,
    pub submit: Locator,
}

impl LocatorSet {
    pub fn for_account_type(account_type: AccountType) -> Self {
        match account_type {
            AccountType::CompleteAccess => Self {
                pre_step: None,
                export_trigger: Locator::css("button[data-test-id='export-transactions']"),
                format_select: Locator::css("select[data-test-id='export-format']"),
                submit: Locator::css("button[data-test-id='export-submit']"),
            },
            other => Self {
                pre_step: (other == AccountType::HomeLoan)
                    .then(|| Locator::xpath(r#"//a[contains(text(),"View transactions")]"#)),
                export_trigger: Locator::xpath(
                    r#"//*[@id="ctl00_ToobarFooterRight_updatePanelExport"]/div/a"#,
                ),
                format_select: Locator::css("#ctl00_ToobarFooterRight_ddlExportType_field"),
                submit: Locator::css("#ctl00_ToobarFooterRight_lbExport"),
            },
        }
    }
}

/// Transaction search widget on the account page.
mod search {
    use crate::driver::Locator;

    pub fn advanced_trigger() -> Locator {
        Locator::css("#cba_advanced_search_trigger")
    }

    pub fn date_range_radio() -> Locator {
        Locator::xpath(r#"//*[@id="ctl00_BodyPlaceHolder_radioSwitchDateRange_field"]/li[2]"#)
    }

    pub fn from_field() -> Locator {
        Locator::css("#ctl00_BodyPlaceHolder_fromCalTxtBox_field")
    }

    pub fn to_field() -> Locator {
        Locator::css("#ctl00_BodyPlaceHolder_toCalTxtBox_field")
    }

    pub fn search_button() -> Locator {
        Locator::css("#ctl00_BodyPlaceHolder_lbSearch")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("could not operate the {what} for account {account}")]
    Control {
        account: String,
        what: &'static str,
        #[source]
        source: RetryError,
    },

    #[error("driver error while exporting account {account}")]
    Driver {
        account: String,
        #[source]
        source: DriverError,
    },

    #[error("export for account {account} timed out; {} never appeared", .expected.display())]
    Timeout { account: String, expected: PathBuf },

    #[error("failed to move the export for account {account} into place")]
    Rename {
        account: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct ExportController<'a> {
    driver: &'a dyn UiDriver,
    policy: RetryPolicy,
    range: DateRange,
    download_dir: PathBuf,
    file_poll_interval: Duration,
}

impl<'a> ExportController<'a> {
    pub fn new(
        driver: &'a dyn UiDriver,
        policy: RetryPolicy,
        range: DateRange,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            policy,
            range,
            download_dir: download_dir.into(),
            file_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_file_poll_interval(mut self, interval: Duration) -> Self {
        self.file_poll_interval = interval;
        self
    }

    /// Export one account's transactions and move the file to its target
    /// name. Failures here are isolated per account; the caller decides
    /// whether to continue the batch.
    pub async fn export_account(&self, account: &Account) -> Result<PathBuf, ExportError> {
        let locators = LocatorSet::for_account_type(account.account_type);

        self.driver
            .navigate(&account.navigation_target)
            .await
            .map_err(|source| ExportError::Driver {
                account: account.id.clone(),
                source,
            })?;

        if let Some(pre_step) = &locators.pre_step {
            self.activate_pre_step(account, pre_step).await?;
        }

        self.apply_date_range(account).await?;

        let trigger = self
            .control(account, "export control", &locators.export_trigger)
            .await?;
        self.click(account, &trigger).await?;

        let format = self
            .control(account, "format selector", &locators.format_select)
            .await?;
        self.driver
            .select_option(&format, EXPORT_FORMAT)
            .await
            .map_err(|source| ExportError::Driver {
                account: account.id.clone(),
                source,
            })?;

        let submit = self
            .control(account, "export submit control", &locators.submit)
            .await?;
        self.click(account, &submit).await?;

        self.wait_for_download(account).await
    }

    /// The "view transactions" link only exists on some pages of this
    /// account type; exhausting the wait is not an error.
    async fn activate_pre_step(
        &self,
        account: &Account,
        locator: &Locator,
    ) -> Result<(), ExportError> {
        let link = match wait_for(self.driver, locator, &self.policy).await {
            Ok(link) => link,
            Err(RetryError::Exhausted { .. }) => {
                tracing::debug!(
                    account = %account.id,
                    "view-transactions link absent; proceeding without it"
                );
                return Ok(());
            }
            Err(RetryError::Fatal(source)) => {
                return Err(ExportError::Driver {
                    account: account.id.clone(),
                    source,
                })
            }
        };
        self.click(account, &link).await
    }

    /// Open the advanced search widget and submit the export date range.
    async fn apply_date_range(&self, account: &Account) -> Result<(), ExportError> {
        let trigger = self
            .control(account, "advanced search trigger", &search::advanced_trigger())
            .await?;
        self.click(account, &trigger).await?;

        let radio = self
            .control(account, "date range selector", &search::date_range_radio())
            .await?;
        self.click(account, &radio).await?;

        let (from, to) = self.range.ui_strings();

        let from_field = self
            .control(account, "from-date field", &search::from_field())
            .await?;
        self.send_keys(account, &from_field, &from).await?;

        let to_field = self
            .control(account, "to-date field", &search::to_field())
            .await?;
        self.send_keys(account, &to_field, &to).await?;

        let search = self
            .control(account, "search button", &search::search_button())
            .await?;
        self.click(account, &search).await
    }

    /// Poll the filesystem for the fixed download name, then rename it to
    /// the account's target filename. The rename is atomic because source
    /// and target share a directory.
    async fn wait_for_download(&self, account: &Account) -> Result<PathBuf, ExportError> {
        let expected = self.download_dir.join(DOWNLOAD_FILENAME);
        let target = self.download_dir.join(&account.target_filename);

        for _ in 0..self.policy.max_attempts {
            if expected.exists() {
                std::fs::rename(&expected, &target).map_err(|source| ExportError::Rename {
                    account: account.id.clone(),
                    source,
                })?;
                tracing::info!(account = %account.id, file = %target.display(), "export complete");
                return Ok(target);
            }
            tokio::time::sleep(self.file_poll_interval).await;
        }

        Err(ExportError::Timeout {
            account: account.id.clone(),
            expected,
        })
    }

    async fn control(
        &self,
        account: &Account,
        what: &'static str,
        locator: &Locator,
    ) -> Result<ElementHandle, ExportError> {
        wait_for(self.driver, locator, &self.policy)
            .await
            .map_err(|source| ExportError::Control {
                account: account.id.clone(),
                what,
                source,
            })
    }

    async fn click(&self, account: &Account, handle: &ElementHandle) -> Result<(), ExportError> {
        self.driver
            .click(handle)
            .await
            .map_err(|source| ExportError::Driver {
                account: account.id.clone(),
                source,
            })
    }

    async fn send_keys(
        &self,
        account: &Account,
        handle: &ElementHandle,
        text: &str,
    ) -> Result<(), ExportError> {
        self.driver
            .send_keys(handle, text)
            .await
            .map_err(|source| ExportError::Driver {
                account: account.id.clone(),
                source,
            })
    }
}

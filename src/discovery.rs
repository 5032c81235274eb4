//! Scrapes the rendered portfolio page into typed account records.

use crate::driver::{DriverError, Locator, UiDriver};
use crate::model::{
    export_filename, is_excluded_category, normalize_account_id, Account, AccountType, DateRange,
};
use crate::retry::{wait_for, RetryError, RetryPolicy};

const GRID_ID: &str = "MyPortfolioGrid1_a";

fn grid() -> Locator {
    Locator::css(format!("#{GRID_ID}"))
}

/// The i-th rendered row of the portfolio grid, 1-based.
fn row_xpath(index: usize) -> String {
    format!(r#"(//*[@id="{GRID_ID}"]//tr)[{index}]"#)
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Fatal to the run: no account list means nothing to export.
    #[error("account list did not appear within the retry policy")]
    Timeout {
        #[source]
        source: RetryError,
    },

    #[error("driver error while reading the account list")]
    Driver(#[from] DriverError),
}

pub struct AccountDiscovery<'a> {
    driver: &'a dyn UiDriver,
    policy: RetryPolicy,
    range: DateRange,
}

impl<'a> AccountDiscovery<'a> {
    pub fn new(driver: &'a dyn UiDriver, policy: RetryPolicy, range: DateRange) -> Self {
        Self {
            driver,
            policy,
            range,
        }
    }

    /// Walk the portfolio grid and return accounts in discovery order.
    ///
    /// The grid exposes no row count; the first missing positional row is
    /// the normal end-of-list signal. Rows are deduplicated on the
    /// normalized id, first occurrence wins.
    pub async fn discover(
        &self,
        filter: Option<AccountType>,
    ) -> Result<Vec<Account>, DiscoveryError> {
        wait_for(self.driver, &grid(), &self.policy)
            .await
            .map_err(|source| DiscoveryError::Timeout { source })?;

        let mut accounts: Vec<Account> = Vec::new();

        for index in 1.. {
            let row = row_xpath(index);
            match self.driver.locate(&Locator::xpath(row.clone())).await {
                Ok(_) => {}
                Err(DriverError::NotFound { .. }) => break,
                Err(err) => return Err(err.into()),
            }

            let Some(parsed) = self.read_row(&row).await? else {
                continue;
            };

            if is_excluded_category(&parsed.display_name) {
                tracing::debug!(name = %parsed.display_name, "skipping excluded category");
                continue;
            }

            let account_type = AccountType::classify(&parsed.display_name);
            if filter.is_some_and(|wanted| wanted != account_type) {
                continue;
            }

            if accounts.iter().any(|existing| existing.id == parsed.id) {
                tracing::debug!(id = %parsed.id, "skipping duplicate account row");
                continue;
            }

            let target_filename = export_filename(&parsed.id, &self.range);
            tracing::info!(
                id = %parsed.id,
                name = %parsed.display_name,
                %account_type,
                "discovered account"
            );
            accounts.push(Account {
                id: parsed.id,
                display_name: parsed.display_name,
                balance: parsed.balance,
                available: parsed.available,
                navigation_target: parsed.navigation_target,
                account_type,
                target_filename,
            });
        }

        Ok(accounts)
    }

    /// Extract one row's cells; `None` when the row is not an account row
    /// (headers, totals, rows without a usable number).
    async fn read_row(&self, row: &str) -> Result<Option<RawRow>, DriverError> {
        let Some(display_name) = self.cell_text(row, "NicknameField").await? else {
            return Ok(None);
        };

        let bsb = self.cell_text(row, "BSBField").await?.unwrap_or_default();
        let number = self
            .cell_text(row, "AccountNumberField")
            .await?
            .unwrap_or_default();

        // A numeric BSB marks a deposit account; credit cards render the
        // text "Awards" in the BSB column instead.
        let bsb = bsb.trim();
        let is_account = bsb.chars().any(|c| c.is_ascii_digit())
            || bsb.eq_ignore_ascii_case("awards");
        if !is_account {
            return Ok(None);
        }

        let id = normalize_account_id(&format!("{bsb}{number}"));
        if id.is_empty() {
            return Ok(None);
        }

        let balance = self
            .cell_text(row, "AccountBalanceField")
            .await?
            .unwrap_or_default();
        let available = self
            .cell_text(row, "AvailableFundsField")
            .await?
            .unwrap_or_default();

        let anchor = Locator::xpath(format!(
            r#"{row}//td[contains(@class,"NicknameField")]//a"#
        ));
        let navigation_target = match self.driver.locate(&anchor).await {
            Ok(handle) => self.driver.attr(&handle, "href").await?,
            Err(DriverError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let Some(navigation_target) = navigation_target else {
            tracing::warn!(name = %display_name, "account row has no navigation target; skipping");
            return Ok(None);
        };

        Ok(Some(RawRow {
            display_name,
            id,
            balance,
            available,
            navigation_target,
        }))
    }

    async fn cell_text(&self, row: &str, class: &str) -> Result<Option<String>, DriverError> {
        let cell = Locator::xpath(format!(r#"{row}//td[contains(@class,"{class}")]"#));
        match self.driver.locate(&cell).await {
            Ok(handle) => Ok(Some(self.driver.text(&handle).await?)),
            Err(DriverError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

struct RawRow {
    display_name: String,
    id: String,
    balance: String,
    available: String,
    navigation_target: String,
}

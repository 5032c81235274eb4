//! Scripted in-memory stand-ins for the two remote applications.
//!
//! `MockBank` mimics the bank's rendered pages well enough to drive the
//! session, discovery, and export components end to end; `MockLedger` does
//! the same for the import target. Both implement `UiDriver` and key their
//! behavior off the locator text, the way the real pages key theirs off
//! markup.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ofxferry::driver::{DriverError, ElementHandle, Locator, UiDriver};
use ofxferry::export::DOWNLOAD_FILENAME;
use ofxferry::model::normalize_account_id;

pub const BANK_HOME: &str = "https://bank.example/portfolio";

/// One rendered portfolio row.
#[derive(Debug, Clone)]
pub struct RowSpec {
    pub nickname: String,
    pub bsb: String,
    pub number: String,
    pub balance: String,
    pub available: String,
    pub href: String,
}

impl RowSpec {
    pub fn new(nickname: &str, bsb: &str, number: &str) -> Self {
        let id = normalize_account_id(&format!("{bsb}{number}"));
        Self {
            nickname: nickname.to_string(),
            bsb: bsb.to_string(),
            number: number.to_string(),
            balance: "$1,000.00".to_string(),
            available: "$900.00".to_string(),
            href: format!("https://bank.example/account/{id}"),
        }
    }

    fn id(&self) -> String {
        normalize_account_id(&format!("{}{}", self.bsb, self.number))
    }

    fn is_home_loan(&self) -> bool {
        self.nickname.to_lowercase().contains("home loan")
    }

    fn is_complete_access(&self) -> bool {
        self.nickname.to_lowercase().contains("complete access")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Nickname,
    Bsb,
    Number,
    Balance,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Elem {
    LoginUsername,
    LoginPassword,
    LoginSubmit,
    LogoutLink,
    Row(usize),
    Cell(usize, CellKind),
    Anchor(usize),
    PreStepLink,
    SearchTrigger,
    DateRadio,
    FromField,
    ToField,
    SearchButton,
    ExportTrigger,
    FormatSelect,
    ExportSubmit,
}

struct BankState {
    rows: Vec<RowSpec>,
    logged_in: bool,
    current_url: String,
    download_dir: Option<PathBuf>,
    failing_exports: HashSet<String>,
    elements: HashMap<u64, Elem>,
    login_form_present: bool,
    // instrumentation
    typed: Vec<(Elem, String)>,
    selected_formats: Vec<String>,
    pre_step_clicks: Vec<String>,
    max_row_probed: usize,
    quit_called: bool,
}

pub struct MockBank {
    state: Mutex<BankState>,
    next_handle: AtomicU64,
}

impl MockBank {
    pub fn new(rows: Vec<RowSpec>) -> Self {
        Self {
            state: Mutex::new(BankState {
                rows,
                logged_in: false,
                current_url: "about:blank".to_string(),
                download_dir: None,
                failing_exports: HashSet::new(),
                elements: HashMap::new(),
                login_form_present: true,
                typed: Vec::new(),
                selected_formats: Vec::new(),
                pre_step_clicks: Vec::new(),
                max_row_probed: 0,
                quit_called: false,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Where a click on the export submit control drops the download.
    pub fn with_download_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.state.lock().unwrap().download_dir = Some(dir.into());
        self
    }

    /// Skip the login flow; the portfolio page is immediately available.
    pub fn start_logged_in(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.logged_in = true;
            state.current_url = BANK_HOME.to_string();
        }
        self
    }

    /// Render the logon page without its form, as a broken deploy would.
    pub fn without_login_form(self) -> Self {
        self.state.lock().unwrap().login_form_present = false;
        self
    }

    /// Make the export for this account id never produce a file.
    pub fn fail_export_for(self, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_exports
            .insert(id.to_string());
        self
    }

    pub fn pre_step_clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().pre_step_clicks.clone()
    }

    pub fn selected_formats(&self) -> Vec<String> {
        self.state.lock().unwrap().selected_formats.clone()
    }

    pub fn max_row_probed(&self) -> usize {
        self.state.lock().unwrap().max_row_probed
    }

    pub fn quit_called(&self) -> bool {
        self.state.lock().unwrap().quit_called
    }

    fn not_found(locator: &Locator) -> DriverError {
        DriverError::NotFound {
            locator: locator.to_string(),
        }
    }

    fn register(&self, state: &mut BankState, elem: Elem) -> ElementHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        state.elements.insert(raw, elem);
        ElementHandle::new(raw)
    }
}

fn current_account(state: &BankState) -> Option<RowSpec> {
    state
        .rows
        .iter()
        .find(|row| row.href == state.current_url)
        .cloned()
}

/// Pull the positional index out of a `(...//tr)[n]` expression.
fn row_index(xpath: &str) -> Option<usize> {
    let start = xpath.find(")[")? + 2;
    let rest = &xpath[start..];
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

fn resolve_bank_elem(state: &mut BankState, locator: &Locator) -> Option<Elem> {
    let (selector, on_login_page, on_account) = {
        let selector = match locator {
            Locator::Css(s) => s.clone(),
            Locator::XPath(s) => s.clone(),
        };
        let on_login_page = state.current_url.contains("Logon");
        let on_account = current_account(state);
        (selector, on_login_page, on_account)
    };

    let login_form = on_login_page && state.login_form_present;
    if selector.contains("txtMyClientNumber") {
        return login_form.then_some(Elem::LoginUsername);
    }
    if selector.contains("txtMyPassword") {
        return login_form.then_some(Elem::LoginPassword);
    }
    if selector.contains("btnLogon") {
        return login_form.then_some(Elem::LoginSubmit);
    }
    if selector.contains("logOffLink") {
        return state.logged_in.then_some(Elem::LogoutLink);
    }

    if selector.contains("MyPortfolioGrid1_a") {
        let Some(index) = row_index(&selector) else {
            // The grid container itself.
            return state.logged_in.then_some(Elem::Row(0));
        };
        state.max_row_probed = state.max_row_probed.max(index);
        if !state.logged_in || index == 0 || index > state.rows.len() {
            return None;
        }
        if selector.contains("NicknameField") && selector.contains("//a") {
            return Some(Elem::Anchor(index));
        }
        let kind = if selector.contains("NicknameField") {
            Some(CellKind::Nickname)
        } else if selector.contains("BSBField") {
            Some(CellKind::Bsb)
        } else if selector.contains("AccountNumberField") {
            Some(CellKind::Number)
        } else if selector.contains("AccountBalanceField") {
            Some(CellKind::Balance)
        } else if selector.contains("AvailableFundsField") {
            Some(CellKind::Available)
        } else {
            None
        };
        return Some(match kind {
            Some(kind) => Elem::Cell(index, kind),
            None => Elem::Row(index),
        });
    }

    let account = on_account?;

    if selector.contains("View transactions") {
        return account.is_home_loan().then_some(Elem::PreStepLink);
    }
    if selector.contains("cba_advanced_search_trigger") {
        return Some(Elem::SearchTrigger);
    }
    if selector.contains("radioSwitchDateRange") {
        return Some(Elem::DateRadio);
    }
    if selector.contains("fromCalTxtBox") {
        return Some(Elem::FromField);
    }
    if selector.contains("toCalTxtBox") {
        return Some(Elem::ToField);
    }
    if selector.contains("lbSearch") {
        return Some(Elem::SearchButton);
    }

    // Legacy toolbar controls exist everywhere except re-platformed pages.
    if selector.contains("updatePanelExport") {
        return (!account.is_complete_access()).then_some(Elem::ExportTrigger);
    }
    if selector.contains("ddlExportType") {
        return (!account.is_complete_access()).then_some(Elem::FormatSelect);
    }
    if selector.contains("lbExport") {
        return (!account.is_complete_access()).then_some(Elem::ExportSubmit);
    }

    // Re-platformed controls only on complete access pages.
    if selector.contains("export-transactions") {
        return account.is_complete_access().then_some(Elem::ExportTrigger);
    }
    if selector.contains("export-format") {
        return account.is_complete_access().then_some(Elem::FormatSelect);
    }
    if selector.contains("export-submit") {
        return account.is_complete_access().then_some(Elem::ExportSubmit);
    }

    None
}

#[async_trait]
impl UiDriver for MockBank {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.state.lock().unwrap().current_url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn locate(&self, locator: &Locator) -> Result<ElementHandle, DriverError> {
        let mut state = self.state.lock().unwrap();
        match resolve_bank_elem(&mut state, locator) {
            Some(elem) => Ok(self.register(&mut state, elem)),
            None => Err(Self::not_found(locator)),
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .cloned()
            .ok_or(DriverError::StaleReference)?;

        match elem {
            Elem::LoginSubmit => {
                state.logged_in = true;
                state.current_url = BANK_HOME.to_string();
            }
            Elem::LogoutLink => state.logged_in = false,
            Elem::PreStepLink => {
                let url = state.current_url.clone();
                state.pre_step_clicks.push(url);
            }
            Elem::ExportSubmit => {
                if let Some(account) = current_account(&state) {
                    if !state.failing_exports.contains(&account.id()) {
                        if let Some(dir) = &state.download_dir {
                            std::fs::write(
                                dir.join(DOWNLOAD_FILENAME),
                                b"OFXHEADER:100\nDATA:OFXSGML\n",
                            )
                            .expect("mock download write");
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .cloned()
            .ok_or(DriverError::StaleReference)?;
        state.typed.push((elem, text.to_string()));
        Ok(())
    }

    async fn select_option(&self, handle: &ElementHandle, value: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .cloned()
            .ok_or(DriverError::StaleReference)?;
        if elem == Elem::FormatSelect {
            state.selected_formats.push(value.to_string());
        }
        Ok(())
    }

    async fn text(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        let text = match elem {
            Elem::Cell(index, kind) => {
                let row = &state.rows[index - 1];
                match kind {
                    CellKind::Nickname => row.nickname.clone(),
                    CellKind::Bsb => row.bsb.clone(),
                    CellKind::Number => row.number.clone(),
                    CellKind::Balance => row.balance.clone(),
                    CellKind::Available => row.available.clone(),
                }
            }
            _ => String::new(),
        };
        Ok(text)
    }

    async fn attr(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        if name == "href" {
            if let Elem::Anchor(index) = elem {
                return Ok(Some(state.rows[*index - 1].href.clone()));
            }
        }
        Ok(None)
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.state.lock().unwrap().quit_called = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Import target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerElem {
    Username,
    Password,
    LoginSubmit,
    UploadInput,
    UploadSubmit,
}

struct LedgerState {
    current_url: String,
    logged_in: bool,
    elements: HashMap<u64, LedgerElem>,
    pending_path: Option<String>,
    completed: Vec<String>,
    failing_markers: Vec<String>,
    quit_called: bool,
}

pub struct MockLedger {
    state: Mutex<LedgerState>,
    next_handle: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                current_url: "about:blank".to_string(),
                logged_in: false,
                elements: HashMap::new(),
                pending_path: None,
                completed: Vec::new(),
                failing_markers: Vec::new(),
                quit_called: false,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Reject any upload whose typed path contains this marker.
    pub fn fail_uploads_containing(self, marker: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_markers
            .push(marker.to_string());
        self
    }

    /// Paths whose upload completed, in order.
    pub fn completed(&self) -> Vec<String> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn quit_called(&self) -> bool {
        self.state.lock().unwrap().quit_called
    }

    fn register(&self, state: &mut LedgerState, elem: LedgerElem) -> ElementHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        state.elements.insert(raw, elem);
        ElementHandle::new(raw)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_ledger_elem(state: &LedgerState, locator: &Locator) -> Option<LedgerElem> {
    let selector = match locator {
        Locator::Css(s) => s.clone(),
        Locator::XPath(s) => s.clone(),
    };

    if state.current_url.ends_with("/login") {
        if selector.contains("div[1]/input") {
            return Some(LedgerElem::Username);
        }
        if selector.contains("div[2]/input") {
            return Some(LedgerElem::Password);
        }
        if selector.ends_with("fieldset/input") {
            return Some(LedgerElem::LoginSubmit);
        }
    }

    if state.current_url.contains("transactions/import") {
        if selector.contains("#upload") {
            return Some(LedgerElem::UploadInput);
        }
        if selector.contains("page-wrapper") {
            return Some(LedgerElem::UploadSubmit);
        }
    }

    None
}

#[async_trait]
impl UiDriver for MockLedger {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.state.lock().unwrap().current_url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn locate(&self, locator: &Locator) -> Result<ElementHandle, DriverError> {
        let mut state = self.state.lock().unwrap();
        match resolve_ledger_elem(&state, locator) {
            Some(elem) => Ok(self.register(&mut state, elem)),
            None => Err(DriverError::NotFound {
                locator: locator.to_string(),
            }),
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .copied()
            .ok_or(DriverError::StaleReference)?;

        match elem {
            LedgerElem::LoginSubmit => state.logged_in = true,
            LedgerElem::UploadSubmit => {
                let path = state.pending_path.take().unwrap_or_default();
                if state
                    .failing_markers
                    .iter()
                    .any(|marker| path.contains(marker.as_str()))
                {
                    return Err(DriverError::Transport("upload rejected".to_string()));
                }
                state.completed.push(path);
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let elem = state
            .elements
            .get(&handle.raw())
            .copied()
            .ok_or(DriverError::StaleReference)?;
        if elem == LedgerElem::UploadInput {
            state.pending_path = Some(text.to_string());
        }
        Ok(())
    }

    async fn select_option(&self, _handle: &ElementHandle, _value: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn text(&self, _handle: &ElementHandle) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn attr(
        &self,
        _handle: &ElementHandle,
        _name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.state.lock().unwrap().quit_called = true;
        Ok(())
    }
}

/// A retry policy small enough that a missing element fails fast in tests.
pub fn fast_policy() -> ofxferry::retry::RetryPolicy {
    ofxferry::retry::RetryPolicy {
        max_attempts: 2,
        per_attempt_timeout: std::time::Duration::from_millis(50),
    }
}

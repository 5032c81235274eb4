//! Chrome DevTools Protocol implementation of [`UiDriver`].
//!
//! Launches a local Chrome/Chromium, pins its download directory to the
//! working directory, and resolves locators through CDP queries. This is
//! the only module that knows a browser exists; everything else talks to
//! the trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::DriverConfig;

use super::{DriverError, ElementHandle, Locator, UiDriver};

pub struct ChromeDriver {
    browser: Mutex<Option<Browser>>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    page: Page,
    elements: Mutex<HashMap<u64, Element>>,
    next_handle: AtomicU64,
}

impl ChromeDriver {
    /// Launch a browser configured for unattended downloads.
    pub async fn launch(config: &DriverConfig, download_dir: &Path) -> Result<Self> {
        let executable = match &config.executable_path {
            Some(path) => path.clone(),
            None => find_browser().context(
                "Chrome/Chromium not found. Install it or set driver.executable_path.",
            )?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &config.proxy {
            builder = builder.arg(format!("--proxy-server=http://{proxy}"));
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open a page")?;

        std::fs::create_dir_all(download_dir)
            .with_context(|| format!("Failed to create download dir: {}", download_dir.display()))?;
        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.display().to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build download params: {e}"))?;
        page.execute(download_params)
            .await
            .context("Failed to set download behavior")?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            page,
            elements: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    async fn register(&self, element: Element) -> ElementHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.elements.lock().await.insert(raw, element);
        ElementHandle::new(raw)
    }
}

fn locate_error(locator: &Locator, err: CdpError) -> DriverError {
    match err {
        CdpError::NotFound => DriverError::NotFound {
            locator: locator.to_string(),
        },
        other => DriverError::Transport(other.to_string()),
    }
}

fn element_error(err: CdpError) -> DriverError {
    let msg = err.to_string();
    // CDP reports operations on removed nodes with node-id complaints.
    if msg.contains("No node with given id") || msg.contains("not attached") {
        DriverError::StaleReference
    } else {
        DriverError::Transport(msg)
    }
}

#[async_trait]
impl UiDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Transport(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.page
            .url()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?
            .ok_or_else(|| DriverError::Transport("page reported no URL".to_string()))
    }

    async fn locate(&self, locator: &Locator) -> Result<ElementHandle, DriverError> {
        let element = match locator {
            Locator::Css(selector) => self.page.find_element(selector.as_str()).await,
            Locator::XPath(expression) => self.page.find_xpath(expression.as_str()).await,
        }
        .map_err(|e| locate_error(locator, e))?;

        Ok(self.register(element).await)
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let elements = self.elements.lock().await;
        let element = elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        element.click().await.map(|_| ()).map_err(element_error)
    }

    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let elements = self.elements.lock().await;
        let element = elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        element.click().await.map_err(element_error)?;
        element.type_str(text).await.map(|_| ()).map_err(element_error)
    }

    async fn select_option(&self, handle: &ElementHandle, value: &str) -> Result<(), DriverError> {
        let elements = self.elements.lock().await;
        let element = elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        // Set the value directly and fire change, as a user's selection would.
        let js = format!(
            r#"function() {{
                this.value = "{value}";
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }}"#
        );
        element
            .call_js_fn(js, false)
            .await
            .map(|_| ())
            .map_err(element_error)
    }

    async fn text(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let elements = self.elements.lock().await;
        let element = elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        Ok(element
            .inner_text()
            .await
            .map_err(element_error)?
            .unwrap_or_default())
    }

    async fn attr(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let elements = self.elements.lock().await;
        let element = elements
            .get(&handle.raw())
            .ok_or(DriverError::StaleReference)?;
        element.attribute(name).await.map_err(element_error)
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.elements.lock().await.clear();

        let mut result = Ok(());
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(err) = browser.close().await {
                result = Err(DriverError::Transport(err.to_string()));
            }
            let _ = browser.wait().await;
        }

        if let Some(task) = self.handler_task.lock().expect("handler task lock").take() {
            task.abort();
        }

        result
    }
}

/// Probe `which` and well-known locations for a Chrome/Chromium binary.
fn find_browser() -> Option<PathBuf> {
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

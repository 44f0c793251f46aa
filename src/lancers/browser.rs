//! chromiumoxide による Lancers ブラウザセッション

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::extract::{self, RESTRICTED_MARKER};
use super::types::{RawDetail, SearchTarget, WorkCard, LOGIN_URL};
use crate::config::{Credentials, ScraperConfig};
use crate::error::ScraperError;
use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{DetailSession, ListingSession};

/// 詳細ページの主要コンテンツ
const DETAIL_READY_SELECTOR: &str = "h1.c-heading--lv1";
/// ログイン成功時に表示される要素
const LOGGED_IN_SELECTORS: [&str; 4] = [
    ".c-header-user-dropdown__user-name",
    ".p-mypage-sidebar__profile__name",
    "#header_mypage_button",
    "a[href=\"/mypage\"]",
];
const LOGIN_ERROR_SELECTOR: &str = ".c-form-error__message, .error_message, .alert-danger, #js-error";

const SELECTOR_POLL_INTERVAL_MS: u64 = 500;
/// ページ安定待機のタイムアウト（ミリ秒）
const PAGE_STABLE_TIMEOUT_MS: u64 = 10000;

/// CDPエラーをセッション単位の致命的エラーと行単位のエラーに振り分ける
fn map_cdp(context: &str, e: CdpError) -> ScraperError {
    let message = format!("{}: {}", context, e);
    match e {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            ScraperError::Session(message)
        }
        CdpError::Timeout => ScraperError::Timeout(message),
        CdpError::NotFound => ScraperError::ElementNotFound(message),
        CdpError::JavascriptException(_) => ScraperError::JavaScript(message),
        _ => ScraperError::Navigation(message),
    }
}

/// Lancers 用ブラウザセッション
pub struct LancersBrowser {
    config: ScraperConfig,
    retry: RetryPolicy,
    browser: Option<Browser>,
    page: Option<Page>,
    /// 起動ごとに作るChromeプロファイル（close時に削除）
    user_data_dir: Option<PathBuf>,
}

impl LancersBrowser {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
            browser: None,
            page: None,
            user_data_dir: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// ブラウザを起動して新しいページを開く
    pub async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("ブラウザを初期化中...");

        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("lancers-{}", unique_id));
        self.user_data_dir = Some(user_data_dir.clone());

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(1280, 800)
            .request_timeout(self.config.timeout.max(Duration::from_secs(30)));

        if let Some(chrome_path) = &self.config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if self.config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        self.browser = Some(browser);
        self.page = Some(page);

        info!("ブラウザ初期化完了 (headless={})", self.config.headless);
        Ok(())
    }

    /// ブラウザを起動し、認証情報があればログインまで済ませる
    ///
    /// 認証情報が無い場合は未ログインのまま返す。ログインに失敗した場合は
    /// ブラウザを閉じてエラーを返す。
    pub async fn open(config: ScraperConfig) -> Result<Self, ScraperError> {
        let mut browser = Self::new(config);
        browser.initialize().await?;

        let Some(credentials) = browser.config.credentials.clone() else {
            info!("認証情報が未設定のため、ログインせずに続行します");
            return Ok(browser);
        };

        match browser.login(&credentials).await {
            Ok(true) => Ok(browser),
            Ok(false) => {
                browser.close().await?;
                Err(ScraperError::Login(format!(
                    "{} でログインできませんでした",
                    credentials.email
                )))
            }
            Err(e) => {
                browser.close().await?;
                Err(e)
            }
        }
    }

    fn get_page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("ブラウザが初期化されていません".into()))
    }

    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        page.goto(url)
            .await
            .map_err(|e| map_cdp(&format!("ページ遷移 {}", url), e))?;
        Ok(())
    }

    /// セレクタに一致する要素が現れるまで待機
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        let start = Instant::now();

        loop {
            match page.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(e @ (CdpError::Ws(_) | CdpError::ChannelSendError(_))) => {
                    return Err(map_cdp(selector, e));
                }
                Err(e) => debug!("要素待機中 ({}): {}", selector, e),
            }

            if start.elapsed() > timeout {
                return Err(ScraperError::Timeout(format!(
                    "{} が{:?}以内に表示されませんでした",
                    selector, timeout
                )));
            }
            sleep(Duration::from_millis(SELECTOR_POLL_INTERVAL_MS)).await;
        }
    }

    async fn has_element(&self, selector: &str) -> bool {
        match self.get_page() {
            Ok(page) => page.find_element(selector).await.is_ok(),
            Err(_) => false,
        }
    }

    /// ページが安定するまで待機（HTML長が連続して変化しなくなるまで）
    async fn wait_stable(&self) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        let start = Instant::now();
        let timeout = Duration::from_millis(PAGE_STABLE_TIMEOUT_MS);

        let mut last_html_len: Option<usize> = None;
        let mut stable_count = 0;
        const REQUIRED_STABLE_CHECKS: u32 = 3;

        while start.elapsed() < timeout {
            match page.evaluate("document.documentElement.outerHTML.length").await {
                Ok(val) => {
                    let current_len = val.into_value::<usize>().unwrap_or(0);
                    match last_html_len {
                        Some(last) if last == current_len => {
                            stable_count += 1;
                            if stable_count >= REQUIRED_STABLE_CHECKS {
                                debug!("Page stable after {:?}", start.elapsed());
                                return Ok(());
                            }
                        }
                        _ => stable_count = 0,
                    }
                    last_html_len = Some(current_len);
                }
                Err(e @ (CdpError::Ws(_) | CdpError::ChannelSendError(_))) => {
                    return Err(map_cdp("ページ安定待機", e));
                }
                Err(e) => {
                    debug!("Page stable check error: {}", e);
                    stable_count = 0;
                }
            }
            sleep(Duration::from_millis(300)).await;
        }

        warn!("Page stable timeout after {:?}, proceeding anyway", start.elapsed());
        Ok(())
    }

    async fn current_url(&self) -> String {
        match self.get_page() {
            Ok(page) => page.url().await.ok().flatten().unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    async fn page_html(&self) -> Result<String, ScraperError> {
        self.get_page()?
            .content()
            .await
            .map_err(|e| map_cdp("HTML取得", e))
    }

    /// デバッグモード時のみスクリーンショットをbase64でログ出力
    async fn debug_screenshot(&self, label: &str) {
        if !self.config.debug {
            return;
        }
        let Ok(page) = self.get_page() else {
            return;
        };
        if let Ok(screenshot) = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
            debug!("{} screenshot: data:image/png;base64,{}", label, encoded);
        }
    }

    /// 詳細ページを1回読み込む（リトライなし）
    async fn load_detail(&self, url: &str) -> Result<RawDetail, ScraperError> {
        info!("案件詳細ページにアクセス: {}", url);
        self.goto(url).await?;

        let title = self
            .get_page()?
            .get_title()
            .await
            .map_err(|e| map_cdp("タイトル取得", e))?
            .unwrap_or_default();
        if title.contains(RESTRICTED_MARKER) {
            return Err(ScraperError::Restricted(url.to_string()));
        }

        self.wait_for_selector(DETAIL_READY_SELECTOR, self.config.timeout)
            .await?;
        self.wait_stable().await?;

        let html = self.page_html().await?;
        if extract::is_restricted(&html) {
            return Err(ScraperError::Restricted(url.to_string()));
        }
        Ok(extract::extract_work_detail(&html, url))
    }
}

#[async_trait]
impl DetailSession for LancersBrowser {
    async fn login(&mut self, credentials: &Credentials) -> Result<bool, ScraperError> {
        info!("ログインページにアクセス: {}", LOGIN_URL);
        self.goto(LOGIN_URL).await?;

        let login_timeout = self.config.timeout;
        self.wait_for_selector("input#UserEmail", login_timeout).await?;
        self.wait_stable().await?;

        let page = self.get_page()?;
        page.find_element("input#UserEmail")
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("メールアドレス入力欄: {}", e)))?
            .click()
            .await
            .map_err(|e| ScraperError::Login(format!("メールアドレス入力欄クリック: {}", e)))?
            .type_str(&credentials.email)
            .await
            .map_err(|e| ScraperError::Login(format!("メールアドレス入力: {}", e)))?;
        debug!("メールアドレス入力完了");

        page.find_element("input#UserPassword")
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("パスワード入力欄: {}", e)))?
            .click()
            .await
            .map_err(|e| ScraperError::Login(format!("パスワード入力欄クリック: {}", e)))?
            .type_str(&credentials.password)
            .await
            .map_err(|e| ScraperError::Login(format!("パスワード入力: {}", e)))?;
        debug!("パスワード入力完了");

        page.find_element("button#form_submit")
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("ログインボタン: {}", e)))?
            .click()
            .await
            .map_err(|e| ScraperError::Login(format!("ログインボタンクリック: {}", e)))?;

        info!("ログインボタンクリック後、状態変化待機中...");
        sleep(Duration::from_secs(5)).await;
        self.wait_stable().await?;

        let current_url = self.current_url().await;
        info!("ログイン試行後のURL: {}", current_url);

        let mut indicator_found = false;
        for selector in LOGGED_IN_SELECTORS {
            if self.has_element(selector).await {
                info!("ログイン成功の兆候を発見 (要素: {})", selector);
                indicator_found = true;
                break;
            }
        }

        if current_url.contains("mypage") || indicator_found {
            info!("ログインに成功しました");
            return Ok(true);
        }

        let message = match self.get_page()?.find_element(LOGIN_ERROR_SELECTOR).await {
            Ok(element) => element.inner_text().await.ok().flatten().unwrap_or_default(),
            Err(_) => String::new(),
        };
        if message.trim().is_empty() {
            error!("ログイン失敗。ログイン後ページ遷移せず。URL: {}", current_url);
        } else {
            error!("ログイン失敗: {}", message.trim());
        }
        self.debug_screenshot("Login failure").await;
        Ok(false)
    }

    async fn fetch_detail(&mut self, url: &str) -> Result<RawDetail, ScraperError> {
        let this = &*self;
        with_retry(url, self.retry, || this.load_detail(url)).await
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        info!("ブラウザを終了中...");

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Failed to wait for browser exit: {}", e);
            }
        }

        if let Some(dir) = self.user_data_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                debug!("Failed to remove user data dir {:?}: {}", dir, e);
            }
        }

        info!("ブラウザ終了完了");
        Ok(())
    }
}

#[async_trait]
impl ListingSession for LancersBrowser {
    async fn search_page(
        &mut self,
        target: &SearchTarget,
        page: u32,
    ) -> Result<Vec<WorkCard>, ScraperError> {
        let url = target.page_url(page);
        info!("ページ {} にアクセス: {}", page, url);

        let this = &*self;
        let target_url = url.as_str();
        let html = with_retry(&url, self.retry, || async move {
            this.goto(target_url).await?;
            this.wait_stable().await?;
            sleep(Duration::from_secs(1)).await;
            this.page_html().await
        })
        .await?;

        Ok(extract::extract_work_cards(&html))
    }
}

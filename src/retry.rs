//! 指数バックオフ付きリトライ

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::ScraperError;

/// リトライ設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    /// 待機なしで試行回数だけ制限する（テスト用途など）
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            backoff_factor: 1,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * self.backoff_factor.saturating_pow(attempt)
    }
}

/// `is_retryable()` なエラーの間だけ再試行する
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ScraperError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScraperError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "{}: 試行 {}/{} が失敗しました - {:?}後に再試行します: {}",
                    label,
                    attempt + 1,
                    attempts,
                    backoff,
                    e
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!("{}: 最大試行回数（{}回）に到達しました: {}", label, attempts, e);
                }
                return Err(e);
            }
        }
    }
}

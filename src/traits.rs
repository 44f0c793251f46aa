use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::ScraperError;
use crate::lancers::{RawDetail, SearchTarget, WorkCard};

/// 案件詳細を取得するブラウザセッション
///
/// 1回の実行につき1つのセッションを専有して使う。並行呼び出しは想定しない。
#[async_trait]
pub trait DetailSession: Send {
    /// ログイン実行（失敗時は `Ok(false)`）
    async fn login(&mut self, credentials: &Credentials) -> Result<bool, ScraperError>;

    /// 案件詳細ページを開いて生データを抽出
    async fn fetch_detail(&mut self, url: &str) -> Result<RawDetail, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;
}

/// 検索一覧を取得するブラウザセッション
#[async_trait]
pub trait ListingSession: Send {
    /// 検索結果の指定ページ（1始まり）から案件カードを取得
    async fn search_page(
        &mut self,
        target: &SearchTarget,
        page: u32,
    ) -> Result<Vec<WorkCard>, ScraperError>;
}

//! Lancers 関連の型定義

use serde::{Deserialize, Serialize};

pub const BASE_URL: &str = "https://www.lancers.jp";
pub const LOGIN_URL: &str = "https://www.lancers.jp/user/login";
pub const SEARCH_URL: &str = "https://www.lancers.jp/work/search";
pub const DATA_SEARCH_URL: &str = "https://www.lancers.jp/work/search/task/data?open=1&work_rank%5B%5D=3&work_rank%5B%5D=2&work_rank%5B%5D=1&work_rank%5B%5D=0&budget_from=&budget_to=&keyword=&not=";
pub const DATA_PROJECT_SEARCH_URL: &str = "https://www.lancers.jp/work/search/task/data?type%5B%5D=project&open=1&work_rank%5B%5D=3&work_rank%5B%5D=2&work_rank%5B%5D=1&work_rank%5B%5D=0&budget_from=&budget_to=&keyword=&not=";

/// 出力行のフィールド名
pub mod fields {
    pub const TITLE: &str = "title";
    pub const URL: &str = "url";
    pub const WORK_ID: &str = "work_id";
    pub const DEADLINE: &str = "deadline";
    pub const DEADLINE_RAW: &str = "deadline_raw";
    pub const PEOPLE: &str = "people";
    pub const DELIVERY_DATE: &str = "delivery_date";
    pub const DELIVERY_DATE_RAW: &str = "delivery_date_raw";
    pub const PERIOD: &str = "period";
    pub const SCRAPED_AT: &str = "scraped_at";
    pub const PRICE: &str = "price";
    pub const TYPE: &str = "type";
    pub const STATUS: &str = "status";
}

/// 案件詳細ページから抽出した生データ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDetail {
    pub title: String,
    pub url: String,
    pub work_id: String,
    /// 「締切」欄のテキスト（未加工）
    pub deadline_raw: String,
    /// 「希望納期」欄のテキスト（未加工）
    pub delivery_date_raw: String,
    /// 募集人数のテキスト（未加工）
    pub people: String,
    /// 「募集期間」欄のテキスト（未加工）
    pub period: String,
}

/// 検索一覧の案件カード1件分
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkCard {
    pub title: String,
    pub url: String,
    pub price: String,
    #[serde(rename = "type")]
    pub work_type: String,
    pub deadline: String,
    pub status: String,
}

/// 検索の種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// キーワード検索
    Keyword(String),
    /// データ検索（タスク）
    DataTask,
    /// データ検索（プロジェクト）
    DataProject,
}

impl SearchTarget {
    fn base_url(&self) -> String {
        match self {
            SearchTarget::Keyword(query) => {
                let mut url = url::Url::parse(SEARCH_URL).expect("static search url");
                url.query_pairs_mut()
                    .append_pair("sort", "started")
                    .append_pair("open", "1")
                    .append_pair("show_description", "1")
                    .append_pair("work_rank[]", "3")
                    .append_pair("work_rank[]", "2")
                    .append_pair("work_rank[]", "0")
                    .append_pair("budget_from", "")
                    .append_pair("budget_to", "")
                    .append_pair("keyword", query)
                    .append_pair("not", "");
                url.to_string()
            }
            SearchTarget::DataTask => DATA_SEARCH_URL.to_string(),
            SearchTarget::DataProject => DATA_PROJECT_SEARCH_URL.to_string(),
        }
    }

    /// 指定ページの検索URL（2ページ目以降は `page=N` を付与）
    pub fn page_url(&self, page: u32) -> String {
        let url = self.base_url();
        if page <= 1 {
            return url;
        }
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{}{}page={}", url, separator, page)
    }

    pub fn label(&self) -> String {
        match self {
            SearchTarget::Keyword(query) => format!("キーワード検索「{}」", query),
            SearchTarget::DataTask => "データ検索（タスク）".to_string(),
            SearchTarget::DataProject => "データ検索（プロジェクト）".to_string(),
        }
    }
}

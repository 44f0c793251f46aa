//! Lancers サイト固有の処理
//!
//! - `browser`: chromiumoxide によるセッション（ログイン・詳細取得・検索）
//! - `extract`: HTMLからの項目抽出
//! - `parser`: 抽出テキストの正規化

mod browser;
pub mod extract;
pub mod parser;
mod types;

pub use browser::LancersBrowser;
pub use types::{fields, RawDetail, SearchTarget, WorkCard, BASE_URL, LOGIN_URL};

//! Lancers 案件スクレイパーライブラリ
//!
//! - 検索一覧の取得（キーワード検索・データ検索、ページ送り、並列検索）
//! - CSVのURLごとに案件詳細を取得して元の行に重ねる（チャンク単位、途中中断・再開可能）
//!
//! # 詳細取得の使用例
//!
//! ```rust,ignore
//! use lancers_scraper::{EnrichRequest, EnrichService, ScraperConfig};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = EnrichService::new();
//!
//!     let config = ScraperConfig::from_env()
//!         .with_chunk_size(5)
//!         .with_skip_confirmation(true);
//!     let request = EnrichRequest::new("./data/input/jobs.csv").with_config(config);
//!
//!     let report = service.call(request).await.unwrap();
//!     println!("saved: {:?} ({} rows)", report.output_path, report.processed);
//! }
//! ```
//!
//! # パイプラインを直接使う例
//!
//! ```rust,ignore
//! use lancers_scraper::pipeline::{AlwaysContinue, Pipeline};
//! use lancers_scraper::{LancersBrowser, ScraperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let batch = lancers_scraper::sink::read_batch("jobs.csv".as_ref()).unwrap();
//!     let browser = LancersBrowser::open(ScraperConfig::from_env()).await.unwrap();
//!
//!     let mut pipeline = Pipeline::new(browser, Box::new(AlwaysContinue), 10).unwrap();
//!     let report = pipeline.run(&batch).await;
//!     println!("enriched: {}/{}", report.enriched, report.processed());
//! }
//! ```

pub mod config;
pub mod error;
pub mod lancers;
pub mod pipeline;
pub mod retry;
pub mod row;
pub mod search;
pub mod service;
pub mod sink;
pub mod traits;
pub mod upload;

// 主要な型をリエクスポート
pub use config::{Credentials, ScraperConfig, UploadTarget};
pub use error::ScraperError;
pub use lancers::{LancersBrowser, RawDetail, SearchTarget, WorkCard};
pub use row::{Batch, Row};
pub use service::{EnrichReport, EnrichRequest, EnrichService};
pub use traits::{DetailSession, ListingSession};
pub use upload::{DriveUploader, Uploader};

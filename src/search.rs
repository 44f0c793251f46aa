//! 検索一覧の取得（ページ送り・並列検索）

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, FixedOffset};
use futures::future::join_all;
use tracing::{info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::lancers::parser::parse_work_card;
use crate::lancers::{LancersBrowser, SearchTarget};
use crate::pipeline::{finalize, progress_bar, AlwaysContinue, FinalOutput, OutputSchema, Pipeline};
use crate::row::{Batch, Row};
use crate::traits::{DetailSession, ListingSession};

/// 検索結果をページ順に集める
///
/// 空のページ、`max_pages` 到達、`max_items` 件到達のいずれかで終了する。
/// 同じURLの案件が複数ページに現れた場合は最初の1件だけ残す。
pub async fn collect<S>(
    session: &mut S,
    target: &SearchTarget,
    max_pages: u32,
    max_items: Option<usize>,
    scraped_at: &DateTime<FixedOffset>,
) -> Result<Vec<Row>, ScraperError>
where
    S: ListingSession + ?Sized,
{
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for page in 1..=max_pages {
        let cards = session.search_page(target, page).await?;
        if cards.is_empty() {
            info!("ページ {} に案件がないため終了します", page);
            break;
        }

        let found = cards.len();
        for card in cards {
            if !card.url.is_empty() && !seen.insert(card.url.clone()) {
                continue;
            }
            rows.push(parse_work_card(&card, scraped_at));
            if max_items.is_some_and(|max| rows.len() >= max) {
                info!("最大取得件数 {} 件に達しました", rows.len());
                return Ok(rows);
            }
        }
        info!("ページ {}: {}件 (累計 {}件)", page, found, rows.len());
    }

    Ok(rows)
}

/// ブラウザを開いて1件の検索を実行する
pub async fn run_search(
    config: &ScraperConfig,
    target: &SearchTarget,
    scraped_at: &DateTime<FixedOffset>,
) -> Result<Vec<Row>, ScraperError> {
    info!("検索開始: {}", target.label());
    let mut browser = LancersBrowser::open(config.clone()).await?;
    let result = collect(
        &mut browser,
        target,
        config.max_pages,
        config.max_items,
        scraped_at,
    )
    .await;
    browser.close().await?;

    let rows = result?;
    info!("検索完了: {} ({}件)", target.label(), rows.len());
    Ok(rows)
}

/// 検索結果の各案件について詳細情報も取得する
///
/// 一覧の行をそのまま入力バッチにして、確認なしで詳細取得パイプラインに流す。
pub async fn run_search_with_details(
    config: &ScraperConfig,
    target: &SearchTarget,
    scraped_at: &DateTime<FixedOffset>,
) -> Result<FinalOutput, ScraperError> {
    config.validate()?;
    info!("検索開始（詳細取得あり）: {}", target.label());

    let mut browser = LancersBrowser::open(config.clone()).await?;
    let listing = match collect(
        &mut browser,
        target,
        config.max_pages,
        config.max_items,
        scraped_at,
    )
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            browser.close().await?;
            return Err(e);
        }
    };

    let batch = Batch::from_rows(listing);
    info!("{}件の案件の詳細情報を取得します", batch.len());

    let mut pipeline = Pipeline::new(browser, Box::new(AlwaysContinue), config.chunk_size)?
        .with_progress(progress_bar(batch.len() as u64));
    let report = pipeline.run(&batch).await;
    pipeline.into_session().close().await?;

    Ok(finalize(report, &batch, &OutputSchema::detail()))
}

/// 複数の検索を並行して実行する
///
/// 検索ごとに `search` を呼び、失敗した検索は空の結果として扱う。
/// 結果は `targets` と同じ順に並ぶ。
pub async fn search_many<F, Fut>(
    targets: &[SearchTarget],
    search: F,
) -> Vec<(SearchTarget, Vec<Row>)>
where
    F: Fn(SearchTarget) -> Fut,
    Fut: Future<Output = Result<Vec<Row>, ScraperError>>,
{
    let jobs = targets.iter().map(|target| {
        let job = search(target.clone());
        async move {
            let rows = match job.await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("検索に失敗しました ({}): {}", target.label(), e);
                    Vec::new()
                }
            };
            (target.clone(), rows)
        }
    });

    join_all(jobs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lancers::WorkCard;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 4, 21, 9, 0, 0)
            .unwrap()
    }

    fn card(id: usize) -> WorkCard {
        WorkCard {
            title: format!("案件{}", id),
            url: format!("https://www.lancers.jp/work/detail/{}", id),
            ..Default::default()
        }
    }

    /// ページ番号ごとの固定結果を返す
    struct FakeListing {
        pages: Vec<Vec<WorkCard>>,
        requested: Vec<u32>,
    }

    impl FakeListing {
        fn new(pages: Vec<Vec<WorkCard>>) -> Self {
            Self {
                pages,
                requested: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ListingSession for FakeListing {
        async fn search_page(
            &mut self,
            _target: &SearchTarget,
            page: u32,
        ) -> Result<Vec<WorkCard>, ScraperError> {
            self.requested.push(page);
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_collect_stops_on_empty_page() {
        let mut session = FakeListing::new(vec![vec![card(1), card(2)], vec![card(3)]]);
        let rows = collect(&mut session, &SearchTarget::DataTask, 5, None, &now())
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(session.requested, vec![1, 2, 3]);
        assert_eq!(rows[2].get("work_id"), Some("3"));
        assert_eq!(rows[0].get("price"), Some("報酬未設定"));
    }

    #[tokio::test]
    async fn test_collect_respects_page_and_item_limits() {
        let pages = vec![vec![card(1), card(2)], vec![card(3), card(4)], vec![card(5)]];

        let mut session = FakeListing::new(pages.clone());
        let rows = collect(&mut session, &SearchTarget::DataTask, 2, None, &now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(session.requested, vec![1, 2]);

        let mut session = FakeListing::new(pages);
        let rows = collect(&mut session, &SearchTarget::DataTask, 5, Some(3), &now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(session.requested, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_collect_drops_duplicate_urls() {
        let mut session = FakeListing::new(vec![vec![card(1), card(2)], vec![card(2), card(3)]]);
        let rows = collect(&mut session, &SearchTarget::DataTask, 5, None, &now())
            .await
            .unwrap();

        let ids: Vec<_> = rows.iter().map(|r| r.get_or_empty("work_id")).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_search_many_keeps_order_and_isolates_failures() {
        let targets = vec![
            SearchTarget::Keyword("python".into()),
            SearchTarget::Keyword("broken".into()),
            SearchTarget::DataTask,
        ];

        let results = search_many(&targets, |target| async move {
            match &target {
                SearchTarget::Keyword(q) if q == "broken" => {
                    Err(ScraperError::Navigation("unreachable".into()))
                }
                _ => Ok(vec![Row::new().with("query", target.label())]),
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, targets[0]);
        assert_eq!(results[0].1.len(), 1);
        assert!(results[1].1.is_empty());
        assert_eq!(results[2].1.len(), 1);
    }
}

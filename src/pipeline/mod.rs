//! チャンク単位の詳細取得パイプライン
//!
//! 入力行をグループに分けて順番に処理し、各行の詳細を取得して元の行に重ねる。
//! 1行の失敗は元の行のまま残して続行し、セッション障害・中断時もそれまでの結果は保持する。

mod columns;
mod policy;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::error::ScraperError;
use crate::lancers::parser::parse_work_detail;
use crate::row::{Batch, Row};
use crate::traits::DetailSession;

pub use columns::{finalize, resolve_columns, FinalOutput, OutputSchema};
pub use policy::{AlwaysContinue, AskOperator, ContinuationPolicy};

/// 日本時間の現在時刻
pub fn jst_now() -> DateTime<FixedOffset> {
    let jst = FixedOffset::east_opt(9 * 3600).unwrap();
    Utc::now().with_timezone(&jst)
}

/// 実行の終了理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// 全グループを処理した
    Completed,
    /// 継続判定で中断した
    Aborted { completed_groups: usize },
    /// 外部からの割り込み（Ctrl-C など）
    Interrupted,
    /// セッション障害で停止した
    Failed(String),
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// 実行結果
#[derive(Debug, Clone)]
pub struct RunReport {
    /// 処理済みの行（入力順）
    pub rows: Vec<Row>,
    pub enriched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub completed_groups: usize,
    pub total_groups: usize,
    pub status: RunStatus,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.rows.len()
    }
}

enum RowOutcome {
    Enriched(Row),
    Skipped,
    Failed,
    Fatal(ScraperError),
}

/// 実行中の蓄積状態
///
/// 実行フューチャーの外に置くことで、割り込みで中断されても中身が残る。
#[derive(Default)]
struct RunState {
    accumulator: Vec<Row>,
    current_group: Vec<Row>,
    enriched: usize,
    skipped: usize,
    failed: usize,
    completed_groups: usize,
}

impl RunState {
    fn commit_group(&mut self) {
        self.accumulator.append(&mut self.current_group);
        self.completed_groups += 1;
    }

    fn into_report(mut self, status: RunStatus, total_groups: usize) -> RunReport {
        if !self.current_group.is_empty() {
            info!(
                "途中のグループで処理済みの{}件も結果に含めます",
                self.current_group.len()
            );
            self.accumulator.append(&mut self.current_group);
        }
        RunReport {
            rows: self.accumulator,
            enriched: self.enriched,
            skipped: self.skipped,
            failed: self.failed,
            completed_groups: self.completed_groups,
            total_groups,
            status,
        }
    }
}

/// 進捗バー（行単位）
pub fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

pub struct Pipeline<S> {
    session: S,
    /// 判定は専用スレッドで行うため共有する（標準入力待ちで非同期処理を止めない）
    policy: Arc<Mutex<Box<dyn ContinuationPolicy>>>,
    chunk_size: usize,
    progress: ProgressBar,
    clock: fn() -> DateTime<FixedOffset>,
}

impl<S: DetailSession> Pipeline<S> {
    pub fn new(
        session: S,
        policy: Box<dyn ContinuationPolicy>,
        chunk_size: usize,
    ) -> Result<Self, ScraperError> {
        if chunk_size == 0 {
            return Err(ScraperError::Config(
                "チャンクサイズは1以上を指定してください".into(),
            ));
        }
        Ok(Self {
            session,
            policy: Arc::new(Mutex::new(policy)),
            chunk_size,
            progress: ProgressBar::hidden(),
            clock: jst_now,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<FixedOffset>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// バッチ全体を処理する
    pub async fn run(&mut self, batch: &Batch) -> RunReport {
        self.run_until(batch, std::future::pending::<()>()).await
    }

    /// `interrupt` が完了した時点で処理を打ち切る
    ///
    /// 打ち切り時もそれまでに処理した行は結果に残る。取得中だった行は含まれない。
    pub async fn run_until<F>(&mut self, batch: &Batch, interrupt: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let total_groups = batch.len().div_ceil(self.chunk_size);
        let mut state = RunState::default();

        let status = tokio::select! {
            status = self.drive(batch, total_groups, &mut state) => status,
            _ = interrupt => {
                warn!("割り込みを受けたため処理を中断します");
                RunStatus::Interrupted
            }
        };
        self.progress.finish_and_clear();

        let report = state.into_report(status, total_groups);
        info!(
            "処理終了: {}件処理 (詳細取得 {}件, スキップ {}件, 失敗 {}件), {}/{}グループ完了",
            report.processed(),
            report.enriched,
            report.skipped,
            report.failed,
            report.completed_groups,
            report.total_groups
        );
        report
    }

    async fn drive(&mut self, batch: &Batch, total_groups: usize, state: &mut RunState) -> RunStatus {
        self.progress.set_length(batch.len() as u64);
        let total_rows = batch.len();

        for (index, group) in batch.rows().chunks(self.chunk_size).enumerate() {
            let number = index + 1;
            let start = index * self.chunk_size;
            info!(
                "グループ {}/{} を処理中 (行 {}-{}/{})",
                number,
                total_groups,
                start + 1,
                start + group.len(),
                total_rows
            );

            for (offset, row) in group.iter().enumerate() {
                let position = start + offset + 1;
                match self.process_row(row, position, total_rows).await {
                    RowOutcome::Enriched(merged) => {
                        state.enriched += 1;
                        state.current_group.push(merged);
                    }
                    RowOutcome::Skipped => {
                        state.skipped += 1;
                        state.current_group.push(row.clone());
                    }
                    RowOutcome::Failed => {
                        state.failed += 1;
                        state.current_group.push(row.clone());
                    }
                    RowOutcome::Fatal(e) => {
                        error!("セッション障害のため処理を停止します (行 {}): {}", position, e);
                        return RunStatus::Failed(e.to_string());
                    }
                }
                self.progress.inc(1);
            }

            state.commit_group();

            if number == total_groups {
                break;
            }

            if !self.checkpoint(number, total_groups).await {
                info!("グループ {}/{} で処理を中断しました", number, total_groups);
                return RunStatus::Aborted {
                    completed_groups: number,
                };
            }
        }

        RunStatus::Completed
    }

    /// グループ間の継続判定
    ///
    /// 判定（標準入力の読み込みなど）はブロッキングなので別スレッドで行い、
    /// 結果を待つ間も割り込みを受け付ける。
    fn checkpoint(&self, completed_group: usize, total_groups: usize) -> impl Future<Output = bool> {
        let (tx, rx) = oneshot::channel();
        let policy = Arc::clone(&self.policy);
        let progress = self.progress.clone();

        let spawned = thread::Builder::new()
            .name("continuation-check".into())
            .spawn(move || {
                let mut policy = policy.lock().unwrap_or_else(PoisonError::into_inner);
                let proceed =
                    progress.suspend(|| policy.should_continue(completed_group, total_groups));
                let _ = tx.send(proceed);
            });

        async move {
            if let Err(e) = spawned {
                warn!("継続確認を開始できませんでした: {}", e);
                return false;
            }
            rx.await.unwrap_or_else(|_| {
                warn!("継続確認が異常終了しました");
                false
            })
        }
    }

    async fn process_row(&mut self, row: &Row, position: usize, total: usize) -> RowOutcome {
        let Some(url) = row.url() else {
            info!("URL {}/{}: URLが空のためスキップします", position, total);
            return RowOutcome::Skipped;
        };

        info!("URL {}/{} を処理中: {}", position, total, url);
        match self.session.fetch_detail(url).await {
            Ok(detail) => {
                let parsed = parse_work_detail(&detail, &(self.clock)());
                RowOutcome::Enriched(row.merged_with(&parsed))
            }
            Err(e) if e.is_session_fatal() => RowOutcome::Fatal(e),
            Err(e) => {
                warn!("URL {} の詳細情報を取得できませんでした: {}", url, e);
                RowOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::lancers::RawDetail;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fixed_clock() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 4, 21, 12, 0, 0)
            .unwrap()
    }

    #[derive(Default)]
    struct FakeSession {
        failing: HashSet<String>,
        fatal: HashSet<String>,
        hanging: HashSet<String>,
        fetched: Vec<String>,
    }

    impl FakeSession {
        fn failing(mut self, url: &str) -> Self {
            self.failing.insert(url.to_string());
            self
        }

        fn fatal(mut self, url: &str) -> Self {
            self.fatal.insert(url.to_string());
            self
        }

        fn hanging(mut self, url: &str) -> Self {
            self.hanging.insert(url.to_string());
            self
        }
    }

    #[async_trait]
    impl DetailSession for FakeSession {
        async fn login(&mut self, _credentials: &Credentials) -> Result<bool, ScraperError> {
            Ok(true)
        }

        async fn fetch_detail(&mut self, url: &str) -> Result<RawDetail, ScraperError> {
            self.fetched.push(url.to_string());
            if self.hanging.contains(url) {
                return std::future::pending().await;
            }
            if self.fatal.contains(url) {
                return Err(ScraperError::Session("browser closed".into()));
            }
            if self.failing.contains(url) {
                return Err(ScraperError::Timeout(url.to_string()));
            }
            Ok(RawDetail {
                title: format!("title of {}", url),
                url: url.to_string(),
                work_id: String::new(),
                deadline_raw: "2025年4月21日 18:17".into(),
                delivery_date_raw: String::new(),
                people: "(募集人数2人)".into(),
                period: String::new(),
            })
        }

        async fn close(&mut self) -> Result<(), ScraperError> {
            Ok(())
        }
    }

    fn url(n: usize) -> String {
        format!("https://www.lancers.jp/work/detail/{}", n)
    }

    fn batch_of(n: usize) -> Batch {
        Batch::from_rows(
            (1..=n)
                .map(|i| Row::new().with("url", url(i)).with("memo", format!("m{}", i)))
                .collect(),
        )
    }

    fn pipeline(session: FakeSession, policy: Box<dyn ContinuationPolicy>, chunk: usize) -> Pipeline<FakeSession> {
        Pipeline::new(session, policy, chunk)
            .unwrap()
            .with_clock(fixed_clock)
    }

    fn urls(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.get_or_empty("url").to_string()).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_for_all_chunk_sizes() {
        let batch = batch_of(5);
        for chunk in 1..=7 {
            let mut p = pipeline(FakeSession::default(), Box::new(AlwaysContinue), chunk);
            let report = p.run(&batch).await;

            assert_eq!(urls(&report.rows), urls(batch.rows()), "chunk={}", chunk);
            assert_eq!(report.enriched, 5);
            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(report.total_groups, 5usize.div_ceil(chunk));
        }
    }

    #[tokio::test]
    async fn test_merged_row_keeps_original_fields() {
        let batch = batch_of(1);
        let mut p = pipeline(FakeSession::default(), Box::new(AlwaysContinue), 10);
        let report = p.run(&batch).await;

        let row = &report.rows[0];
        assert_eq!(row.get("memo"), Some("m1"));
        assert_eq!(row.get("title"), Some("title of https://www.lancers.jp/work/detail/1"));
        assert_eq!(row.get("people"), Some("2"));
        assert_eq!(row.get("deadline"), Some("2025-04-21 18:17"));
        assert_eq!(row.get("deadline_raw"), Some("2025年4月21日 18:17"));
        assert_eq!(row.get("delivery_date_raw"), Some(""));
        assert_eq!(row.get("work_id"), Some("1"));
        assert_eq!(row.get("scraped_at"), Some("2025-04-21 12:00:00"));
    }

    #[tokio::test]
    async fn test_failing_row_degrades_to_original() {
        let batch = batch_of(5);
        let session = FakeSession::default().failing(&url(3));
        let mut p = pipeline(session, Box::new(AlwaysContinue), 2);
        let report = p.run(&batch).await;

        assert_eq!(report.rows.len(), 5);
        assert_eq!(report.rows[2], batch.rows()[2]);
        assert_eq!(report.enriched, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_after_first_group_keeps_only_that_group() {
        let batch = batch_of(6);
        let policy = |completed: usize, _total: usize| completed < 1;
        let mut p = pipeline(FakeSession::default(), Box::new(policy), 2);
        let report = p.run(&batch).await;

        assert_eq!(report.rows.len(), 2);
        assert_eq!(urls(&report.rows), vec![url(1), url(2)]);
        assert_eq!(report.status, RunStatus::Aborted { completed_groups: 1 });
        assert_eq!(p.session_mut().fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_policy_is_asked_between_groups_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = move |_completed: usize, _total: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        };

        let batch = batch_of(5);
        let mut p = pipeline(FakeSession::default(), Box::new(policy), 2);
        let report = p.run(&batch).await;

        assert_eq!(report.total_groups, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_url_is_skipped_without_fetch() {
        let batch = Batch::from_rows(vec![
            Row::new().with("url", "https://x/work/detail/123"),
            Row::new().with("url", ""),
            Row::new().with("url", "https://x/work/detail/456"),
        ]);
        let mut p = pipeline(FakeSession::default(), Box::new(AlwaysContinue), 2);
        let report = p.run(&batch).await;

        assert_eq!(report.enriched, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[1], batch.rows()[1]);
        assert_eq!(
            p.session_mut().fetched,
            vec!["https://x/work/detail/123", "https://x/work/detail/456"]
        );
    }

    #[tokio::test]
    async fn test_session_failure_stops_and_keeps_progress() {
        let batch = batch_of(6);
        let session = FakeSession::default().fatal(&url(4));
        let mut p = pipeline(session, Box::new(AlwaysContinue), 2);
        let report = p.run(&batch).await;

        assert!(matches!(report.status, RunStatus::Failed(_)));
        assert_eq!(urls(&report.rows), vec![url(1), url(2), url(3)]);
        assert_eq!(report.completed_groups, 1);
        assert_eq!(report.enriched, 3);
    }

    #[tokio::test]
    async fn test_interrupt_keeps_rows_completed_so_far() {
        let batch = batch_of(6);
        let session = FakeSession::default().hanging(&url(4));
        let mut p = pipeline(session, Box::new(AlwaysContinue), 2);
        let report = p
            .run_until(&batch, tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(report.status, RunStatus::Interrupted);
        assert_eq!(urls(&report.rows), vec![url(1), url(2), url(3)]);
        assert_eq!(report.completed_groups, 1);
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting_for_continuation() {
        let batch = batch_of(4);
        let slow_answer = |_completed: usize, _total: usize| {
            std::thread::sleep(Duration::from_millis(300));
            true
        };
        let mut p = pipeline(FakeSession::default(), Box::new(slow_answer), 2);
        let report = p
            .run_until(&batch, tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(report.status, RunStatus::Interrupted);
        assert_eq!(urls(&report.rows), vec![url(1), url(2)]);
        assert_eq!(report.completed_groups, 1);
        assert_eq!(p.session_mut().fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_rows() {
        let batch = batch_of(3);
        let mut first = pipeline(FakeSession::default(), Box::new(AlwaysContinue), 2);
        let mut second = pipeline(FakeSession::default(), Box::new(AlwaysContinue), 2);

        assert_eq!(first.run(&batch).await.rows, second.run(&batch).await.rows);
    }

    #[tokio::test]
    async fn test_finalize_uses_resolved_columns() {
        let batch = Batch::new(
            vec!["url".into(), "memo".into()],
            vec![Row::new().with("url", url(1)).with("memo", "m")],
        );
        let mut p = pipeline(FakeSession::default(), Box::new(AlwaysContinue), 1);
        let report = p.run(&batch).await;
        let output = finalize(report, &batch, &OutputSchema::detail());

        assert!(!output.interrupted);
        assert_eq!(output.processed, 1);
        assert_eq!(output.enriched, 1);
        assert_eq!(
            output.columns,
            vec![
                "scraped_at",
                "title",
                "url",
                "deadline_raw",
                "delivery_date_raw",
                "people",
                "memo"
            ]
        );
    }

    #[tokio::test]
    async fn test_finalize_marks_aborted_run_interrupted() {
        let batch = batch_of(4);
        let policy = |_completed: usize, _total: usize| false;
        let mut p = pipeline(FakeSession::default(), Box::new(policy), 2);
        let report = p.run(&batch).await;
        let output = finalize(report, &batch, &OutputSchema::detail());

        assert!(output.interrupted);
        assert_eq!(output.rows.len(), 2);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = Pipeline::new(FakeSession::default(), Box::new(AlwaysContinue), 0);
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }
}

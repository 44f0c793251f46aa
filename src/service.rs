use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::{info, warn};

use crate::config::{ScraperConfig, UploadTarget};
use crate::error::ScraperError;
use crate::lancers::LancersBrowser;
use crate::pipeline::{
    finalize, progress_bar, AlwaysContinue, AskOperator, ContinuationPolicy, OutputSchema,
    Pipeline, RunStatus,
};
use crate::sink::{output_path, read_batch, write_csv};
use crate::traits::DetailSession;
use crate::upload::{DriveUploader, Uploader};

/// 詳細取得リクエスト
#[derive(Debug, Clone)]
pub struct EnrichRequest {
    /// 入力CSV（`url` 列を含む）
    pub input: PathBuf,
    pub config: ScraperConfig,
}

impl EnrichRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            config: ScraperConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_dir = path.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn with_skip_confirmation(mut self, skip: bool) -> Self {
        self.config.skip_confirmation = skip;
        self
    }
}

/// 詳細取得結果
#[derive(Debug, Clone)]
pub struct EnrichReport {
    pub output_path: PathBuf,
    pub processed: usize,
    pub enriched: usize,
    pub interrupted: bool,
    pub status: RunStatus,
    /// アップロード先のファイルID（アップロードした場合のみ）
    pub uploaded: Option<String>,
}

/// tower::Serviceを実装した詳細取得サービス
#[derive(Debug, Clone, Default)]
pub struct EnrichService;

impl EnrichService {
    pub fn new() -> Self {
        Self
    }
}

/// Ctrl-C を待つ。シグナルを待てない環境では完了しない
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-Cの監視を開始できませんでした: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn upload_output(target: &UploadTarget, path: &Path) -> Result<String, ScraperError> {
    DriveUploader::from_target(target).await?.upload(path).await
}

async fn enrich(req: EnrichRequest) -> Result<EnrichReport, ScraperError> {
    let EnrichRequest { input, config } = req;
    config.validate()?;

    let batch = read_batch(&input)?;
    info!(
        "{}件の行を読み込みました (URLあり {}件, チャンクサイズ {})",
        batch.len(),
        batch.url_count(),
        config.chunk_size
    );

    let browser = LancersBrowser::open(config.clone()).await?;

    let policy: Box<dyn ContinuationPolicy> = if config.skip_confirmation {
        Box::new(AlwaysContinue)
    } else {
        Box::new(AskOperator::stdin())
    };

    let mut pipeline = Pipeline::new(browser, policy, config.chunk_size)?
        .with_progress(progress_bar(batch.len() as u64));
    let report = pipeline.run_until(&batch, interrupt_signal()).await;

    if let Err(e) = pipeline.into_session().close().await {
        warn!("ブラウザの終了に失敗しました: {}", e);
    }

    let output = finalize(report, &batch, &OutputSchema::detail());
    let path = output_path(&config.output_dir, &input, output.interrupted);
    write_csv(&path, &output.columns, &output.rows)?;

    let uploaded = match &config.upload {
        Some(target) => match upload_output(target, &path).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Google Driveへのアップロードに失敗しました: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(EnrichReport {
        output_path: path,
        processed: output.processed,
        enriched: output.enriched,
        interrupted: output.interrupted,
        status: output.status,
        uploaded,
    })
}

impl Service<EnrichRequest> for EnrichService {
    type Response = EnrichReport;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: EnrichRequest) -> Self::Future {
        info!("詳細取得リクエスト受信: input={:?}", req.input);

        Box::pin(async move {
            let report = enrich(req).await?;

            info!(
                "詳細取得完了: path={:?}, {}件処理, {}件取得{}",
                report.output_path,
                report.processed,
                report.enriched,
                if report.interrupted { " (中断)" } else { "" }
            );

            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrich_request_builder() {
        let req = EnrichRequest::new("/tmp/jobs.csv")
            .with_output_dir("/tmp/out")
            .with_chunk_size(5)
            .with_headless(false)
            .with_skip_confirmation(true);

        assert_eq!(req.input, PathBuf::from("/tmp/jobs.csv"));
        assert_eq!(req.config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(req.config.chunk_size, 5);
        assert!(!req.config.headless);
        assert!(req.config.skip_confirmation);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected_before_run() {
        let mut service = EnrichService::new();
        let req = EnrichRequest::new("/nonexistent/jobs.csv").with_chunk_size(0);

        let result = service.call(req).await;
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_input_rejected_before_run() {
        let mut service = EnrichService::new();
        let req = EnrichRequest::new("/nonexistent/jobs.csv");

        let result = service.call(req).await;
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }

    #[tokio::test]
    #[ignore] // 実環境テスト用: LANCERS_INPUT_CSV=... cargo test test_enrich_live -- --ignored --nocapture
    async fn test_enrich_live() {
        let input = std::env::var("LANCERS_INPUT_CSV").expect("LANCERS_INPUT_CSV not set");
        let config = ScraperConfig::from_env()
            .with_chunk_size(2)
            .with_skip_confirmation(true);

        let mut service = EnrichService::new();
        let report = service
            .call(EnrichRequest::new(input).with_config(config))
            .await
            .expect("enrich failed");

        println!("{:#?}", report);
        assert!(report.output_path.exists());
    }
}

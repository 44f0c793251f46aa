use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tower::Service;
use tracing::{info, warn};

use lancers_scraper::pipeline::{jst_now, OutputSchema};
use lancers_scraper::search::{run_search, run_search_with_details, search_many};
use lancers_scraper::sink::{clean_dir, extract_urls, listing_filename, write_csv};
use lancers_scraper::{EnrichRequest, EnrichService, ScraperConfig, ScraperError, SearchTarget};

#[derive(Parser)]
#[command(name = "lancers-scraper", about = "Lancers 案件スクレイパー")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// ブラウザ関連の共通オプション
#[derive(Args)]
struct BrowserArgs {
    /// ブラウザ画面を表示する
    #[arg(long)]
    no_headless: bool,
    /// 出力ディレクトリ
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// ログイン失敗時のスクリーンショットなどを出力する
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 案件を検索して一覧をCSVに保存する
    Search {
        /// 検索キーワード（複数指定で並列検索）
        queries: Vec<String>,
        /// データ検索（タスク）
        #[arg(long)]
        data: bool,
        /// データ検索（プロジェクト）
        #[arg(long)]
        data_project: bool,
        /// 各案件の詳細情報も取得する
        #[arg(long)]
        with_details: bool,
        /// 最大ページ数
        #[arg(short = 'p', long)]
        max_pages: Option<u32>,
        /// 最大取得件数
        #[arg(short = 'n', long)]
        max_items: Option<usize>,
        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// CSVからURL列を取り出す
    ExtractUrls {
        input: PathBuf,
        /// URLが記載されている列名
        #[arg(short, long, default_value = "url")]
        column: String,
        /// 出力ファイル（省略時は標準出力）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 出力ディレクトリ内のCSVのタイトルを整えて `_cleaned` 付きで保存する
    Clean {
        /// 対象ディレクトリ（省略時は設定の出力ディレクトリ）
        dir: Option<PathBuf>,
    },
    /// CSVのURLごとに詳細情報を取得する
    Enrich {
        input: PathBuf,
        /// 1グループあたりの行数
        #[arg(short, long)]
        chunk_size: Option<usize>,
        /// グループ間の確認をスキップする
        #[arg(short = 'y', long)]
        yes: bool,
        #[command(flatten)]
        browser: BrowserArgs,
    },
}

fn base_config(args: &BrowserArgs) -> ScraperConfig {
    let mut config = ScraperConfig::from_env().with_debug(args.debug);
    if args.no_headless {
        config = config.with_headless(false);
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir.clone());
    }
    config
}

fn search_targets(queries: Vec<String>, data: bool, data_project: bool) -> Vec<SearchTarget> {
    let mut targets: Vec<SearchTarget> = queries.into_iter().map(SearchTarget::Keyword).collect();
    if data {
        targets.push(SearchTarget::DataTask);
    }
    if data_project {
        targets.push(SearchTarget::DataProject);
    }
    targets
}

#[tokio::main]
async fn main() -> Result<(), ScraperError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            queries,
            data,
            data_project,
            with_details,
            max_pages,
            max_items,
            browser,
        } => {
            let mut config = base_config(&browser).with_max_items(max_items);
            if let Some(pages) = max_pages {
                config = config.with_max_pages(pages);
            }
            config.validate()?;

            let targets = search_targets(queries, data, data_project);
            if targets.is_empty() {
                return Err(ScraperError::Config(
                    "検索キーワードまたは --data / --data-project を指定してください".into(),
                ));
            }

            let now = jst_now();
            let path = config.output_dir.join(listing_filename(&now));

            if with_details {
                let [target] = targets.as_slice() else {
                    return Err(ScraperError::Config(
                        "詳細取得付きの検索は1件ずつ実行してください".into(),
                    ));
                };
                let output = run_search_with_details(&config, target, &now).await?;
                write_csv(&path, &output.columns, &output.rows)?;
                println!(
                    "{}件を保存しました（詳細取得 {}件）: {}",
                    output.processed,
                    output.enriched,
                    path.display()
                );
                return Ok(());
            }

            let results = search_many(&targets, |target| {
                let config = config.clone();
                async move { run_search(&config, &target, &now).await }
            })
            .await;

            let rows: Vec<_> = results.into_iter().flat_map(|(_, rows)| rows).collect();
            if rows.is_empty() {
                warn!("保存するデータがありません");
                return Ok(());
            }

            let columns = OutputSchema::listing().resolve(&[], &rows);
            write_csv(&path, &columns, &rows)?;
            println!("{}件を保存しました: {}", rows.len(), path.display());
        }
        Commands::ExtractUrls {
            input,
            column,
            output,
        } => {
            let urls = extract_urls(&input, &column)?;
            match output {
                Some(path) => {
                    let mut content = urls.join("\n");
                    content.push('\n');
                    std::fs::write(&path, content)?;
                    info!("{}件のURLを保存しました: {}", urls.len(), path.display());
                }
                None => {
                    for url in &urls {
                        println!("{}", url);
                    }
                }
            }
        }
        Commands::Clean { dir } => {
            let dir = dir.unwrap_or_else(|| ScraperConfig::from_env().output_dir);
            let written = clean_dir(&dir)?;
            println!("{}件のファイルを処理しました: {}", written.len(), dir.display());
        }
        Commands::Enrich {
            input,
            chunk_size,
            yes,
            browser,
        } => {
            let mut config = base_config(&browser).with_skip_confirmation(yes);
            if let Some(size) = chunk_size {
                config = config.with_chunk_size(size);
            }

            let mut service = EnrichService::new();
            let report = service
                .call(EnrichRequest::new(input).with_config(config))
                .await?;

            let label = if report.interrupted {
                "中断したため途中までの結果を保存しました"
            } else {
                "すべての処理が完了しました"
            };
            println!(
                "{}: {}件処理, {}件の詳細を取得 -> {}",
                label,
                report.processed,
                report.enriched,
                report.output_path.display()
            );
        }
    }

    Ok(())
}

//! CSV入出力

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use tracing::{error, info, warn};

use crate::error::ScraperError;
use crate::lancers::fields;
use crate::lancers::parser::clean_title;
use crate::row::{Batch, Row, URL_FIELD};

const SCRAPED_SUFFIX: &str = "_scraped";
const INTERRUPTED_SUFFIX: &str = "_interrupted";
const CLEANED_SUFFIX: &str = "_cleaned";
const LISTING_PREFIX: &str = "lancers_jobs";

/// 入力CSVを読み込む
///
/// `url` 列が無いファイルは設定エラーとして扱う。
pub fn read_batch(path: &Path) -> Result<Batch, ScraperError> {
    if !path.is_file() {
        return Err(ScraperError::Config(format!(
            "入力ファイルが見つかりません: {}",
            path.display()
        )));
    }

    let (header, rows) = read_table(path)?;
    if !header.iter().any(|h| h == URL_FIELD) {
        return Err(ScraperError::Config(format!(
            "{} に url 列がありません",
            path.display()
        )));
    }

    info!("CSVファイルを読み込みました: {} ({}件)", path.display(), rows.len());
    Ok(Batch::new(header, rows))
}

/// ヘッダー付きCSVを列名と行に読み込む（列数の揃っていない行も許容）
fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Row>), ScraperError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = header
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), record.get(i).unwrap_or_default()))
            .collect();
        rows.push(row);
    }
    Ok((header, rows))
}

/// 保存済みCSVのタイトルを正規化して `<元の名前>_cleaned.csv` に書き出す
///
/// 行が無いファイルは何もしない。
pub fn clean_csv(path: &Path) -> Result<Option<PathBuf>, ScraperError> {
    let (header, rows) = read_table(path)?;
    if rows.is_empty() {
        warn!("データが空です: {}", path.display());
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned = path.with_file_name(format!("{}{}.csv", stem, CLEANED_SUFFIX));
    write_csv(&cleaned, &header, &rows).map(Some)
}

/// ディレクトリ内のCSVをすべて `clean_csv` にかける
///
/// 既に `_cleaned` の付いたファイルは対象外。1ファイルの失敗は警告にとどめる。
pub fn clean_dir(dir: &Path) -> Result<Vec<PathBuf>, ScraperError> {
    if !dir.is_dir() {
        return Err(ScraperError::Config(format!(
            "出力ディレクトリが見つかりません: {}",
            dir.display()
        )));
    }

    let mut targets: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .filter(|path| {
            !path
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().ends_with(CLEANED_SUFFIX))
        })
        .collect();
    targets.sort();

    let mut written = Vec::new();
    for path in targets {
        info!("処理中のファイル: {}", path.display());
        match clean_csv(&path) {
            Ok(Some(cleaned)) => written.push(cleaned),
            Ok(None) => {}
            Err(e) => warn!("{} のクリーニングに失敗しました: {}", path.display(), e),
        }
    }
    Ok(written)
}

/// 指定列の空でない値を取り出す
pub fn extract_urls(path: &Path, column: &str) -> Result<Vec<String>, ScraperError> {
    let mut reader = csv::Reader::from_path(path)?;
    let Some(index) = reader.headers()?.iter().position(|h| h == column) else {
        warn!("{} に {} 列がありません", path.display(), column);
        return Ok(Vec::new());
    };

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(index).map(str::trim).filter(|v| !v.is_empty()) {
            urls.push(value.to_string());
        }
    }

    info!(
        "CSVファイルからURLを抽出しました: {}, 件数: {}",
        path.display(),
        urls.len()
    );
    Ok(urls)
}

/// 詳細取得結果の出力先（`<入力ファイル名>_scraped.csv` / `_interrupted.csv`）
pub fn output_path(output_dir: &Path, input: &Path, interrupted: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let suffix = if interrupted {
        INTERRUPTED_SUFFIX
    } else {
        SCRAPED_SUFFIX
    };
    output_dir.join(format!("{}{}.csv", stem, suffix))
}

/// 検索結果のファイル名（`lancers_jobs_YYYYmmdd_HHMMSS.csv`）
pub fn listing_filename(now: &DateTime<FixedOffset>) -> String {
    format!("{}_{}.csv", LISTING_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

/// 列順に従ってCSVを書き出す
///
/// 一時ファイルに書いてからリネームするので、失敗しても既存ファイルは壊れない。
/// `title` 列は空白を正規化してから書く。
pub fn write_csv(path: &Path, columns: &[String], rows: &[Row]) -> Result<PathBuf, ScraperError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    let result = write_records(&tmp_path, columns, rows).and_then(|_| {
        fs::rename(&tmp_path, path)?;
        Ok(())
    });

    match result {
        Ok(()) => {
            info!("CSVファイルを保存しました: {} ({}件)", path.display(), rows.len());
            Ok(path.to_path_buf())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            error!(
                "CSVファイルの保存に失敗しました: {} ({}件未保存): {}",
                path.display(),
                rows.len(),
                e
            );
            Err(e)
        }
    }
}

fn write_records(path: &Path, columns: &[String], rows: &[Row]) -> Result<(), ScraperError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| {
                let value = row.get_or_empty(column);
                if column == fields::TITLE {
                    clean_title(value)
                } else {
                    value.to_string()
                }
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lancers-sink-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_output_path_labels() {
        let dir = Path::new("/out");
        let input = Path::new("/in/jobs.csv");
        assert_eq!(output_path(dir, input, false), PathBuf::from("/out/jobs_scraped.csv"));
        assert_eq!(
            output_path(dir, input, true),
            PathBuf::from("/out/jobs_interrupted.csv")
        );
    }

    #[test]
    fn test_listing_filename() {
        let now = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 4, 21, 8, 5, 9)
            .unwrap();
        assert_eq!(listing_filename(&now), "lancers_jobs_20250421_080509.csv");
    }

    #[test]
    fn test_read_batch_keeps_header_order() {
        let dir = temp_dir("read");
        let path = dir.join("input.csv");
        fs::write(&path, "title,url,memo\nA,https://x/work/detail/1,m1\nB,,m2\n").unwrap();

        let batch = read_batch(&path).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.original_keys(), strings(&["title", "url", "memo"]));
        assert_eq!(batch.rows()[0].get("memo"), Some("m1"));
        assert_eq!(batch.url_count(), 1);
    }

    #[test]
    fn test_read_batch_rejects_missing_file_and_url_column() {
        let dir = temp_dir("reject");
        assert!(matches!(
            read_batch(&dir.join("missing.csv")),
            Err(ScraperError::Config(_))
        ));

        let path = dir.join("no_url.csv");
        fs::write(&path, "title\nA\n").unwrap();
        assert!(matches!(read_batch(&path), Err(ScraperError::Config(_))));
    }

    #[test]
    fn test_write_csv_follows_columns_and_cleans_title() {
        let dir = temp_dir("write");
        let path = dir.join("nested").join("out.csv");
        let rows = vec![
            Row::new()
                .with("url", "https://x/work/detail/1")
                .with("title", "  Python\n 案件 ")
                .with("work_id", "1"),
            Row::new().with("url", ""),
        ];

        write_csv(&path, &strings(&["title", "url", "people"]), &rows).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "title,url,people\nPython 案件,https://x/work/detail/1,\n,,\n"
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_write_csv_replaces_previous_file() {
        let dir = temp_dir("replace");
        let path = dir.join("out.csv");
        fs::write(&path, "old\n").unwrap();

        write_csv(&path, &strings(&["url"]), &[Row::new().with("url", "u")]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "url\nu\n");
    }

    #[test]
    fn test_extract_urls_skips_blank_values() {
        let dir = temp_dir("urls");
        let path = dir.join("list.csv");
        fs::write(&path, "url,title\nhttps://a,A\n,B\n  https://b ,C\n").unwrap();

        assert_eq!(
            extract_urls(&path, "url").unwrap(),
            strings(&["https://a", "https://b"])
        );
        assert!(extract_urls(&path, "link").unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_leaves_previous_file_untouched() {
        let dir = temp_dir("keep");
        let path = dir.join("out.csv");
        fs::write(&path, "url\nprevious\n").unwrap();
        // 一時ファイルの位置をディレクトリで塞いで書き込みを失敗させる
        fs::create_dir_all(path.with_extension("csv.tmp").join("blocker")).unwrap();

        let result = write_csv(&path, &strings(&["url"]), &[Row::new().with("url", "new")]);

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "url\nprevious\n");
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = temp_dir("rename");
        // 出力先が空でないディレクトリなのでリネームが失敗する
        let path = dir.join("out.csv");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("keep.txt"), "keep").unwrap();

        let result = write_csv(&path, &strings(&["url"]), &[Row::new().with("url", "u")]);

        assert!(result.is_err());
        assert!(!path.with_extension("csv.tmp").exists());
        assert_eq!(fs::read_to_string(path.join("keep.txt")).unwrap(), "keep");
    }

    #[test]
    fn test_clean_dir_writes_cleaned_copies() {
        let dir = temp_dir("clean");
        fs::write(dir.join("jobs.csv"), "title,memo\n\"  a\n  b \",m\n").unwrap();
        fs::write(dir.join("empty.csv"), "title\n").unwrap();
        fs::write(dir.join("old_cleaned.csv"), "title\nx\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let written = clean_dir(&dir).unwrap();

        assert_eq!(written, vec![dir.join("jobs_cleaned.csv")]);
        assert_eq!(
            fs::read_to_string(dir.join("jobs_cleaned.csv")).unwrap(),
            "title,memo\na b,m\n"
        );
        assert!(!dir.join("empty_cleaned.csv").exists());
        assert!(!dir.join("old_cleaned_cleaned.csv").exists());
    }
}

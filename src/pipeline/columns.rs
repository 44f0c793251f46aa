//! 出力列の決定と最終出力の組み立て

use std::collections::BTreeSet;

use tracing::info;

use super::{RunReport, RunStatus};
use crate::lancers::fields;
use crate::row::{Batch, Row};

/// 出力列を決める
///
/// 1. `preferred`（重複を除き、指定順のまま）
/// 2. `original_keys` のうち未出かつ除外対象でないもの（入力順）
/// 3. `accumulated` のうち未出かつ除外対象でないもの（昇順）
pub fn resolve_columns(
    preferred: &[String],
    original_keys: &[String],
    accumulated: &BTreeSet<String>,
    exclude: &BTreeSet<String>,
) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(preferred.len() + original_keys.len());

    for key in preferred {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }

    for key in original_keys.iter().chain(accumulated.iter()) {
        if !columns.contains(key) && !exclude.contains(key) {
            columns.push(key.clone());
        }
    }

    columns
}

/// 出力スキーマ（優先列と除外列）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub preferred: Vec<String>,
    pub exclude: BTreeSet<String>,
}

impl OutputSchema {
    pub fn new<P, E>(preferred: P, exclude: E) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            preferred: preferred.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// 詳細取得結果の出力スキーマ
    pub fn detail() -> Self {
        Self::new(
            [
                fields::SCRAPED_AT,
                fields::TITLE,
                fields::URL,
                fields::DEADLINE_RAW,
                fields::DELIVERY_DATE_RAW,
                fields::PEOPLE,
            ],
            [
                fields::DEADLINE,
                fields::DELIVERY_DATE,
                fields::WORK_ID,
                fields::PERIOD,
            ],
        )
    }

    /// 検索一覧の出力スキーマ
    pub fn listing() -> Self {
        Self::new(
            [
                fields::TITLE,
                fields::URL,
                fields::WORK_ID,
                fields::PRICE,
                fields::TYPE,
                fields::DEADLINE,
                fields::STATUS,
                fields::SCRAPED_AT,
            ],
            std::iter::empty::<String>(),
        )
    }

    pub fn resolve(&self, original_keys: &[String], rows: &[Row]) -> Vec<String> {
        let accumulated: BTreeSet<String> = rows
            .iter()
            .flat_map(|row| row.keys().map(str::to_string))
            .collect();
        resolve_columns(&self.preferred, original_keys, &accumulated, &self.exclude)
    }
}

impl Default for OutputSchema {
    fn default() -> Self {
        Self::detail()
    }
}

/// 書き出し直前の結果
#[derive(Debug, Clone)]
pub struct FinalOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// 完走せずに終了した（中断・割り込み・セッション障害）
    pub interrupted: bool,
    pub processed: usize,
    pub enriched: usize,
    pub status: RunStatus,
}

/// 正常終了・中断のどちらでも使う最終化処理
///
/// 列は蓄積済みの行と元のバッチから一度だけ計算する。
pub fn finalize(report: RunReport, batch: &Batch, schema: &OutputSchema) -> FinalOutput {
    let columns = schema.resolve(&batch.original_keys(), &report.rows);
    let interrupted = !report.status.is_completed();

    info!(
        "出力列を決定しました: {}列 (処理済み {}件, 詳細取得 {}件{})",
        columns.len(),
        report.processed(),
        report.enriched,
        if interrupted { ", 中断" } else { "" }
    );

    FinalOutput {
        columns,
        processed: report.processed(),
        enriched: report.enriched,
        interrupted,
        status: report.status,
        rows: report.rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_columns_merges_three_sources() {
        let columns = resolve_columns(
            &strings(&["scraped_at", "title", "url"]),
            &strings(&["url", "title", "extra1"]),
            &set(&["extra2", "work_id", "extra1"]),
            &set(&["work_id"]),
        );
        assert_eq!(columns, strings(&["scraped_at", "title", "url", "extra1", "extra2"]));
    }

    #[test]
    fn test_resolve_columns_independent_of_insertion_order() {
        let mut a = BTreeSet::new();
        for key in ["zeta", "alpha", "mid"] {
            a.insert(key.to_string());
        }
        let mut b = BTreeSet::new();
        for key in ["mid", "zeta", "alpha"] {
            b.insert(key.to_string());
        }
        let preferred = strings(&["url"]);
        assert_eq!(
            resolve_columns(&preferred, &[], &a, &BTreeSet::new()),
            resolve_columns(&preferred, &[], &b, &BTreeSet::new()),
        );
        assert_eq!(
            resolve_columns(&preferred, &[], &a, &BTreeSet::new()),
            strings(&["url", "alpha", "mid", "zeta"])
        );
    }

    #[test]
    fn test_resolve_columns_empty_inputs_yield_deduplicated_preferred() {
        let columns = resolve_columns(
            &strings(&["url", "title", "url"]),
            &[],
            &BTreeSet::new(),
            &set(&["title"]),
        );
        assert_eq!(columns, strings(&["url", "title"]));
    }

    #[test]
    fn test_excluded_original_key_is_dropped() {
        let columns = resolve_columns(
            &strings(&["url"]),
            &strings(&["work_id", "memo"]),
            &BTreeSet::new(),
            &set(&["work_id"]),
        );
        assert_eq!(columns, strings(&["url", "memo"]));
    }

    #[test]
    fn test_detail_schema_excludes_derived_fields() {
        let rows = vec![Row::new()
            .with("url", "u")
            .with("deadline", "2025-04-21")
            .with("deadline_raw", "2025年4月21日")
            .with("work_id", "1")
            .with("period", "p")
            .with("memo", "m")];
        let columns = OutputSchema::detail().resolve(&strings(&["url", "memo"]), &rows);
        assert_eq!(
            columns,
            strings(&[
                "scraped_at",
                "title",
                "url",
                "deadline_raw",
                "delivery_date_raw",
                "people",
                "memo"
            ])
        );
    }
}

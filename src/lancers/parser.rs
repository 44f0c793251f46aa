//! 抽出テキストの正規化
//!
//! すべて副作用のない関数で、入力が想定外の形式でも元のテキストを返す。

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use super::types::{fields, RawDetail, WorkCard};
use crate::row::Row;

/// 締切未設定のプレースホルダー
pub const NO_DEADLINE: &str = "期限なし";
/// 希望納期未設定のプレースホルダー
pub const NO_DELIVERY_DATE: &str = "納期未設定";
/// 募集人数未設定のプレースホルダー
pub const NO_PEOPLE: &str = "人数未設定";

const DEFAULT_PRICE: &str = "報酬未設定";
const DEFAULT_TYPE: &str = "種別不明";
const DEFAULT_STATUS: &str = "状態不明";

const SCRAPED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn work_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/work/detail/(\d+)").unwrap())
}

fn deadline_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"締切|：|\s+").unwrap())
}

fn delivery_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"希望納期|：|\s+").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").unwrap())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2}):(\d{1,2})").unwrap())
}

fn headcount_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"募集人数\s*(\d+)\s*人").unwrap(),
            Regex::new(r"\(募集人数\s*(\d+)\s*人\)").unwrap(),
            Regex::new(r"(\d+)").unwrap(),
        ]
    })
}

/// 案件URLから案件IDを取り出す（見つからなければ空文字列）
pub fn extract_work_id(url: &str) -> String {
    work_id_re()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// ラベル・全角コロン・空白を取り除く
///
/// 空文字列と未設定プレースホルダーはそのまま返す。
pub fn strip_label(text: &str, label: &Regex, unset: &str) -> String {
    if text.is_empty() || text == unset {
        return text.to_string();
    }
    label.replace_all(text, "").into_owned()
}

/// 締切日時を整形（「締切：」等を除去）
pub fn parse_deadline(text: &str) -> String {
    strip_label(text, deadline_label_re(), NO_DEADLINE)
}

/// 希望納期を整形（「希望納期：」等を除去）
pub fn parse_delivery_date(text: &str) -> String {
    strip_label(text, delivery_label_re(), NO_DELIVERY_DATE)
}

/// 「2025年4月21日 18:17」形式を「2025-04-21 18:17」に変換
///
/// 日付が見つからなければ入力をそのまま返す。時刻が無ければ日付のみ。
pub fn to_canonical_date(text: &str) -> String {
    let Some(date) = date_re().captures(text) else {
        return text.to_string();
    };
    let (year, month, day) = (&date[1], &date[2], &date[3]);

    match time_re().captures(text) {
        Some(time) => format!(
            "{}-{:0>2}-{:0>2} {:0>2}:{:0>2}",
            year, month, day, &time[1], &time[2]
        ),
        None => format!("{}-{:0>2}-{:0>2}", year, month, day),
    }
}

/// 募集人数のテキストから人数（数字のみ）を取り出す
///
/// 「募集人数N人」「(募集人数N人)」「N」の順に試し、どれにも当たらなければ元のテキスト。
pub fn extract_headcount(text: &str) -> String {
    if text.is_empty() || text == NO_PEOPLE {
        return text.to_string();
    }
    headcount_res()
        .iter()
        .find_map(|re| re.captures(text).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.to_string())
}

/// 連続する空白・改行を1つの空白にまとめる
pub fn clean_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn format_scraped_at(at: &DateTime<FixedOffset>) -> String {
    at.format(SCRAPED_AT_FORMAT).to_string()
}

/// 詳細ページの生データを出力行に変換
///
/// 生の締切・納期は `*_raw` として残し、変換後の値を別キーに入れる。
/// 取得できなかったフィールドも空文字列として必ず含める。
pub fn parse_work_detail(detail: &RawDetail, scraped_at: &DateTime<FixedOffset>) -> Row {
    let work_id = if detail.work_id.is_empty() {
        extract_work_id(&detail.url)
    } else {
        detail.work_id.clone()
    };

    Row::new()
        .with(fields::TITLE, clean_title(&detail.title))
        .with(fields::URL, detail.url.as_str())
        .with(fields::WORK_ID, work_id)
        .with(
            fields::DEADLINE,
            to_canonical_date(&parse_deadline(&detail.deadline_raw)),
        )
        .with(fields::DEADLINE_RAW, detail.deadline_raw.as_str())
        .with(fields::PEOPLE, extract_headcount(&detail.people))
        .with(
            fields::DELIVERY_DATE,
            to_canonical_date(&parse_delivery_date(&detail.delivery_date_raw)),
        )
        .with(fields::DELIVERY_DATE_RAW, detail.delivery_date_raw.as_str())
        .with(fields::PERIOD, detail.period.as_str())
        .with(fields::SCRAPED_AT, format_scraped_at(scraped_at))
}

/// 検索一覧の案件カードを出力行に変換
pub fn parse_work_card(card: &WorkCard, scraped_at: &DateTime<FixedOffset>) -> Row {
    let or_default = |value: &str, default: &str| {
        if value.is_empty() {
            default.to_string()
        } else {
            value.to_string()
        }
    };

    Row::new()
        .with(fields::TITLE, clean_title(&card.title))
        .with(fields::URL, card.url.as_str())
        .with(fields::WORK_ID, extract_work_id(&card.url))
        .with(fields::PRICE, or_default(&card.price, DEFAULT_PRICE))
        .with(fields::TYPE, or_default(&card.work_type, DEFAULT_TYPE))
        .with(
            fields::DEADLINE,
            parse_deadline(&or_default(&card.deadline, NO_DEADLINE)),
        )
        .with(fields::STATUS, or_default(&card.status, DEFAULT_STATUS))
        .with(fields::SCRAPED_AT, format_scraped_at(scraped_at))
}

//! HTMLからの項目抽出（CSSセレクタ）

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::parser::extract_work_id;
use super::types::{RawDetail, WorkCard, BASE_URL};

/// 閲覧制限ページのタイトルに含まれる文言
pub const RESTRICTED_MARKER: &str = "閲覧制限";

struct DetailSelectors {
    title: Vec<Selector>,
    page_title: Selector,
    schedule_item: Selector,
    schedule_item_title: Selector,
    schedule_item_text: Selector,
    paragraph: Selector,
    definition: Selector,
}

struct CardSelectors {
    cards: Vec<Selector>,
    title: Selector,
    link: Selector,
    price: Selector,
    work_type: Selector,
    deadline: Selector,
    status: Selector,
}

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn detail_selectors() -> &'static DetailSelectors {
    static SELECTORS: OnceLock<DetailSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| DetailSelectors {
        title: vec![sel("h1"), sel(".p-work-detail-header__title")],
        page_title: sel("title"),
        schedule_item: sel("p.p-work-detail-schedule span.p-work-detail-schedule__item"),
        schedule_item_title: sel("span.p-work-detail-schedule__item__title"),
        schedule_item_text: sel("span.p-work-detail-schedule__text"),
        paragraph: sel("p"),
        definition: sel(".c-definitionList__description"),
    })
}

fn card_selectors() -> &'static CardSelectors {
    static SELECTORS: OnceLock<CardSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| CardSelectors {
        cards: vec![sel("div.p-search-job-media"), sel("div[data-external-modal]")],
        title: sel(".p-search-job-media__title"),
        link: sel("a.p-search-job-media__title"),
        price: sel(".p-search-job-media__price"),
        work_type: sel(".c-badge__text"),
        deadline: sel(".p-search-job-media__time-remaining"),
        status: sel(".p-search-job-media__time-text"),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(text_of)
}

/// ページタイトルが閲覧制限を示しているか
pub fn is_restricted(html: &str) -> bool {
    let document = Html::parse_document(html);
    document
        .select(&detail_selectors().page_title)
        .next()
        .map(|title| text_of(title).contains(RESTRICTED_MARKER))
        .unwrap_or(false)
}

/// 案件詳細ページのHTMLから生データを抽出
///
/// 見つからない項目は空文字列のまま返す（失敗扱いにはしない）。
pub fn extract_work_detail(html: &str, url: &str) -> RawDetail {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let selectors = detail_selectors();

    let title = selectors
        .title
        .iter()
        .filter_map(|s| first_text(root, s))
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    let mut detail = RawDetail {
        title,
        url: url.to_string(),
        work_id: extract_work_id(url),
        ..Default::default()
    };

    let items: Vec<_> = root.select(&selectors.schedule_item).collect();
    debug!("スケジュール項目 {}件 ({})", items.len(), url);
    for item in items {
        let (Some(item_title), Some(item_text)) = (
            first_text(item, &selectors.schedule_item_title),
            first_text(item, &selectors.schedule_item_text),
        ) else {
            debug!("スケジュール項目のタイトルまたは本文が見つかりません");
            continue;
        };

        if item_title.contains("締切") {
            detail.deadline_raw = item_text;
        } else if item_title.contains("希望納期") {
            detail.delivery_date_raw = item_text;
        } else if item_title.contains("募集期間") {
            detail.period = item_text;
        }
    }

    detail.people = root
        .select(&selectors.paragraph)
        .map(text_of)
        .find(|t| t.contains("(募集人数"))
        .or_else(|| {
            root.select(&selectors.definition)
                .map(text_of)
                .find(|t| t.contains("募集人数"))
        })
        .unwrap_or_default();

    if detail.people.is_empty() {
        warn!("募集人数が見つかりませんでした ({})", url);
    }

    detail
}

/// 相対URLを絶対URLにする
pub fn absolute_url(href: &str) -> String {
    if href.is_empty() || href.starts_with("http") {
        return href.to_string();
    }
    url::Url::parse(BASE_URL)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", BASE_URL, href))
}

/// 検索一覧ページのHTMLから案件カードを抽出
///
/// 複数のセレクタで同じカードが拾われた場合はURLで重複を除く。
pub fn extract_work_cards(html: &str) -> Vec<WorkCard> {
    let document = Html::parse_document(html);
    let selectors = card_selectors();
    let mut cards: Vec<WorkCard> = Vec::new();

    for card_selector in &selectors.cards {
        for card in document.select(card_selector) {
            let url = card
                .select(&selectors.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(absolute_url)
                .unwrap_or_default();

            if !url.is_empty() && cards.iter().any(|c| c.url == url) {
                continue;
            }

            cards.push(WorkCard {
                title: first_text(card, &selectors.title).unwrap_or_else(|| "タイトルなし".into()),
                url,
                price: first_text(card, &selectors.price).unwrap_or_default(),
                work_type: first_text(card, &selectors.work_type).unwrap_or_default(),
                deadline: first_text(card, &selectors.deadline).unwrap_or_default(),
                status: first_text(card, &selectors.status).unwrap_or_default(),
            });
        }
    }

    if cards.is_empty() {
        warn!("案件カードが見つかりませんでした");
    }
    cards
}

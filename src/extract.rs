use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::ParseError;
use crate::store::seen::normalize_url;

#[derive(Debug, Clone, Copy)]
pub struct ExtractConfig {
    pub min_price: u64,
    pub max_price: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_price: 15_000,
            max_price: 900_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRecord {
    pub url: String,
    pub title: String,
    pub price: u64,
    pub discovered_at: String,
    pub below_market_badge: bool,
}

// -------------------------
// Selectors
// -------------------------

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static ITEM: LazyLock<Selector> = LazyLock::new(|| sel(r#"[data-marker="item"]"#));
static ITEM_ALT: LazyLock<Selector> = LazyLock::new(|| sel(".iva-item-root"));
static TITLE_LINK: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"a[data-marker="item-title"], a[itemprop="url"]"#));
static NAME: LazyLock<Selector> = LazyLock::new(|| sel(r#"[itemprop="name"]"#));
static PRICE_META: LazyLock<Selector> = LazyLock::new(|| sel(r#"[itemprop="price"]"#));
static PRICE_ALT: LazyLock<Selector> = LazyLock::new(|| sel(r#"[data-marker="item-price"]"#));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    sel(r#"[data-marker="item-view/item-description"], [itemprop="description"]"#)
});
static BODY: LazyLock<Selector> = LazyLock::new(|| sel("body"));

static RAW_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)data-marker="item"[^>]*>.*?href="([^"]+)".*?title="([^"]+)".*?data-marker="item-price"[^>]*>([^<]+)"#,
    )
    .expect("static regex")
});

const BADGE_PHRASES: &[&str] = &["ниже рыночной", "below market"];

pub struct Extractor {
    base: Url,
    cfg: ExtractConfig,
    discovered_at: String,
}

impl Extractor {
    pub fn new(base: Url, cfg: ExtractConfig, discovered_at: impl Into<String>) -> Self {
        Self {
            base,
            cfg,
            discovered_at: discovered_at.into(),
        }
    }

    /// Structured cards first, raw pattern scan when there are none.
    pub fn extract(&self, body: &str) -> Vec<ListingRecord> {
        let doc = Html::parse_document(body);
        let mut cards: Vec<ElementRef> = doc.select(&ITEM).collect();
        if cards.is_empty() {
            cards = doc.select(&ITEM_ALT).collect();
        }

        let parsed: Vec<Result<ListingRecord, ParseError>> = if cards.is_empty() {
            debug!("[extract] no item cards, falling back to raw scan");
            self.raw_scan(body)
        } else {
            cards.iter().map(|card| self.parse_card(card)).collect()
        };

        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut skipped = 0usize;
        for rec in parsed {
            match rec {
                Ok(rec) => {
                    // per-card `?context=` must not split one listing
                    if seen.insert(normalize_url(&rec.url)) {
                        out.push(rec);
                    }
                }
                Err(e) => {
                    skipped += 1;
                    debug!("[extract] skip: {e}");
                }
            }
        }
        debug!("[extract] kept={} skipped={}", out.len(), skipped);
        out
    }

    fn parse_card(&self, card: &ElementRef) -> Result<ListingRecord, ParseError> {
        let link = card.select(&TITLE_LINK).next();
        let title = link
            .and_then(|a| a.value().attr("title").map(str::to_string))
            .or_else(|| link.map(|a| element_text(&a)))
            .filter(|t| !t.is_empty())
            .or_else(|| card.select(&NAME).next().map(|n| element_text(&n)))
            .unwrap_or_default();

        let href = link
            .and_then(|a| a.value().attr("href"))
            .ok_or_else(|| ParseError::BadLink(title.clone()))?;
        let url = self
            .base
            .join(href)
            .map_err(|_| ParseError::BadLink(href.to_string()))?;

        let price = card
            .select(&PRICE_META)
            .next()
            .and_then(|p| {
                p.value()
                    .attr("content")
                    .and_then(parse_price)
                    .or_else(|| parse_price(&element_text(&p)))
            })
            .or_else(|| {
                card.select(&PRICE_ALT)
                    .next()
                    .and_then(|p| parse_price(&element_text(&p)))
            })
            .ok_or_else(|| ParseError::NoPrice(title.clone()))?;

        let card_text = element_text(card).to_lowercase();
        let below_market_badge = BADGE_PHRASES.iter().any(|p| card_text.contains(p));

        self.finish(url.to_string(), title, price, below_market_badge)
    }

    fn raw_scan(&self, body: &str) -> Vec<Result<ListingRecord, ParseError>> {
        RAW_ITEM
            .captures_iter(body)
            .map(|caps| {
                let href = &caps[1];
                let title = unescape(caps[2].trim());
                let raw_price = &caps[3];
                let url = self
                    .base
                    .join(href)
                    .map_err(|_| ParseError::BadLink(href.to_string()))?;
                let price =
                    parse_price(raw_price).ok_or_else(|| ParseError::NoPrice(title.clone()))?;
                let below_market_badge = {
                    let lower = caps[0].to_lowercase();
                    BADGE_PHRASES.iter().any(|p| lower.contains(p))
                };
                self.finish(url.to_string(), title, price, below_market_badge)
            })
            .collect()
    }

    fn finish(
        &self,
        url: String,
        title: String,
        price: u64,
        below_market_badge: bool,
    ) -> Result<ListingRecord, ParseError> {
        if price < self.cfg.min_price || price > self.cfg.max_price {
            return Err(ParseError::OutOfBounds {
                price,
                min: self.cfg.min_price,
                max: self.cfg.max_price,
            });
        }
        Ok(ListingRecord {
            url,
            title,
            price,
            discovered_at: self.discovered_at.clone(),
            below_market_badge,
        })
    }
}

/// Description text of an ad detail page, or the whole page text when the
/// description block is missing.
pub fn description_text(body: &str) -> String {
    let doc = Html::parse_document(body);
    doc.select(&DESCRIPTION)
        .next()
        .or_else(|| doc.select(&BODY).next())
        .map(|e| element_text(&e))
        .unwrap_or_default()
}

/// `"125 000 ₽"`, `"125000"` and `"125000.00"` all give 125000.
pub fn parse_price(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return (v.is_finite() && v >= 0.0).then_some(v as u64);
    }
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok()
}

fn element_text(e: &ElementRef) -> String {
    e.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{SpecKey, Unrecognized, classify, processor_for};
use crate::clock::now_rfc3339;
use crate::config::{Config, MIN_LISTINGS_PER_PAGE};
use crate::estimate::estimate;
use crate::extract::{Extractor, ListingRecord, description_text};
use crate::fetch::Fetcher;
use crate::matcher::{DealMatcher, HotDeal, MatchOutcome};
use crate::notify::Notifier;
use crate::pager::page_urls;
use crate::store::prices::{PriceDatabase, PriceStatRecord, UpsertOutcome};
use crate::store::read_json;
use crate::store::seen::{SeenSet, normalize_url};

/// One configuration to price, with the search URL already filtered to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub model_name: String,
    #[serde(default)]
    pub processor: String,
    pub ram: u32,
    pub ssd: u32,
    pub url: String,
}

impl ScanTarget {
    pub fn key(&self) -> SpecKey {
        SpecKey::new(self.model_name.clone(), self.ram, self.ssd)
    }

    // unrecognized models pass: the target URL is already filtered
    pub fn accepts(&self, title: &str) -> bool {
        match classify(title) {
            Err(Unrecognized::Junk(_)) => false,
            Err(Unrecognized::UnknownModel) => true,
            Ok(c) => {
                c.key.model_name == self.model_name
                    && (!c.memory_stated || c.key.memory_gb == self.ram)
                    && (!c.storage_stated || c.key.storage_gb == self.ssd)
            }
        }
    }
}

#[derive(Deserialize)]
struct TargetsFile {
    entries: Vec<ScanTarget>,
}

pub fn load_targets(path: &Path) -> Result<Vec<ScanTarget>> {
    let file: TargetsFile = read_json(path)?
        .ok_or_else(|| anyhow!("targets file {} not found", path.display()))?;
    Ok(file.entries)
}

pub fn batch_slice<T>(items: &[T], index: usize, total: usize) -> &[T] {
    let total = total.max(1);
    let size = items.len().div_ceil(total);
    let start = (index * size).min(items.len());
    let end = (start + size).min(items.len());
    &items[start..end]
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub targets: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub samples: usize,
}

pub async fn run_build(cfg: &Config) -> Result<BuildSummary> {
    let targets = load_targets(&cfg.targets_file).context("loading build targets")?;
    let batch = batch_slice(&targets, cfg.batch_index, cfg.total_batches);
    info!(
        "[build] batch {}/{}: {} of {} targets",
        cfg.batch_index + 1,
        cfg.total_batches,
        batch.len(),
        targets.len()
    );

    let existed = cfg.prices_file.exists();
    let mut db = PriceDatabase::load(&cfg.prices_file, cfg.merge)
        .context("loading price database")?;
    let mut fetcher = Fetcher::new(cfg.fetch.clone()).context("building HTTP client")?;
    let mut summary = BuildSummary {
        targets: batch.len(),
        ..Default::default()
    };

    for target in batch {
        let key = target.key();
        let prices = match collect_samples(&mut fetcher, cfg, target).await {
            Ok(p) => p,
            Err(e) => {
                warn!("[build] {key}: skipped, {e:#}");
                summary.skipped += 1;
                continue;
            }
        };
        let est = match estimate(&prices, &cfg.estimator) {
            Ok(est) => est,
            Err(e) => {
                warn!("[build] {key}: skipped, {e}");
                summary.skipped += 1;
                continue;
            }
        };
        summary.samples += prices.len();

        let processor = if target.processor.trim().is_empty() {
            processor_for(&target.model_name)
        } else {
            target.processor.clone()
        };
        let record = PriceStatRecord::from_estimate(&key, &processor, &est, &now_rfc3339(), &cfg.merge);
        match db.upsert(record) {
            Ok(outcome) => {
                info!(
                    "[build] {key}: floor={} median={} ceiling={} buyout={} n={} ({outcome:?})",
                    est.floor, est.median, est.ceiling, est.buyout, est.samples
                );
                match outcome {
                    UpsertOutcome::Inserted => summary.inserted += 1,
                    UpsertOutcome::Replaced => summary.replaced += 1,
                    UpsertOutcome::Unchanged => summary.unchanged += 1,
                }
            }
            Err(reason) => {
                warn!("[build] {key}: rejected, {reason}");
                summary.skipped += 1;
            }
        }
    }

    if db.is_dirty() || !existed {
        db.save(&cfg.prices_file)
            .with_context(|| format!("saving {}", cfg.prices_file.display()))?;
        info!("[build] saved {} records to {}", db.len(), cfg.prices_file.display());
    }
    info!(
        "[build] done: inserted={} replaced={} unchanged={} skipped={} requests={} rotations={}",
        summary.inserted,
        summary.replaced,
        summary.unchanged,
        summary.skipped,
        fetcher.requests(),
        fetcher.rotations()
    );
    Ok(summary)
}

async fn collect_samples(fetcher: &mut Fetcher, cfg: &Config, target: &ScanTarget) -> Result<Vec<u64>> {
    let start = Url::parse(&target.url).with_context(|| format!("bad target url {}", target.url))?;
    let mut prices = Vec::new();
    // promoted cards repeat across pages
    let mut counted = HashSet::new();

    for (i, page_url) in page_urls(&start, cfg.pages).into_iter().enumerate() {
        let body = match fetcher.fetch(&page_url).await {
            Ok(b) => b,
            Err(e) if i == 0 => return Err(e).context("first page"),
            Err(e) => {
                warn!("[build] {page_url}: {e}, keeping earlier pages");
                break;
            }
        };
        let listings = Extractor::new(page_url.clone(), cfg.extract, now_rfc3339()).extract(&body);
        let before = prices.len();
        prices.extend(
            listings
                .iter()
                .filter(|l| counted.insert(normalize_url(&l.url)))
                .filter(|l| target.accepts(&l.title))
                .map(|l| l.price),
        );
        debug!(
            "[build] {page_url}: listings={} kept={}",
            listings.len(),
            prices.len() - before
        );
        if listings.len() < MIN_LISTINGS_PER_PAGE {
            break;
        }
    }
    Ok(prices)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub listings: usize,
    pub deals: usize,
    pub notified: usize,
    pub skipped: usize,
    pub detail_fetches: usize,
    pub already_checked: usize,
}

pub async fn run_scan<N: Notifier>(cfg: &Config, notifier: &N) -> Result<ScanSummary> {
    let scan_url = Url::parse(cfg.require_scan_url()?).context("SCAN_URL is not a valid URL")?;
    let db = PriceDatabase::load(&cfg.prices_file, cfg.merge).context("loading price database")?;
    let mut seen = SeenSet::load(&cfg.seen_file, cfg.seen_capacity).context("loading seen set")?;
    let mut checked =
        SeenSet::load(&cfg.checked_file, cfg.seen_capacity).context("loading checked detail set")?;
    if db.is_empty() {
        warn!("[scan] price database {} is empty", cfg.prices_file.display());
    }
    let mut fetcher = Fetcher::new(cfg.fetch.clone()).context("building HTTP client")?;

    let listings = fetch_listings(&mut fetcher, cfg, &scan_url).await;
    let matcher = DealMatcher::new(cfg.matcher);
    let mut summary = ScanSummary {
        listings: listings.len(),
        ..Default::default()
    };
    let mut detail_budget = matcher.config().max_detail_fetches;

    for listing in &listings {
        let deal = match matcher.evaluate(listing, &db, &mut seen) {
            MatchOutcome::Accepted(deal) => Some(deal),
            MatchOutcome::NeedsDetail(candidate) if checked.contains(&candidate.listing.url) => {
                summary.already_checked += 1;
                None
            }
            MatchOutcome::NeedsDetail(candidate) if detail_budget > 0 => {
                detail_budget -= 1;
                summary.detail_fetches += 1;
                match detail_description(&mut fetcher, &candidate.listing.url).await {
                    Some(text) => {
                        checked.insert(&candidate.listing.url);
                        matcher.confirm_urgency(candidate, &text, &mut seen)
                    }
                    None => None,
                }
            }
            MatchOutcome::NeedsDetail(candidate) => {
                debug!("[scan] detail budget spent, skipping {}", candidate.listing.url);
                None
            }
            MatchOutcome::Rejected(reason) => {
                debug!("[scan] {} rejected: {reason}", listing.url);
                None
            }
        };
        let Some(deal) = deal else {
            summary.skipped += 1;
            continue;
        };
        summary.deals += 1;
        log_deal(&deal);
        if notifier.notify(&deal).await {
            summary.notified += 1;
        }
    }

    if seen.save_if_dirty().context("saving seen set")? {
        debug!("[scan] seen set now holds {} urls", seen.len());
    }
    if checked.save_if_dirty().context("saving checked detail set")? {
        debug!("[scan] checked set now holds {} urls", checked.len());
    }
    info!(
        "[scan] done: listings={} deals={} notified={} skipped={} detail_fetches={} already_checked={}",
        summary.listings,
        summary.deals,
        summary.notified,
        summary.skipped,
        summary.detail_fetches,
        summary.already_checked
    );
    Ok(summary)
}

async fn fetch_listings(fetcher: &mut Fetcher, cfg: &Config, start: &Url) -> Vec<ListingRecord> {
    let mut out = Vec::new();
    let mut urls = HashSet::new();
    for page_url in page_urls(start, cfg.pages) {
        let body = match fetcher.fetch(&page_url).await {
            Ok(b) => b,
            Err(e) => {
                warn!("[scan] {page_url}: {e}");
                break;
            }
        };
        let listings = Extractor::new(page_url.clone(), cfg.extract, now_rfc3339()).extract(&body);
        debug!("[scan] {page_url}: {} listings", listings.len());
        let empty = listings.is_empty();
        out.extend(listings.into_iter().filter(|l| urls.insert(normalize_url(&l.url))));
        if empty {
            break;
        }
    }
    out
}

async fn detail_description(fetcher: &mut Fetcher, url: &str) -> Option<String> {
    let url = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            warn!("[scan] bad listing url {url}: {e}");
            return None;
        }
    };
    match fetcher.fetch(&url).await {
        Ok(body) => Some(description_text(&body)),
        Err(e) => {
            warn!("[scan] detail fetch {url}: {e}");
            None
        }
    }
}

fn log_deal(deal: &HotDeal) {
    info!(
        "[scan] deal ({:?}{}): {} at {} vs {} [{}]",
        deal.reason,
        if deal.fuzzy { ", fuzzy" } else { "" },
        deal.title,
        deal.price,
        deal.market_low,
        deal.matched_spec
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ScanTarget {
        ScanTarget {
            model_name: "MacBook Air 13 (2022, M2)".into(),
            processor: "Apple M2".into(),
            ram: 8,
            ssd: 256,
            url: "https://www.avito.ru/moskva/noutbuki?q=macbook+air+m2".into(),
        }
    }

    #[test]
    fn batches_are_contiguous_and_cover_everything() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(batch_slice(&items, 0, 3), &[0, 1, 2, 3]);
        assert_eq!(batch_slice(&items, 1, 3), &[4, 5, 6, 7]);
        assert_eq!(batch_slice(&items, 2, 3), &[8, 9]);
        assert_eq!(batch_slice(&items, 0, 1).len(), 10);
        assert!(batch_slice(&items[..2], 2, 3).is_empty());
    }

    #[test]
    fn target_filter() {
        let t = target();
        assert!(t.accepts("MacBook Air M2 8/256"));
        assert!(t.accepts("MacBook Air M2"));
        assert!(t.accepts("Ноутбук Apple"));
        assert!(!t.accepts("MacBook Air M2 16/512"));
        assert!(!t.accepts("MacBook Air M1 8/256"));
        assert!(!t.accepts("MacBook Air M2 на запчасти"));
    }

    #[test]
    fn targets_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(
            &path,
            r#"{"entries":[{"model_name":"MacBook Air 13 (2022, M2)","ram":8,"ssd":256,"url":"https://e.com/s"}]}"#,
        )
        .unwrap();
        let got = load_targets(&path).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].processor, "");
        assert!(load_targets(&dir.path().join("missing.json")).is_err());
    }
}

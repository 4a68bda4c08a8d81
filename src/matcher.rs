use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::classify::{Unrecognized, classify};
use crate::extract::ListingRecord;
use crate::store::prices::{PriceDatabase, PriceStatRecord};
use crate::store::seen::SeenSet;

pub const URGENCY_KEYWORDS: &[&str] = &[
    "срочно",
    "срочная",
    "переезд",
    "уезжаю",
    "urgent",
    "must sell",
    "quick sale",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferencePrice {
    // min_price
    #[default]
    Floor,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub threshold_factor: f64,
    pub scam_factor: f64,
    // above threshold but within this: worth a detail fetch
    pub detail_factor: f64,
    pub reference: ReferencePrice,
    pub max_detail_fetches: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 1.10,
            scam_factor: 0.4,
            detail_factor: 1.25,
            reference: ReferencePrice::Floor,
            max_detail_fetches: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DealReason {
    Threshold,
    Badge,
    Urgency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotDeal {
    pub url: String,
    pub title: String,
    pub price: u64,
    pub market_low: u64,
    pub buyout: u64,
    pub discount_percent: f64,
    pub matched_spec: String,
    pub found_at: String,
    pub reason: DealReason,
    pub fuzzy: bool,
}

/// Near-threshold listing that urgency language in its description would tip over.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub listing: ListingRecord,
    pub reference: u64,
    pub buyout: u64,
    pub matched_spec: String,
    pub fuzzy: bool,
}

impl Candidate {
    fn into_deal(self, reason: DealReason) -> HotDeal {
        HotDeal {
            discount_percent: discount_percent(self.listing.price, self.reference),
            url: self.listing.url,
            title: self.listing.title,
            price: self.listing.price,
            market_low: self.reference,
            buyout: self.buyout,
            matched_spec: self.matched_spec,
            found_at: self.listing.discovered_at,
            reason,
            fuzzy: self.fuzzy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    AlreadySeen,
    Unrecognized(Unrecognized),
    NoReference,
    Scam { price: u64, reference: u64 },
    TooExpensive { price: u64, limit: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadySeen => f.write_str("already notified"),
            Rejection::Unrecognized(u) => write!(f, "{u}"),
            Rejection::NoReference => f.write_str("no trusted price record"),
            Rejection::Scam { price, reference } => {
                write!(f, "price {price} implausibly low against {reference}")
            }
            Rejection::TooExpensive { price, limit } => write!(f, "price {price} above {limit}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Accepted(HotDeal),
    NeedsDetail(Candidate),
    Rejected(Rejection),
}

pub struct DealMatcher {
    cfg: MatchConfig,
}

impl DealMatcher {
    pub fn new(cfg: MatchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    /// No network access. An accepted deal is in `seen` before it is returned.
    pub fn evaluate(
        &self,
        listing: &ListingRecord,
        db: &PriceDatabase,
        seen: &mut SeenSet,
    ) -> MatchOutcome {
        if seen.contains(&listing.url) {
            return MatchOutcome::Rejected(Rejection::AlreadySeen);
        }
        let classified = match classify(&listing.title) {
            Ok(c) => c,
            Err(u) => return MatchOutcome::Rejected(Rejection::Unrecognized(u)),
        };

        let (record, fuzzy) = match db.get(&classified.key).filter(|r| !r.fallback) {
            Some(r) => (r, false),
            None => match self.fuzzy_reference(db, &classified.key.model_name) {
                Some(r) => {
                    debug!(
                        "[match] {} has no exact record, using {}",
                        classified.key,
                        r.key()
                    );
                    (r, true)
                }
                None => return MatchOutcome::Rejected(Rejection::NoReference),
            },
        };

        let reference = self.reference_of(record);
        let price = listing.price;
        if (price as f64) < reference as f64 * self.cfg.scam_factor {
            return MatchOutcome::Rejected(Rejection::Scam { price, reference });
        }

        let candidate = Candidate {
            listing: listing.clone(),
            reference,
            buyout: record.buyout_price,
            matched_spec: record.key().to_string(),
            fuzzy,
        };

        let reason = if within(price, reference, self.cfg.threshold_factor) {
            DealReason::Threshold
        } else if listing.below_market_badge {
            DealReason::Badge
        } else if within(price, reference, self.cfg.detail_factor) {
            return MatchOutcome::NeedsDetail(candidate);
        } else {
            let limit = (reference as f64 * self.cfg.threshold_factor).floor() as u64;
            return MatchOutcome::Rejected(Rejection::TooExpensive { price, limit });
        };

        seen.insert(&listing.url);
        MatchOutcome::Accepted(candidate.into_deal(reason))
    }

    pub fn confirm_urgency(
        &self,
        candidate: Candidate,
        description: &str,
        seen: &mut SeenSet,
    ) -> Option<HotDeal> {
        urgency_keyword(description)?;
        if !seen.insert(&candidate.listing.url) {
            return None;
        }
        Some(candidate.into_deal(DealReason::Urgency))
    }

    fn reference_of(&self, record: &PriceStatRecord) -> u64 {
        match self.cfg.reference {
            ReferencePrice::Floor => record.min_price,
            ReferencePrice::Median => record.median_price,
        }
    }

    fn fuzzy_reference<'a>(
        &self,
        db: &'a PriceDatabase,
        model_name: &str,
    ) -> Option<&'a PriceStatRecord> {
        db.fuzzy_model(model_name)
            .into_iter()
            .filter(|r| !r.fallback)
            .min_by_key(|r| self.reference_of(r))
    }
}

pub fn urgency_keyword(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    URGENCY_KEYWORDS.iter().copied().find(|k| lower.contains(k))
}

/// `(1 - price/reference) * 100`, one decimal.
pub fn discount_percent(price: u64, reference: u64) -> f64 {
    if reference == 0 {
        return 0.0;
    }
    let raw = (1.0 - price as f64 / reference as f64) * 100.0;
    (raw * 10.0).round() / 10.0
}

// unrounded bound, so a fractional limit is never widened
fn within(price: u64, reference: u64, factor: f64) -> bool {
    price as f64 <= reference as f64 * factor
}

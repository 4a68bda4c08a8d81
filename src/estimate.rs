use serde::Serialize;

use crate::error::InsufficientData;

// below this, every field is the median
pub const MIN_TRIM_SAMPLES: usize = 5;

const MIN_TRIMMED_LEN: usize = 3;

pub const BUYOUT_STEP: u64 = 1000;

/// Percentages are whole numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorConfig {
    pub trim_low: u32,
    pub trim_high: u32,
    pub floor_percentile: u32,
    pub ceiling_percentile: u32,
    /// Acquisition margin subtracted from the floor.
    pub margin: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            trim_low: 10,
            trim_high: 10,
            floor_percentile: 20,
            ceiling_percentile: 80,
            margin: 12_000,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.trim_low + self.trim_high >= 100 {
            return Err("TRIM_LOW + TRIM_HIGH must be below 100".to_string());
        }
        if self.floor_percentile > 50 || self.ceiling_percentile < 50 || self.ceiling_percentile > 100 {
            return Err(
                "FLOOR_PERCENTILE must be <= 50 and CEILING_PERCENTILE within 50..=100".to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarketEstimate {
    pub min: u64,
    pub max: u64,
    pub median: u64,
    pub floor: u64,
    pub ceiling: u64,
    pub buyout: u64,
    // before trimming
    pub samples: usize,
    pub trimmed: usize,
}

pub fn estimate(prices: &[u64], cfg: &EstimatorConfig) -> Result<MarketEstimate, InsufficientData> {
    if prices.is_empty() {
        return Err(InsufficientData { got: 0 });
    }
    let mut sorted = prices.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    if n < MIN_TRIM_SAMPLES {
        let m = median(&sorted);
        return Ok(MarketEstimate {
            min: m,
            max: m,
            median: m,
            floor: m,
            ceiling: m,
            buyout: buyout_price(m, cfg.margin),
            samples: n,
            trimmed: n,
        });
    }

    let trimmed = trim(&sorted, cfg.trim_low, cfg.trim_high);
    let len = trimmed.len();

    let med = median(trimmed);
    let floor = trimmed[percentile_index(len, cfg.floor_percentile)].min(med);
    let ceiling = trimmed[percentile_index(len, cfg.ceiling_percentile)].max(med);

    Ok(MarketEstimate {
        min: trimmed[0],
        max: trimmed[len - 1],
        median: med,
        floor,
        ceiling,
        buyout: buyout_price(floor, cfg.margin),
        samples: n,
        trimmed: len,
    })
}

/// `floor − margin`, rounded down to the nearest [`BUYOUT_STEP`], never negative.
pub fn buyout_price(floor: u64, margin: u64) -> u64 {
    floor.saturating_sub(margin) / BUYOUT_STEP * BUYOUT_STEP
}

/// Drop `n·pct/100` values from each tail (at least one per non-zero side).
/// Falls back to the untrimmed slice if fewer than three values would remain.
fn trim(sorted: &[u64], low_pct: u32, high_pct: u32) -> &[u64] {
    let n = sorted.len();
    let cut = |pct: u32| -> usize {
        if pct == 0 {
            0
        } else {
            (n * pct as usize / 100).max(1)
        }
    };
    let lo = cut(low_pct);
    let hi = n.saturating_sub(cut(high_pct));
    if hi <= lo || hi - lo < MIN_TRIMMED_LEN {
        return sorted;
    }
    &sorted[lo..hi]
}

fn percentile_index(len: usize, pct: u32) -> usize {
    (len * pct as usize / 100).min(len - 1)
}

fn median(sorted: &[u64]) -> u64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cfg() -> EstimatorConfig {
        EstimatorConfig::default()
    }

    #[test]
    fn worked_example() {
        let prices = [20000, 60000, 61000, 62000, 63000, 64000, 65000, 66000, 120000];
        let est = estimate(&prices, &cfg()).unwrap();
        // decoy and high outlier trimmed, seven values remain
        assert_eq!(est.trimmed, 7);
        assert_eq!(est.min, 60000);
        assert_eq!(est.max, 66000);
        assert_eq!(est.floor, 61000);
        assert_eq!(est.median, 63000);
        assert_eq!(est.ceiling, 65000);
        assert_eq!(est.buyout, 49000);
    }

    #[test]
    fn small_samples_use_plain_median() {
        let est = estimate(&[90000, 70000, 80000, 500000], &cfg()).unwrap();
        assert_eq!(est.median, 85000);
        assert_eq!(est.floor, 85000);
        assert_eq!(est.min, 85000);
        assert_eq!(est.max, 85000);
        assert_eq!(est.ceiling, 85000);
        assert_eq!(est.buyout, 73000);
    }

    #[test]
    fn empty_is_insufficient() {
        assert_eq!(estimate(&[], &cfg()), Err(InsufficientData { got: 0 }));
    }

    #[test]
    fn trim_collapse_falls_back_to_untrimmed() {
        let wide = EstimatorConfig {
            trim_low: 40,
            trim_high: 40,
            ..cfg()
        };
        let est = estimate(&[50000, 60000, 70000, 80000, 90000], &wide).unwrap();
        assert_eq!(est.trimmed, 5);
        assert_eq!(est.min, 50000);
        assert_eq!(est.max, 90000);
    }

    #[test]
    fn buyout_rounds_down_and_saturates() {
        assert_eq!(buyout_price(61999, 12000), 49000);
        assert_eq!(buyout_price(5000, 12000), 0);
    }

    #[test]
    fn ordering_holds_for_random_samples() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let n = rng.random_range(5..60);
            let prices: Vec<u64> = (0..n).map(|_| rng.random_range(15_000..900_000)).collect();
            let est = estimate(&prices, &cfg()).unwrap();
            assert!(est.min <= est.floor, "{prices:?}");
            assert!(est.floor <= est.median, "{prices:?}");
            assert!(est.median <= est.ceiling, "{prices:?}");
            assert!(est.ceiling <= est.max, "{prices:?}");
            assert!(est.buyout <= est.floor);
        }
    }

    #[test]
    fn pure_and_order_independent() {
        let a = [64000, 20000, 66000, 61000, 120000, 60000, 63000, 65000, 62000];
        let mut b = a;
        b.reverse();
        let first = estimate(&a, &cfg()).unwrap();
        assert_eq!(first, estimate(&a, &cfg()).unwrap());
        assert_eq!(first, estimate(&b, &cfg()).unwrap());
    }

    #[test]
    fn validate_rejects_inverted_percentiles() {
        assert!(cfg().validate().is_ok());
        let bad = EstimatorConfig {
            floor_percentile: 70,
            ..cfg()
        };
        assert!(bad.validate().is_err());
    }
}

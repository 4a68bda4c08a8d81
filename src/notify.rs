use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::matcher::HotDeal;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealPayload<'a> {
    pub title: &'a str,
    pub price: u64,
    pub reference_price: u64,
    pub discount_percent: f64,
    pub spec: &'a str,
    pub url: &'a str,
}

impl<'a> From<&'a HotDeal> for DealPayload<'a> {
    fn from(d: &'a HotDeal) -> Self {
        Self {
            title: &d.title,
            price: d.price,
            reference_price: d.market_low,
            discount_percent: d.discount_percent,
            spec: &d.matched_spec,
            url: &d.url,
        }
    }
}

/// Delivers hot deals. Delivery is best effort: failures are logged and
/// never stop the caller from moving on to the next deal.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify(&self, deal: &HotDeal) -> bool;
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, deal: &HotDeal) -> bool {
        let payload = DealPayload::from(deal);
        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("[notify] sent {} ({} ₽, {}% off)", deal.url, deal.price, deal.discount_percent);
                true
            }
            Ok(resp) => {
                warn!("[notify] {} answered {} for {}", self.endpoint, resp.status(), deal.url);
                false
            }
            Err(e) => {
                warn!("[notify] delivery failed for {}: {e}", deal.url);
                false
            }
        }
    }
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, deal: &HotDeal) -> bool {
        info!(
            "[notify] HOT DEAL {} | {} ₽ vs {} ₽ ({}%) | {} | {}",
            deal.title, deal.price, deal.market_low, deal.discount_percent, deal.matched_spec, deal.url
        );
        true
    }
}

pub enum AnyNotifier {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl AnyNotifier {
    pub fn from_endpoint(endpoint: Option<&str>) -> Result<Self, reqwest::Error> {
        Ok(match endpoint {
            Some(url) => AnyNotifier::Webhook(WebhookNotifier::new(url)?),
            None => AnyNotifier::Log(LogNotifier),
        })
    }
}

impl Notifier for AnyNotifier {
    async fn notify(&self, deal: &HotDeal) -> bool {
        match self {
            AnyNotifier::Webhook(n) => n.notify(deal).await,
            AnyNotifier::Log(n) => n.notify(deal).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::DealReason;

    #[test]
    fn payload_shape() {
        let deal = HotDeal {
            url: "https://e.com/1".into(),
            title: "MacBook Air M2".into(),
            price: 70000,
            market_low: 80000,
            buyout: 68000,
            discount_percent: 12.5,
            matched_spec: "MacBook Air 13 (2022, M2) 8/256".into(),
            found_at: "2026-03-01T10:00:00Z".into(),
            reason: DealReason::Threshold,
            fuzzy: false,
        };
        let v = serde_json::to_value(DealPayload::from(&deal)).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "title": "MacBook Air M2",
                "price": 70000,
                "reference_price": 80000,
                "discount_percent": 12.5,
                "spec": "MacBook Air 13 (2022, M2) 8/256",
                "url": "https://e.com/1",
            })
        );
    }
}

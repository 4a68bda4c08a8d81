use std::path::PathBuf;

use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{DEFAULT_MEMORY_GB, DEFAULT_STORAGE_GB, SpecKey};
use crate::store::prices::{MergePolicy, PriceDatabase};

// -------------------------
// Request / Response Types
// -------------------------

#[derive(Deserialize)]
struct LookupQuery {
    model: String,
    ram: Option<u32>,
    ssd: Option<u32>,
}

#[derive(Deserialize)]
struct EstimateReq {
    model: String,
    ram: Option<u32>,
    ssd: Option<u32>,
    condition: Option<String>,
}

#[derive(Serialize, Default)]
struct EstimateResp {
    found: bool,
    market_min: Option<u64>,
    market_max: Option<u64>,
    market_median: Option<u64>,
    buyout_price: Option<u64>,
    samples_count: Option<usize>,
    updated_at: Option<String>,
}

/// Shared by every worker; the file itself is re-read per request.
#[derive(Clone)]
pub struct ApiState {
    pub prices_file: PathBuf,
    pub policy: MergePolicy,
}

impl ApiState {
    fn load(&self) -> Result<PriceDatabase, HttpResponse> {
        PriceDatabase::load(&self.prices_file, self.policy).map_err(|e| {
            warn!("[api] {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        })
    }
}

/// Buyout multiplier for a seller-declared condition.
pub fn condition_coefficient(condition: &str) -> Option<f64> {
    match condition.trim().to_lowercase().as_str() {
        "ideal" => Some(1.00),
        "excellent" => Some(0.95),
        "good" => Some(0.90),
        "fair" => Some(0.85),
        _ => None,
    }
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/models")]
async fn models(state: web::Data<ApiState>) -> impl Responder {
    match state.load() {
        Ok(db) => HttpResponse::Ok().json(db.models()),
        Err(rsp) => rsp,
    }
}

#[get("/prices")]
async fn prices(state: web::Data<ApiState>) -> impl Responder {
    let db = match state.load() {
        Ok(db) => db,
        Err(rsp) => return rsp,
    };
    match db.to_json() {
        Ok(body) => HttpResponse::Ok()
            .content_type("application/json")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() })),
    }
}

#[get("/prices/lookup")]
async fn lookup(state: web::Data<ApiState>, q: web::Query<LookupQuery>) -> impl Responder {
    let db = match state.load() {
        Ok(db) => db,
        Err(rsp) => return rsp,
    };
    let key = SpecKey::new(
        q.model.trim(),
        q.ram.unwrap_or(DEFAULT_MEMORY_GB),
        q.ssd.unwrap_or(DEFAULT_STORAGE_GB),
    );
    match db.get(&key) {
        Some(rec) => HttpResponse::Ok().json(rec),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": format!("no record for {key}") })),
    }
}

#[post("/estimate")]
async fn estimate_buyout(state: web::Data<ApiState>, body: web::Json<EstimateReq>) -> impl Responder {
    let coefficient = match body.condition.as_deref() {
        None => 1.0,
        Some(c) => match condition_coefficient(c) {
            Some(k) => k,
            None => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("unknown condition {c:?}, expected ideal|excellent|good|fair")
                }));
            }
        },
    };
    let db = match state.load() {
        Ok(db) => db,
        Err(rsp) => return rsp,
    };
    let key = SpecKey::new(
        body.model.trim(),
        body.ram.unwrap_or(DEFAULT_MEMORY_GB),
        body.ssd.unwrap_or(DEFAULT_STORAGE_GB),
    );
    let resp = match db.get(&key) {
        Some(rec) => EstimateResp {
            found: true,
            market_min: Some(rec.min_price),
            market_max: Some(rec.max_price),
            market_median: Some(rec.median_price),
            buyout_price: Some((rec.buyout_price as f64 * coefficient).round() as u64),
            samples_count: Some(rec.samples_count),
            updated_at: Some(rec.updated_at.clone()),
        },
        None => EstimateResp::default(),
    };
    HttpResponse::Ok().json(resp)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz)
        .service(models)
        .service(prices)
        .service(lookup)
        .service(estimate_buyout);
}

pub async fn serve(state: ApiState, port: u16) -> std::io::Result<()> {
    info!(
        "[api] listening on 0.0.0.0:{port}, serving {}",
        state.prices_file.display()
    );
    let data = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::prices::PriceStatRecord;
    use actix_web::http::StatusCode;
    use actix_web::test as atest;

    fn seeded(dir: &tempfile::TempDir) -> ApiState {
        let prices_file = dir.path().join("prices.json");
        let mut db = PriceDatabase::new(MergePolicy::default());
        db.upsert(PriceStatRecord {
            model_name: "MacBook Air 13 (2022, M2)".into(),
            processor: "Apple M2".into(),
            ram: 8,
            ssd: 256,
            min_price: 61000,
            max_price: 65000,
            median_price: 63000,
            buyout_price: 49000,
            samples_count: 9,
            updated_at: "2026-01-01T00:00:00Z".into(),
            fallback: false,
        })
        .unwrap();
        db.save(&prices_file).unwrap();
        ApiState {
            prices_file,
            policy: MergePolicy::default(),
        }
    }

    #[actix_web::test]
    async fn lookup_and_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let app = atest::init_service(
            App::new()
                .app_data(web::Data::new(seeded(&dir)))
                .configure(routes),
        )
        .await;

        let req = atest::TestRequest::get()
            .uri("/prices/lookup?model=MacBook%20Air%2013%20(2022,%20M2)&ram=8&ssd=256")
            .to_request();
        let rec: serde_json::Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(rec["median_price"], 63000);

        let req = atest::TestRequest::get()
            .uri("/prices/lookup?model=MacBook%20Air%2013%20(2022,%20M2)&ram=16&ssd=512")
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = atest::TestRequest::post()
            .uri("/estimate")
            .set_json(serde_json::json!({
                "model": "MacBook Air 13 (2022, M2)", "ram": 8, "ssd": 256, "condition": "good"
            }))
            .to_request();
        let est: serde_json::Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(est["found"], true);
        assert_eq!(est["buyout_price"], 44100);
        assert_eq!(est["market_min"], 61000);

        let req = atest::TestRequest::post()
            .uri("/estimate")
            .set_json(serde_json::json!({ "model": "ThinkPad" }))
            .to_request();
        let est: serde_json::Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(est["found"], false);

        let req = atest::TestRequest::get().uri("/models").to_request();
        let names: Vec<String> = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(names, vec!["MacBook Air 13 (2022, M2)".to_string()]);
    }

    #[actix_web::test]
    async fn missing_database_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = ApiState {
            prices_file: dir.path().join("none.json"),
            policy: MergePolicy::default(),
        };
        let app = atest::init_service(App::new().app_data(web::Data::new(state)).configure(routes)).await;
        let req = atest::TestRequest::get().uri("/prices").to_request();
        let body: serde_json::Value = atest::call_and_read_body_json(&app, req).await;
        assert!(body["stats"].as_array().unwrap().is_empty());
    }

    #[test]
    fn coefficients() {
        assert_eq!(condition_coefficient("Excellent"), Some(0.95));
        assert_eq!(condition_coefficient("broken"), None);
    }
}

use std::time::Duration;

use rand::{Rng, rng};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, DNT, HeaderMap, HeaderName, HeaderValue,
    LOCATION, PRAGMA, REFERER, RETRY_AFTER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::{StatusCode, redirect};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{BlockSignal, FetchError};

// lowercased fragments of captcha / firewall pages
pub const BLOCK_KEYWORDS: &[&str] = &[
    "доступ ограничен",
    "проблема с ip",
    "подтвердите, что вы не робот",
    "access restricted",
    "are you a robot",
    "firewall-container",
    "g-recaptcha",
    "h-captcha",
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    // inclusive, ms
    pub delay_ms: (u64, u64),
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub proxy_url: Option<String>,
    pub rotate_url: Option<String>,
    pub rotate_timeout: Duration,
    pub rotate_settle_ms: u64,
    pub block_keywords: Vec<String>,
    pub warmup: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: (2000, 4000),
            timeout: Duration::from_secs(45),
            max_retries: 3,
            backoff_base_ms: 5000,
            backoff_max_ms: 60_000,
            proxy_url: None,
            rotate_url: None,
            rotate_timeout: Duration::from_secs(10),
            rotate_settle_ms: 5000,
            block_keywords: BLOCK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            warmup: false,
        }
    }
}

// -------------------------
// Retry state machine
// -------------------------

#[derive(Debug)]
enum State {
    Idle,
    Attempting { attempt: u32 },
    Backoff { attempt: u32, wait: Duration },
    Blocked { attempt: u32, signal: BlockSignal, wait: Option<Duration> },
    Rotating { attempt: u32, wait: Option<Duration> },
    Exhausted { attempts: u32 },
}

enum Attempt {
    Success(String),
    Blocked(BlockSignal, Option<Duration>),
    Transient(FetchError, Option<Duration>),
    Fatal(FetchError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Profile {
    Desktop,
    Mobile,
}

impl Profile {
    fn flip(self) -> Self {
        match self {
            Profile::Desktop => Profile::Mobile,
            Profile::Mobile => Profile::Desktop,
        }
    }

    fn random_ua(self) -> String {
        match self {
            Profile::Desktop => random_desktop_ua(),
            Profile::Mobile => random_mobile_ua(),
        }
    }
}

// -------------------------
// Fetcher
// -------------------------

pub struct Fetcher {
    cfg: FetchConfig,
    client: reqwest::Client,
    profile: Profile,
    user_agent: String,
    referer: Option<String>,
    fresh_session: bool,
    rotations: u32,
    requests: u64,
}

impl Fetcher {
    pub fn new(cfg: FetchConfig) -> Result<Self, FetchError> {
        let profile = Profile::Desktop;
        let user_agent = profile.random_ua();
        let client = build_client(&cfg, &user_agent)?;
        if cfg.proxy_url.is_some() {
            info!("[fetch] routing through upstream proxy");
        }
        Ok(Self {
            cfg,
            client,
            profile,
            user_agent,
            referer: None,
            fresh_session: true,
            rotations: 0,
            requests: 0,
        })
    }

    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// `Blocked` only when every attempt was a soft-block, `Exhausted` otherwise.
    pub async fn fetch(&mut self, url: &Url) -> Result<String, FetchError> {
        let max = self.cfg.max_retries.max(1);
        let mut state = State::Idle;
        let mut last: Option<FetchError> = None;
        let mut only_blocks = true;

        loop {
            state = match state {
                State::Idle => State::Attempting { attempt: 1 },

                State::Attempting { attempt } => {
                    self.pace().await;
                    match self.attempt(url).await {
                        Attempt::Success(body) => {
                            debug!("[fetch] {} ok on attempt {attempt} len={}", url, body.len());
                            return Ok(body);
                        }
                        Attempt::Blocked(signal, wait) => {
                            warn!("[fetch] {} attempt {attempt}/{max} blocked: {signal}", url);
                            State::Blocked { attempt, signal, wait }
                        }
                        Attempt::Transient(err, retry_after) => {
                            warn!("[fetch] {} attempt {attempt}/{max} failed: {err}", url);
                            only_blocks = false;
                            last = Some(err);
                            if attempt >= max {
                                State::Exhausted { attempts: attempt }
                            } else {
                                let wait = retry_after.unwrap_or_else(|| {
                                    backoff_delay(
                                        attempt,
                                        self.cfg.backoff_base_ms,
                                        self.cfg.backoff_max_ms,
                                    )
                                });
                                State::Backoff {
                                    attempt,
                                    wait: wait.min(Duration::from_millis(self.cfg.backoff_max_ms)),
                                }
                            }
                        }
                        Attempt::Fatal(err) => {
                            warn!("[fetch] {} not retryable: {err}", url);
                            only_blocks = false;
                            last = Some(err);
                            State::Exhausted { attempts: attempt }
                        }
                    }
                }

                State::Backoff { attempt, wait } => {
                    debug!("[fetch] backing off {:?}", wait);
                    sleep(wait).await;
                    State::Attempting { attempt: attempt + 1 }
                }

                State::Blocked { attempt, signal, wait } => {
                    last = Some(FetchError::Blocked(signal));
                    if attempt >= max {
                        State::Exhausted { attempts: attempt }
                    } else {
                        State::Rotating { attempt, wait }
                    }
                }

                State::Rotating { attempt, wait } => {
                    self.rotate().await;
                    let settle = wait
                        .unwrap_or(Duration::from_millis(self.cfg.rotate_settle_ms))
                        .min(Duration::from_millis(self.cfg.backoff_max_ms));
                    sleep(settle).await;
                    State::Attempting { attempt: attempt + 1 }
                }

                State::Exhausted { attempts } => {
                    let last = last.unwrap_or_else(|| FetchError::Network("no attempt made".into()));
                    return Err(match last {
                        FetchError::Blocked(signal) if only_blocks => FetchError::Blocked(signal),
                        other => FetchError::Exhausted {
                            url: url.to_string(),
                            attempts,
                            last: Box::new(other),
                        },
                    });
                }
            };
        }
    }

    async fn attempt(&mut self, url: &Url) -> Attempt {
        if self.fresh_session && self.cfg.warmup {
            self.warmup_hit(&origin_of(url)).await;
        }
        self.fresh_session = false;
        self.requests += 1;

        let referer = self.referer.clone().unwrap_or_else(|| origin_of(url));
        let headers = base_headers(self.profile, &self.user_agent, &referer);
        let rsp = match self.client.get(url.as_str()).headers(headers).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(e.into(), None),
        };

        let status = rsp.status();
        let retry_after = parse_retry_after(rsp.headers());
        debug!(
            "[fetch] {} profile={:?} -> status={} (referer={})",
            url, self.profile, status, referer
        );

        if status.is_redirection() {
            let to = rsp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Attempt::Blocked(BlockSignal::Redirect(to), retry_after);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Attempt::Blocked(BlockSignal::Status(status.as_u16()), retry_after);
        }
        if status.is_server_error() {
            return Attempt::Transient(FetchError::Status(status.as_u16()), retry_after);
        }
        if !status.is_success() {
            return Attempt::Fatal(FetchError::Status(status.as_u16()));
        }

        let text = match rsp.text().await {
            Ok(t) => t,
            Err(e) => return Attempt::Transient(e.into(), None),
        };
        if let Some(keyword) = detect_block(&text, &self.cfg.block_keywords) {
            return Attempt::Blocked(BlockSignal::Keyword(keyword), None);
        }

        self.referer = Some(url.to_string());
        Attempt::Success(text)
    }

    async fn pace(&self) {
        let (lo, hi) = self.cfg.delay_ms;
        if hi == 0 {
            return;
        }
        let ms = rng().random_range(lo..=hi.max(lo));
        sleep(Duration::from_millis(ms)).await;
    }

    // new exit IP, flipped profile, fresh cookie jar
    async fn rotate(&mut self) {
        self.rotations += 1;
        if let Some(rotate_url) = &self.cfg.rotate_url {
            let client = reqwest::Client::builder()
                .timeout(self.cfg.rotate_timeout)
                .build();
            match client {
                Ok(c) => match c.get(rotate_url).send().await {
                    Ok(r) => info!("[rotate] IP change requested: {}", r.status()),
                    Err(e) => warn!("[rotate] IP change failed, continuing: {e}"),
                },
                Err(e) => warn!("[rotate] could not build client, continuing: {e}"),
            }
        }

        self.profile = self.profile.flip();
        self.user_agent = self.profile.random_ua();
        match build_client(&self.cfg, &self.user_agent) {
            Ok(c) => self.client = c,
            Err(e) => warn!("[rotate] keeping previous session: {e}"),
        }
        self.referer = None;
        self.fresh_session = true;
    }

    async fn warmup_hit(&self, origin: &str) {
        let headers = base_headers(self.profile, &self.user_agent, origin);
        match self.client.get(origin).headers(headers).send().await {
            Ok(r) => {
                let _ = r.text().await;
            }
            Err(e) => warn!("[warmup] failed: {e}"),
        }
    }
}

fn build_client(cfg: &FetchConfig, user_agent: &str) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .cookie_store(true)
        .redirect(redirect::Policy::none())
        .timeout(cfg.timeout)
        .connect_timeout(Duration::from_secs(15));
    if let Some(proxy) = &cfg.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_address(proxy))
            .map_err(|e| FetchError::Network(format!("bad proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

// -------------------------
// Fetch helpers
// -------------------------

/// `base · 2^(attempt-1)`, capped at `max_ms`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let ms = base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(ms.min(max_ms))
}

// delta-seconds only
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub fn detect_block(body: &str, keywords: &[String]) -> Option<String> {
    let lower = body.to_lowercase();
    keywords
        .iter()
        .find(|k| lower.contains(k.as_str()))
        .cloned()
}

pub fn proxy_address(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

fn origin_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), url.host_str().unwrap_or_default(), port),
        None => format!("{}://{}/", url.scheme(), url.host_str().unwrap_or_default()),
    }
}

fn base_headers(profile: Profile, user_agent: &str, referer: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        h.insert(USER_AGENT, ua);
    }
    h.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    h.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    if let Ok(r) = HeaderValue::from_str(referer) {
        h.insert(REFERER, r);
    }
    h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    h.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    h.insert(DNT, HeaderValue::from_static("1"));

    h.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    h.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    h.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    if profile == Profile::Mobile {
        h.insert(
            HeaderName::from_static("sec-ch-ua-mobile"),
            HeaderValue::from_static("?1"),
        );
    }
    h
}

fn random_desktop_ua() -> String {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    ];
    let i = rng().random_range(0..UAS.len());
    UAS[i].to_string()
}

fn random_mobile_ua() -> String {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    ];
    let i = rng().random_range(0..UAS.len());
    UAS[i].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1, 500, 10_000), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, 500, 10_000), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, 500, 10_000), Duration::from_millis(2000));
        assert_eq!(backoff_delay(9, 500, 10_000), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(64, 500, 10_000), Duration::from_millis(10_000));
    }

    #[test]
    fn retry_after_seconds_only() {
        let mut h = HeaderMap::new();
        assert_eq!(parse_retry_after(&h), None);
        h.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(7)));
        h.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&h), None);
    }

    #[test]
    fn block_keywords_are_case_insensitive() {
        let kws = FetchConfig::default().block_keywords;
        let body = "<h2 class=\"firewall-title\">Доступ ограничен: проблема с IP</h2>";
        assert_eq!(detect_block(body, &kws).as_deref(), Some("доступ ограничен"));
        assert_eq!(detect_block("<div data-marker=\"item\"></div>", &kws), None);
    }

    #[test]
    fn proxy_gets_scheme_when_bare() {
        assert_eq!(proxy_address("u:p@1.2.3.4:8000"), "http://u:p@1.2.3.4:8000");
        assert_eq!(proxy_address("socks5://1.2.3.4:1080"), "socks5://1.2.3.4:1080");
    }

    #[test]
    fn origin_keeps_port() {
        let u = Url::parse("http://127.0.0.1:8081/list?p=2").unwrap();
        assert_eq!(origin_of(&u), "http://127.0.0.1:8081/");
        let u = Url::parse("https://www.avito.ru/moskva/noutbuki").unwrap();
        assert_eq!(origin_of(&u), "https://www.avito.ru/");
    }
}

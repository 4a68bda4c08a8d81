// Pager helpers (p=N scheme)

use url::Url;

pub const PAGE_PARAM: &str = "p";

/// Strip the page parameter from `url`, returning the base URL and the page it pointed at.
pub fn normalize_pager(url: &Url) -> (Url, usize) {
    let mut base = url.clone();

    let mut start_page: usize = 1;
    let mut qp: Vec<(String, String)> = vec![];
    for (k, v) in url.query_pairs() {
        if k == PAGE_PARAM {
            if let Ok(n) = v.parse::<usize>() {
                start_page = n.max(1);
            }
        } else {
            qp.push((k.into_owned(), v.into_owned()));
        }
    }

    if qp.is_empty() {
        base.set_query(None);
    } else {
        base.query_pairs_mut()
            .clear()
            .extend_pairs(qp.iter().map(|(k, v)| (&**k, &**v)));
    }

    (base, start_page)
}

/// Page 1 is the bare search URL; later pages append `p=N`.
pub fn build_page_url(base: &Url, page: usize) -> Url {
    if page <= 1 {
        return base.clone();
    }
    let mut u = base.clone();
    u.query_pairs_mut()
        .append_pair(PAGE_PARAM, &page.to_string());
    u
}

/// URLs for `count` consecutive pages starting at whatever page `start` points at.
pub fn page_urls(start: &Url, count: usize) -> Vec<Url> {
    let (base, first) = normalize_pager(start);
    (first..first + count)
        .map(|page| build_page_url(&base, page))
        .collect()
}

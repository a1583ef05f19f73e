//! Helpers for turning configured host strings into HTTP base URLs.

use url::Url;

/// Prefix `http://` when the address carries no scheme.
pub fn ensure_http_scheme(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Normalise a base URL: scheme added if missing, path/query/fragment and
/// trailing slashes removed.
pub fn normalize_base_url(address: &str) -> Result<String, url::ParseError> {
    let candidate = ensure_http_scheme(address.trim());
    let mut url = Url::parse(&candidate)?;
    url.set_query(None);
    url.set_fragment(None);
    let mut normalized = url.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

/// `GET <base>/download?name=<name>` with the name query-encoded.
pub fn download_url(base: &str, name: &str) -> Result<Url, url::ParseError> {
    let base = normalize_base_url(base)?;
    let mut url = Url::parse(&format!("{base}/download"))?;
    url.query_pairs_mut().append_pair("name", name);
    Ok(url)
}

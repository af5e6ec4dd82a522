use url::Url;

const TRACKING_PREFIXES: &[&str] = &["utm_"];
const TRACKING_EXACT: &[&str] = &["gclid", "yclid", "fbclid", "mc_cid", "mc_eid"];

fn is_tracking_key(key: &str) -> bool {
    TRACKING_PREFIXES.iter().any(|p| key.starts_with(p)) || TRACKING_EXACT.contains(&key)
}

/// Canonicalizes a URL per the crawler's normalization contract: lowercase
/// scheme/host, default scheme `https` and path `/`, strip the fragment,
/// drop tracking query params, sort the rest, collapse repeated path
/// slashes, and strip a trailing slash unless the path is `/` or ends in
/// `.html/`.
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut candidate = raw.trim().to_string();
    if !candidate.contains("://") {
        candidate = format!("https://{candidate}");
    }

    let mut url = Url::parse(&candidate)?;

    if url.scheme().is_empty() {
        let _ = url.set_scheme("https");
    }
    let lower_scheme = url.scheme().to_ascii_lowercase();
    let _ = url.set_scheme(&lower_scheme);

    if let Some(host) = url.host_str() {
        let lower_host = host.to_ascii_lowercase();
        let _ = url.set_host(Some(&lower_host));
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_key(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.cmp(b));
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    let collapsed_path = collapse_slashes(url.path());
    let final_path = normalize_trailing_slash(&collapsed_path);
    url.set_path(&final_path);

    Ok(url.to_string())
}

fn collapse_slashes(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

fn normalize_trailing_slash(path: &str) -> String {
    if path == "/" || path.ends_with(".html/") {
        return path.to_string();
    }
    if path.len() > 1 && path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let once = normalize_url("HTTP://Example.COM/a//b/?utm_source=x&z=1&a=2#frag").unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_tracking_params_and_sorts_rest() {
        let normalized =
            normalize_url("https://example.com/page?utm_source=a&gclid=b&z=1&a=2").unwrap();
        assert_eq!(normalized, "https://example.com/page?a=2&z=1");
    }

    #[test]
    fn collapses_repeated_slashes_and_strips_trailing() {
        let normalized = normalize_url("https://example.com//a//b//").unwrap();
        assert_eq!(normalized, "https://example.com/a/b");
    }

    #[test]
    fn keeps_trailing_slash_for_html_suffixed_path() {
        let normalized = normalize_url("https://example.com/a/index.html/").unwrap();
        assert_eq!(normalized, "https://example.com/a/index.html/");
    }

    #[test]
    fn defaults_empty_path_to_root() {
        let normalized = normalize_url("https://example.com").unwrap();
        assert_eq!(normalized, "https://example.com/");
    }

    #[test]
    fn query_param_reordering_yields_same_key() {
        let a = normalize_url("https://example.com/p?b=2&a=1&utm_campaign=x").unwrap();
        let b = normalize_url("https://example.com/p?utm_campaign=y&a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reserved_chars_in_query_value_round_trip() {
        let once = normalize_url("https://example.com/p?q=a%3Db%26c").unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice, "re-encoding a value containing '=' and '&' must stay idempotent");
        assert_eq!(once, "https://example.com/p?q=a%3Db%26c");
    }
}

use url::Url;

/// Extensions that mark a request as static asset traffic.
pub const ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "bmp",
    "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "webm", "ogg", "wav",
];

/// Returns true for hrefs that can never lead to a crawlable page.
pub fn is_unsafe_href(href: &str) -> bool {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    href.is_empty()
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
        || href.starts_with('#')
}

/// Resolve an href against the page it was found on.
///
/// Unsafe schemes and fragment-only links are dropped, and only http(s)
/// results are returned. The fragment is preserved so that callers see the
/// link as written; normalization happens at enqueue time.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    if is_unsafe_href(href) {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href.trim()).ok()?;

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Lowercased file extension of the last path segment, if any.
pub fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether the URL path ends in a static-asset extension.
pub fn is_asset_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    path_extension(&path)
        .map(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

use std::sync::LazyLock;

use regex::Regex;

static MAGNET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(magnet:[^"\s]+)""#).unwrap());
static BTIH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"btih:([A-Fa-f0-9]{40}|[A-Fa-f0-9]{32})").unwrap());
static PAGE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d+)(/?)$").unwrap());

/// First quoted `magnet:` string anywhere in a raw page body.
pub fn find_magnet_link(body: &str) -> Option<&str> {
    MAGNET_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// The btih content hash of a magnet link, uppercased.
pub fn extract_content_hash(locator: &str) -> Option<String> {
    BTIH_RE
        .captures(locator)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Page counter at the end of a listing url: `/anime/1/` -> `(/anime/2/, 1)`.
/// Only a final path segment made entirely of digits counts. Anything else
/// is a single page and yields None.
pub fn next_page_url(url: &str) -> Option<(String, u64)> {
    let caps = PAGE_NUMBER_RE.captures(url)?;
    let number = caps.get(1)?;
    let current: u64 = number.as_str().parse().ok()?;
    let next = current.checked_add(1)?;
    let slash = caps.get(2).map_or("", |m| m.as_str());
    Some((format!("{}{}{}", &url[..number.start()], next, slash), current))
}

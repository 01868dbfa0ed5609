//! URL normalization shared by the bot commands and the admin API
//!
//! Every URL is normalized before it reaches storage, so the unique
//! constraint on `sites.url` and the notification join both operate on
//! one canonical spelling.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?([a-zA-Z0-9-]+\.)+[a-zA-Z]{2,63}/?$").expect("invalid URL pattern")
});

const DEFAULT_SCHEME: &str = "http://";

/// Input rejected by [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidUrl(pub String);

impl fmt::Display for InvalidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid url: {}", self.0)
    }
}

impl std::error::Error for InvalidUrl {}

/// Normalize a user-supplied URL to its canonical form.
///
/// The input must match `^(https?://)?([a-zA-Z0-9-]+\.)+[a-zA-Z]{2,63}/?$`.
/// A missing scheme becomes `http://`; a single trailing `/` is stripped.
pub fn normalize(url: &str) -> Result<String, InvalidUrl> {
    if !URL_PATTERN.is_match(url) {
        return Err(InvalidUrl(url.to_string()));
    }

    let mut url = url.to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url.insert_str(0, DEFAULT_SCHEME);
    }

    if let Some(stripped) = url.strip_suffix('/') {
        url.truncate(stripped.len());
    }

    Ok(url)
}

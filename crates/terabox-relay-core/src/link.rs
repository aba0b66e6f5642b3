//! Link validation and file identifier extraction.

/// Decides whether a message is a link this bot can relay
#[derive(Debug, Clone)]
pub struct LinkValidator {
    marker: String,
}

impl LinkValidator {
    /// Create a validator matching on `marker`
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// True iff `text` contains the marker anywhere. No URL parsing is done.
    #[must_use]
    pub fn is_supported(&self, text: &str) -> bool {
        text.contains(self.marker.as_str())
    }
}

/// Trailing path segment of `url`, without query or fragment.
///
/// Returns `None` when the segment is empty, e.g. for a URL ending in `/`.
///
/// # Examples
///
/// ```
/// use terabox_relay_core::link::derive_file_id;
///
/// assert_eq!(derive_file_id("https://terabox.com/s/abc123").as_deref(), Some("abc123"));
/// assert_eq!(derive_file_id("https://terabox.com/s/abc123?lang=en").as_deref(), Some("abc123"));
/// assert_eq!(derive_file_id("https://terabox.com/s/"), None);
/// ```
#[must_use]
pub fn derive_file_id(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let without_suffix = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed);
    let segment = without_suffix.rsplit('/').next().unwrap_or(without_suffix);

    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Removes the fragment portion (everything from the first `#`) of a URI
///
/// # Examples
///
/// ```
/// use h2fetch::url::strip_fragment;
///
/// assert_eq!(strip_fragment("https://example.com/page#top"), "https://example.com/page");
/// assert_eq!(strip_fragment("https://example.com/page"), "https://example.com/page");
/// ```
pub fn strip_fragment(raw: &str) -> &str {
    match raw.find('#') {
        Some(pos) => &raw[..pos],
        None => raw,
    }
}

//! Ordered request header assembly
//!
//! Headers are built as an ordered list: the four pseudo-headers, the
//! default headers, `content-length` for POST, then user overrides. An
//! override for `accept`, `user-agent` or `host` replaces the default value
//! in place; any other override is appended.

use crate::config::HeaderOverrides;
use crate::url::RequestUri;

/// Client identifier sent in `user-agent`
pub const USER_AGENT: &str = concat!("h2fetch/", env!("CARGO_PKG_VERSION"));

/// A single name/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// Ordered header list with insert-or-replace by case-insensitive name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<HeaderField>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field after every existing one
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(HeaderField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces the value of the first field named `name` (ignoring case),
    /// or appends a new field if there is none
    ///
    /// # Returns
    ///
    /// `true` if an existing field was replaced
    pub fn replace_or_append(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(field) => {
                field.value = value.into();
                true
            }
            None => {
                self.append(name, value);
                false
            }
        }
    }

    /// Value of the first field named `name`, ignoring case
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    /// Regular (non-pseudo) fields in order
    pub fn regular(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter().filter(|f| !f.is_pseudo())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Maps an override name onto the default field it replaces, if any
fn replaced_default(name: &str) -> Option<&'static str> {
    if name.eq_ignore_ascii_case("accept") {
        Some("accept")
    } else if name.eq_ignore_ascii_case("user-agent") {
        Some("user-agent")
    } else if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case(":authority") {
        Some(":authority")
    } else {
        None
    }
}

/// Builds the header list submitted for a request
///
/// # Arguments
///
/// * `uri` - Request URI supplying path, scheme and authority
/// * `body_len` - Total body length; `Some` makes the request a POST
/// * `overrides` - User-supplied header overrides
pub fn build_request_headers(
    uri: &RequestUri,
    body_len: Option<u64>,
    overrides: &HeaderOverrides,
) -> HeaderList {
    let mut headers = HeaderList::new();

    let method = if body_len.is_some() { "POST" } else { "GET" };
    headers.append(":method", method);
    headers.append(":path", uri.path_and_query());
    headers.append(":scheme", uri.scheme());
    headers.append(":authority", uri.authority());

    headers.append("accept", "*/*");
    headers.append("accept-encoding", "gzip, deflate");
    headers.append("user-agent", USER_AGENT);

    if let Some(len) = body_len {
        headers.append("content-length", len.to_string());
    }

    for (name, value) in overrides.iter() {
        match replaced_default(name) {
            Some(target) => {
                headers.replace_or_append(target, value);
            }
            None => headers.append(name, value),
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(headers: &HeaderList) -> Vec<&str> {
        headers.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_default_get_headers() {
        let uri = RequestUri::parse("https://example.com/index.html?x=1").unwrap();
        let headers = build_request_headers(&uri, None, &HeaderOverrides::new());

        assert_eq!(
            names(&headers),
            vec![
                ":method",
                ":path",
                ":scheme",
                ":authority",
                "accept",
                "accept-encoding",
                "user-agent"
            ]
        );
        assert_eq!(headers.get(":method"), Some("GET"));
        assert_eq!(headers.get(":path"), Some("/index.html?x=1"));
        assert_eq!(headers.get(":scheme"), Some("https"));
        assert_eq!(headers.get(":authority"), Some("example.com"));
        assert_eq!(headers.get("accept"), Some("*/*"));
        assert_eq!(headers.get("accept-encoding"), Some("gzip, deflate"));
        assert_eq!(headers.get("user-agent"), Some(USER_AGENT));
    }

    #[test]
    fn test_authority_keeps_non_default_port() {
        let uri = RequestUri::parse("http://example.com:8080/").unwrap();
        let headers = build_request_headers(&uri, None, &HeaderOverrides::new());
        assert_eq!(headers.get(":authority"), Some("example.com:8080"));
    }

    #[test]
    fn test_post_adds_content_length() {
        let uri = RequestUri::parse("http://example.com/upload").unwrap();
        let headers = build_request_headers(&uri, Some(1234), &HeaderOverrides::new());

        assert_eq!(headers.get(":method"), Some("POST"));
        assert_eq!(headers.get("content-length"), Some("1234"));
        assert_eq!(names(&headers).last(), Some(&"content-length"));
    }

    #[test]
    fn test_special_overrides_replace_in_place() {
        let uri = RequestUri::parse("http://example.com/").unwrap();
        let mut overrides = HeaderOverrides::new();
        overrides.insert("Accept", "text/html");
        overrides.insert("User-Agent", "custom/1.0");
        overrides.insert("Host", "alias.example.com");

        let headers = build_request_headers(&uri, None, &overrides);

        assert_eq!(headers.len(), 7);
        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get("user-agent"), Some("custom/1.0"));
        assert_eq!(headers.get(":authority"), Some("alias.example.com"));
        assert_eq!(headers.get("host"), None);
        assert_eq!(names(&headers)[4], "accept");
    }

    #[test]
    fn test_other_overrides_append_in_order() {
        let uri = RequestUri::parse("http://example.com/").unwrap();
        let mut overrides = HeaderOverrides::new();
        overrides.insert("x-first", "1");
        overrides.insert("x-second", "2");

        let headers = build_request_headers(&uri, None, &overrides);
        let tail: Vec<_> = names(&headers).into_iter().skip(7).collect();
        assert_eq!(tail, vec!["x-first", "x-second"]);
    }

    #[test]
    fn test_case_variant_overrides_both_pass_through() {
        let uri = RequestUri::parse("http://example.com/").unwrap();
        let mut overrides = HeaderOverrides::new();
        overrides.insert("X-Trace", "a");
        overrides.insert("x-trace", "b");

        let headers = build_request_headers(&uri, None, &overrides);
        let traces: Vec<_> = headers
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case("x-trace"))
            .map(|f| f.value.as_str())
            .collect();
        assert_eq!(traces, vec!["a", "b"]);
    }

    #[test]
    fn test_regular_skips_pseudo_headers() {
        let uri = RequestUri::parse("http://example.com/").unwrap();
        let headers = build_request_headers(&uri, None, &HeaderOverrides::new());
        assert!(headers.regular().all(|f| !f.name.starts_with(':')));
        assert_eq!(headers.regular().count(), 3);
    }
}

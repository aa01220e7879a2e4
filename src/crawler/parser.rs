//! HTML asset link extraction
//!
//! Collects the URLs of page assets:
//! - `<link rel="stylesheet" href="...">`
//! - `<img src="...">`
//! - `<script src="...">`
//!
//! Anchors (`<a href>`) are navigation, not assets, and are never collected.
//! The scanner is incremental: links are available as soon as the tag that
//! carries them has been seen, so a page does not need to be complete.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
    TokenizerResult,
};
use std::fmt;
use url::Url;

/// Streaming asset link scanner over arbitrary body chunks
///
/// Chunks may split tags and multi-byte characters; both are carried over
/// to the next [`push`](Self::push).
pub struct AssetScanner {
    tokenizer: Tokenizer<LinkSink>,
    input: BufferQueue,
    /// Trailing bytes of an incomplete UTF-8 sequence
    partial: Vec<u8>,
    ended: bool,
}

impl AssetScanner {
    /// Creates a scanner resolving links against `base_url`
    pub fn new(base_url: &Url) -> Self {
        let sink = LinkSink {
            base: base_url.clone(),
            links: Vec::new(),
        };
        Self {
            tokenizer: Tokenizer::new(sink, TokenizerOpts::default()),
            input: BufferQueue::new(),
            partial: Vec::new(),
            ended: false,
        }
    }

    /// Scans the next piece of the document
    ///
    /// Ignored once [`end`](Self::end) was called.
    pub fn push(&mut self, data: &[u8]) {
        if self.ended {
            return;
        }
        let text = self.decode_utf8(data);
        if text.is_empty() {
            return;
        }
        self.input.push_back(StrTendril::from_slice(&text));
        self.run();
    }

    /// Flushes whatever the tokenizer still holds
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if !self.partial.is_empty() {
            self.partial.clear();
            self.input.push_back(StrTendril::from_slice("\u{FFFD}"));
            self.run();
        }
        self.tokenizer.end();
    }

    /// Takes the links found since the last call, in document order
    pub fn take_links(&mut self) -> Vec<String> {
        std::mem::take(&mut self.tokenizer.sink.links)
    }

    fn run(&mut self) {
        while let TokenizerResult::Script(_) = self.tokenizer.feed(&mut self.input) {}
    }

    /// Decodes as much of `partial + data` as forms complete characters
    fn decode_utf8(&mut self, data: &[u8]) -> String {
        self.partial.extend_from_slice(data);

        let mut text = String::new();
        let mut rest: &[u8] = &self.partial;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push('\u{FFFD}');
                            rest = &tail[len..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.partial = rest.to_vec();
        text
    }
}

impl fmt::Debug for AssetScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetScanner")
            .field("base", &self.tokenizer.sink.base.as_str())
            .field("pending_links", &self.tokenizer.sink.links.len())
            .field("ended", &self.ended)
            .finish()
    }
}

/// Token sink that records asset links
struct LinkSink {
    base: Url,
    links: Vec<String>,
}

impl TokenSink for LinkSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        let Token::TagToken(tag) = token else {
            return TokenSinkResult::Continue;
        };
        if tag.kind != TagKind::StartTag {
            return TokenSinkResult::Continue;
        }

        if let Some(value) = asset_attribute(&tag) {
            if let Some(absolute_url) = resolve_link(value, &self.base) {
                self.links.push(absolute_url);
            }
        }

        // switch to raw text where the tree builder would, so script
        // bodies are not tokenized as markup
        match &*tag.name {
            "script" => TokenSinkResult::RawData(RawKind::ScriptData),
            "style" | "xmp" | "iframe" | "noembed" | "noframes" => {
                TokenSinkResult::RawData(RawKind::Rawtext)
            }
            "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
            _ => TokenSinkResult::Continue,
        }
    }
}

fn attribute<'t>(tag: &'t Tag, name: &str) -> Option<&'t str> {
    tag.attrs
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| &*attr.value)
}

/// The link-carrying attribute of an asset tag
fn asset_attribute(tag: &Tag) -> Option<&str> {
    match &*tag.name {
        "img" | "script" => attribute(tag, "src"),
        "link" => {
            let rel = attribute(tag, "rel")?;
            let is_stylesheet = rel
                .split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"));
            if is_stylesheet {
                attribute(tag, "href")
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Extracts asset links from a complete HTML document
///
/// Links are resolved against `base_url` and returned in document order.
/// No origin filtering happens here.
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The page URL used to resolve relative links
///
/// # Example
///
/// ```
/// use h2fetch::crawler::extract_asset_links;
/// use url::Url;
///
/// let html = r#"<html><body><img src="/a.png"></body></html>"#;
/// let base_url = Url::parse("http://example.com/").unwrap();
/// let links = extract_asset_links(html, &base_url);
/// assert_eq!(links, vec!["http://example.com/a.png".to_string()]);
/// ```
pub fn extract_asset_links(html: &str, base_url: &Url) -> Vec<String> {
    let mut scanner = AssetScanner::new(base_url);
    scanner.push(html.as_bytes());
    scanner.end();
    scanner.take_links()
}

/// Resolves an attribute value against the page URL
///
/// Empty values, `javascript:` and `data:` URIs and unresolvable values
/// give `None`.
fn resolve_link(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();

    if value.is_empty() {
        return None;
    }

    let lower = value.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") {
        return None;
    }

    base_url.join(value).ok().map(|url| url.to_string())
}

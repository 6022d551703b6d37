//! Candidate URL extraction from sitemap text.
//!
//! The parser only needs `extract(text) -> [url]`; how `<loc>` values are
//! found is swappable through [`UrlExtractor`].
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Namespace prefixes of sitemap extensions whose `<loc>` values are media
/// files rather than pages.
pub const EXCLUDED_PREFIXES: [&str; 2] = ["image", "video"];

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The structural extractor hit XML it could not tokenize
    #[error("Malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
}

/// Turns document text into candidate location strings, in document order.
pub trait UrlExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Result<Vec<String>, ExtractError>;
}

/// Line-oriented `<loc>` scanner. The default extractor.
///
/// Rewrites the text so every `<loc>` starts its own line, with namespaced
/// variants (`<s:loc>`) folded to `<loc>` and extension tags such as
/// `<image:loc>` left alone, then reads the value of each `<loc>` line.
/// Values are returned verbatim apart from trimming and CDATA unwrapping, so
/// entities like `&amp;` stay escaped. Tolerates documents that are not
/// well-formed XML.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineExtractor;

impl UrlExtractor for LineExtractor {
    fn extract(&self, text: &str) -> Result<Vec<String>, ExtractError> {
        let normalized = normalize_tags(text);
        let mut urls = Vec::new();
        let mut pending: Option<String> = None;

        for line in normalized.lines() {
            // Every `<loc>` starts a line, so a new one abandons an unclosed value
            let line = match (line.find("<loc>"), pending.take()) {
                (Some(start), _) => line[start..].to_owned(),
                (None, Some(mut open)) => {
                    open.push('\n');
                    open.push_str(line);
                    open
                }
                (None, None) => continue,
            };

            let inner = &line["<loc>".len()..];
            match inner.find("</loc>") {
                Some(end) => {
                    if let Some(url) = clean_value(&inner[..end]) {
                        urls.push(url);
                    }
                }
                // Value wrapped onto following lines
                None => pending = Some(line),
            }
        }

        Ok(urls)
    }
}

/// Streaming XML extractor built on `quick-xml`.
///
/// Collects `<loc>` text directly under `<url>` or `<sitemap>` elements,
/// ignoring extension namespaces. Entities are unescaped. Fails on
/// malformed XML instead of guessing.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlExtractor;

impl UrlExtractor for XmlExtractor {
    fn extract(&self, text: &str) -> Result<Vec<String>, ExtractError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut urls = Vec::new();
        // Local names of currently open elements
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut loc: Option<String> = None;

        loop {
            let event = reader.read_event().map_err(|e| ExtractError::Malformed {
                position: reader.buffer_position(),
                message: e.to_string(),
            })?;

            match event {
                Event::Start(e) => {
                    let name = e.name();
                    let local = name.local_name().as_ref().to_vec();
                    let excluded = name.prefix().is_some_and(|p| {
                        EXCLUDED_PREFIXES
                            .iter()
                            .any(|ex| p.as_ref().eq_ignore_ascii_case(ex.as_bytes()))
                    });
                    let parent_ok = matches!(
                        stack.last().map(Vec::as_slice),
                        Some(b"url") | Some(b"sitemap")
                    );
                    if local == b"loc" && !excluded && parent_ok {
                        loc = Some(String::new());
                    }
                    stack.push(local);
                }
                Event::End(_) => {
                    if stack.pop().as_deref() == Some(b"loc".as_slice()) {
                        if let Some(value) = loc.take() {
                            let value = value.trim();
                            if !value.is_empty() {
                                urls.push(value.to_owned());
                            }
                        }
                    }
                }
                Event::Text(e) => {
                    if let Some(value) = loc.as_mut() {
                        let unescaped = e.unescape().map_err(|err| ExtractError::Malformed {
                            position: reader.buffer_position(),
                            message: err.to_string(),
                        })?;
                        value.push_str(&unescaped);
                    }
                }
                Event::CData(e) => {
                    if let Some(value) = loc.as_mut() {
                        value.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(urls)
    }
}

/// Returns true if `text` contains an opening `<sitemap>` element, with or
/// without a namespace prefix. `<sitemapindex>` alone does not count.
pub fn is_index_document(text: &str) -> bool {
    tags(text).any(|tag| !tag.closing && tag.local == "sitemap")
}

struct Tag<'a> {
    closing: bool,
    prefix: Option<&'a str>,
    local: &'a str,
    /// Byte range of the whole tag including angle brackets
    start: usize,
    end: usize,
}

/// Iterates over simple tags (`<name>`, `</name>`, `<p:name>`, `<name attr>`)
/// in `text`. Comments, declarations and processing instructions are skipped.
fn tags(text: &str) -> impl Iterator<Item = Tag<'_>> {
    let mut from = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = text[from..].find('<') {
            let start = from + offset;
            let rest = &text[start..];
            if let Some(terminator) = [("<!--", "-->"), (CDATA_OPEN, CDATA_CLOSE)]
                .iter()
                .find_map(|(open, close)| rest.starts_with(*open).then_some(*close))
            {
                from = rest
                    .find(terminator)
                    .map_or(text.len(), |i| start + i + terminator.len());
                continue;
            }

            let Some(close) = rest.find('>') else {
                from = text.len();
                return None;
            };
            let end = start + close + 1;
            from = start + 1;

            let body = &text[start + 1..end - 1];
            let (closing, body) = match body.strip_prefix('/') {
                Some(rest) => (true, rest),
                None => (false, body),
            };
            let name = body
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .unwrap_or("");
            if name.is_empty() || !name.chars().all(is_name_char) {
                continue;
            }

            from = end;
            let (prefix, local) = match name.rsplit_once(':') {
                Some((p, l)) => (Some(p), l),
                None => (None, name),
            };
            return Some(Tag {
                closing,
                prefix,
                local,
                start,
                end,
            });
        }
        None
    })
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '-' | '_' | '.')
}

/// Puts each `<loc>` on its own line and each `<sitemap>` at a line end,
/// folding namespaced forms to the bare tag.
fn normalize_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut copied = 0;

    for tag in tags(text) {
        let excluded = tag.prefix.is_some_and(|p| {
            EXCLUDED_PREFIXES
                .iter()
                .any(|ex| p.eq_ignore_ascii_case(ex))
        });
        let replacement = match (tag.local, tag.closing) {
            _ if excluded => continue,
            ("loc", false) => "\n<loc>",
            ("loc", true) => "</loc>\n",
            ("sitemap", false) => "<sitemap>\n",
            ("sitemap", true) => "</sitemap>\n",
            _ => continue,
        };
        out.push_str(&text[copied..tag.start]);
        out.push_str(replacement);
        copied = tag.end;
    }

    out.push_str(&text[copied..]);
    out
}

fn clean_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let value = trimmed
        .strip_prefix(CDATA_OPEN)
        .and_then(|v| v.strip_suffix(CDATA_CLOSE))
        .unwrap_or(trimmed)
        .trim();

    (!value.is_empty()).then(|| value.to_owned())
}

//! OPML 2.0 interchange for the feed list.
//!
//! Import walks `<outline>` elements one grouping level deep: a top-level
//! outline with a feed URL and no children becomes a standalone feed,
//! anything else becomes a group whose first-level children with feed URLs
//! become child feeds. Deeper nesting is dropped. Legacy Google News
//! aggregator URLs are poison and silently skipped. Export reverses the
//! mapping, tagging full-text feeds with a custom attribute.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::Feed;
use crate::util::strip_control_chars;

/// Legacy aggregator prefix dropped on import.
const OLD_GNEWS_TO_IGNORE: &str = "http://news.google.com/news?";

/// Custom outline attribute marking full-text retrieval. Only the literal
/// value "true" counts.
const RETRIEVE_FULLTEXT_ATTR: &str = "retrieveFullText";

/// OPML versions accepted without the compatibility fallback.
const SUPPORTED_VERSIONS: [&str; 3] = ["1.0", "1.1", "2.0"];

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// The document declares an OPML version outside the supported set.
    #[error("Unsupported OPML version: {0}")]
    UnsupportedVersion(String),
}

// ============================================================================
// Import
// ============================================================================

/// One parsed `<outline>` element, before the feed mapping.
#[derive(Debug, Default)]
struct Outline {
    title: Option<String>,
    xml_url: Option<String>,
    retrieve_full_text: bool,
}

impl Outline {
    fn title_or_url(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.xml_url.clone())
            .unwrap_or_default()
    }

    fn is_poison(&self) -> bool {
        self.xml_url
            .as_deref()
            .is_some_and(|url| url.starts_with(OLD_GNEWS_TO_IGNORE))
    }
}

/// Parse OPML text into a feed batch.
///
/// Ids are a counter starting at 1, unique only within the returned batch;
/// the store remaps them on insert. An empty result is not an error.
pub fn parse_document(content: &str) -> Result<Vec<Feed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    // (top-level outline, its first-level children)
    let mut tops: Vec<(Outline, Vec<Outline>)> = Vec::new();
    let mut current: Option<(Outline, Vec<Outline>)> = None;
    let mut depth: usize = 0;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"opml" => {
                check_version(&e, &reader)?;
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                match depth {
                    0 => current = Some((parse_outline_attributes(&e, &reader)?, Vec::new())),
                    1 => {
                        if let Some((_, children)) = current.as_mut() {
                            children.push(parse_outline_attributes(&e, &reader)?);
                        }
                    }
                    // Only one level of grouping is supported; anything
                    // deeper is dropped.
                    _ => {}
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => match depth {
                0 => tops.push((parse_outline_attributes(&e, &reader)?, Vec::new())),
                1 => {
                    if let Some((_, children)) = current.as_mut() {
                        children.push(parse_outline_attributes(&e, &reader)?);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(top) = current.take() {
                        tops.push(top);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds_from_outlines(tops))
}

/// Parse with the compatibility fallback: on failure, strip a malformed
/// `<opml version='x.y'>` declaration down to `<opml>` and retry once.
pub fn parse_with_fallback(content: &str) -> Result<Vec<Feed>, OpmlError> {
    match parse_document(content) {
        Ok(feeds) => Ok(feeds),
        Err(first) => match strip_version_declaration(content) {
            Some(stripped) => {
                tracing::debug!("Retrying OPML parse without version declaration");
                parse_document(&stripped).map_err(|_| first)
            }
            None => Err(first),
        },
    }
}

/// Reject version declarations outside the supported set. Documents without
/// a version attribute are accepted as-is.
fn check_version(
    e: &quick_xml::events::BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), OpmlError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => return Err(OpmlError::Parse(e.to_string())),
        };
        if attr.key.as_ref() == b"version" {
            let version = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| OpmlError::Parse(e.to_string()))?;
            if !SUPPORTED_VERSIONS.contains(&version.as_ref()) {
                return Err(OpmlError::UnsupportedVersion(version.to_string()));
            }
        }
    }
    Ok(())
}

/// Extracts the attributes we care about from an outline element.
fn parse_outline_attributes(
    e: &quick_xml::events::BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Outline, OpmlError> {
    let mut outline = Outline::default();
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        let decode = |a: &quick_xml::events::attributes::Attribute<'_>| {
            a.decode_and_unescape_value(decoder)
                .map(|v| v.to_string())
                .map_err(|e| OpmlError::Parse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(decode(&attr)?),
            b"title" => outline.title = Some(strip_control_chars(&decode(&attr)?).into_owned()),
            b"text" => text = Some(strip_control_chars(&decode(&attr)?).into_owned()),
            attr_name if attr_name == RETRIEVE_FULLTEXT_ATTR.as_bytes() => {
                outline.retrieve_full_text = decode(&attr)? == "true";
            }
            _ => {}
        }
    }

    if outline.title.is_none() {
        outline.title = text;
    }
    Ok(outline)
}

/// Map the outline tree to a feed batch with batch-local ids.
fn feeds_from_outlines(tops: Vec<(Outline, Vec<Outline>)>) -> Vec<Feed> {
    let mut gen_id = 1i64;
    let mut next_id = || {
        let id = gen_id;
        gen_id += 1;
        id
    };
    let mut feeds = Vec::new();

    for (top, children) in tops {
        if children.is_empty() && top.xml_url.is_some() {
            if top.is_poison() {
                continue;
            }
            feeds.push(Feed {
                id: next_id(),
                title: top.title_or_url(),
                link: top.xml_url.unwrap_or_default(),
                retrieve_full_text: top.retrieve_full_text,
                ..Feed::default()
            });
        } else {
            let group_id = next_id();
            feeds.push(Feed {
                id: group_id,
                title: top.title_or_url(),
                is_group: true,
                ..Feed::default()
            });
            for child in children {
                if child.xml_url.is_none() || child.is_poison() {
                    continue;
                }
                feeds.push(Feed {
                    id: next_id(),
                    title: child.title_or_url(),
                    link: child.xml_url.clone().unwrap_or_default(),
                    group_id: Some(group_id),
                    retrieve_full_text: child.retrieve_full_text,
                    ..Feed::default()
                });
            }
        }
    }
    feeds
}

/// Strip a `<opml version='x.y'>` declaration (single digit, dot, single
/// digit, either quote style) down to `<opml>`. Returns `None` when the
/// document contains no such declaration.
fn strip_version_declaration(content: &str) -> Option<String> {
    const PREFIX: &str = "<opml version=";
    let mut search_from = 0;

    while let Some(rel) = content[search_from..].find(PREFIX) {
        let start = search_from + rel;
        let rest = content[start + PREFIX.len()..].as_bytes();
        let matched = rest.len() >= 6
            && (rest[0] == b'\'' || rest[0] == b'"')
            && rest[1].is_ascii_digit()
            && rest[2] == b'.'
            && rest[3].is_ascii_digit()
            && rest[4] == rest[0]
            && rest[5] == b'>';
        if matched {
            let end = start + PREFIX.len() + 6;
            let mut stripped = String::with_capacity(content.len());
            stripped.push_str(&content[..start]);
            stripped.push_str("<opml>");
            stripped.push_str(&content[end..]);
            return Some(stripped);
        }
        search_from = start + PREFIX.len();
    }
    None
}

// ============================================================================
// Export
// ============================================================================

/// Render the persisted feed list as an OPML 2.0 document.
///
/// Partitions by group reference the same way the drawer does: one outline
/// per top-level feed, child outlines under groups. The feed URL attribute
/// is only written for non-blank links (groups have none), and the
/// full-text attribute only where the flag is set.
pub fn render_document(feeds: &[Feed], created: DateTime<Utc>) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut children: HashMap<i64, Vec<&Feed>> = HashMap::new();
    let mut top_level: Vec<&Feed> = Vec::new();
    for feed in feeds {
        match feed.group_id {
            Some(group_id) => children.entry(group_id).or_default().push(feed),
            None => top_level.push(feed),
        }
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("Feed subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::Start(BytesStart::new("dateCreated")))
        .context("Failed to write dateCreated element")?;
    writer
        .write_event(Event::Text(BytesText::new(&created.to_rfc2822())))
        .context("Failed to write dateCreated text")?;
    writer
        .write_event(Event::End(BytesEnd::new("dateCreated")))
        .context("Failed to write dateCreated end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for feed in top_level {
        let subs = children.remove(&feed.id).unwrap_or_default();
        if subs.is_empty() {
            writer
                .write_event(Event::Empty(outline_for(feed)))
                .context("Failed to write outline element")?;
        } else {
            writer
                .write_event(Event::Start(outline_for(feed)))
                .context("Failed to write group outline")?;
            for sub in subs {
                writer
                    .write_event(Event::Empty(outline_for(sub)))
                    .context("Failed to write child outline")?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("outline")))
                .context("Failed to write group outline end")?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

fn outline_for(feed: &Feed) -> quick_xml::events::BytesStart<'_> {
    use quick_xml::events::BytesStart;

    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("text", feed.title.as_str()));
    outline.push_attribute(("title", feed.title.as_str()));
    if !feed.link.trim().is_empty() {
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("xmlUrl", feed.link.as_str()));
    }
    if feed.retrieve_full_text {
        outline.push_attribute((RETRIEVE_FULLTEXT_ATTR, "true"));
    }
    outline
}

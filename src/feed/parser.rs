use chrono::DateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A single feed entry normalized out of either dialect.
///
/// `dedup_key` is never empty: it is the entry link when one exists, or a
/// SHA-256 hash of the textual content when it does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub dedup_key: String,
    pub title: String,
    pub summary: Option<String>,
    pub link: Option<String>,
    /// Publication time as unix seconds. `None` when the feed carried no
    /// parseable date.
    pub published: Option<i64>,
    /// Last-updated time as unix seconds (Atom only).
    pub updated: Option<i64>,
}

/// Errors that make an entire payload unusable.
///
/// Per-entry problems (missing fields, unparseable dates) never surface
/// here; those entries are skipped or normalized to empty values.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML stream is malformed beyond recovery.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// Well-formed XML, but the root element belongs to neither dialect.
    #[error("root element <{0}> is neither <rss> nor <feed>")]
    UnknownDialect(String),
    /// Payload contains no XML element at all.
    #[error("payload contains no XML root element")]
    NoRoot,
}

/// The two dialects this parser understands. Selection happens exactly once,
/// by root-element inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    Atom,
}

impl Dialect {
    fn entry_tag(self) -> &'static [u8] {
        match self {
            Dialect::Rss => b"item",
            Dialect::Atom => b"entry",
        }
    }
}

/// Parses an RSS 2.0 or Atom 1.0 payload into normalized items.
///
/// The dialect is detected from the root element name (`<rss>` vs `<feed>`,
/// namespace prefixes ignored). `content_type` is a diagnostic hint only: a
/// disagreement with the detected dialect is logged, never an error.
///
/// Entries missing both a title and a link are skipped with a warning.
/// Missing optional fields become `None`; timestamps that fail to parse
/// become `None`. A feed that yields zero parseable items is not an error.
///
/// # Errors
///
/// Returns [`ParseError`] when the payload is not well-formed XML or its
/// root element belongs to neither dialect.
pub fn parse_feed(bytes: &[u8], content_type: Option<&str>) -> Result<Vec<ParsedItem>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let dialect = loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"rss" => break Dialect::Rss,
                b"feed" => break Dialect::Atom,
                other => {
                    return Err(ParseError::UnknownDialect(
                        String::from_utf8_lossy(other).into_owned(),
                    ))
                }
            },
            Ok(Event::Eof) => return Err(ParseError::NoRoot),
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    };

    if let Some(hint) = content_type {
        let hint_lower = hint.to_ascii_lowercase();
        let disagrees = match dialect {
            Dialect::Rss => hint_lower.contains("atom+xml"),
            Dialect::Atom => hint_lower.contains("rss+xml"),
        };
        if disagrees {
            tracing::debug!(
                content_type = hint,
                dialect = ?dialect,
                "Content-Type disagrees with detected feed dialect"
            );
        }
    }

    let mut items = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == dialect.entry_tag() => {
                if let Some(item) = read_entry(&mut reader, dialect)? {
                    items.push(item);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }

    Ok(items)
}

/// Reads one `<item>`/`<entry>` subtree into a normalized item.
///
/// Returns `Ok(None)` for entries carrying neither a title nor a link.
fn read_entry(
    reader: &mut Reader<&[u8]>,
    dialect: Dialect,
) -> Result<Option<ParsedItem>, ParseError> {
    let decoder = reader.decoder();

    let mut title: Option<String> = None;
    let mut link: Option<String> = None;
    // Atom <link> without rel, or rel="alternate"; other rels kept as fallback
    let mut other_link: Option<String> = None;
    let mut summary: Option<String> = None;
    let mut content: Option<String> = None;
    let mut published_raw: Option<String> = None;
    let mut updated_raw: Option<String> = None;

    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match (dialect, name.as_slice()) {
                    (_, b"title") => title = non_empty(read_element_text(reader, b"title")?),
                    (Dialect::Rss, b"link") => {
                        link = non_empty(read_element_text(reader, b"link")?)
                    }
                    (Dialect::Rss, b"description") => {
                        summary = non_empty(read_element_text(reader, b"description")?)
                    }
                    // content:encoded, used as a summary fallback
                    (Dialect::Rss, b"encoded") => {
                        content = non_empty(read_element_text(reader, b"encoded")?)
                    }
                    (Dialect::Rss, b"pubDate") => {
                        published_raw = non_empty(read_element_text(reader, b"pubDate")?)
                    }
                    (Dialect::Atom, b"link") => {
                        note_atom_link(&e, decoder, &mut link, &mut other_link);
                        skip_buf.clear();
                        reader
                            .read_to_end_into(e.name(), &mut skip_buf)
                            .map_err(|err| ParseError::Xml(err.to_string()))?;
                    }
                    (Dialect::Atom, b"summary") => {
                        summary = non_empty(read_element_text(reader, b"summary")?)
                    }
                    (Dialect::Atom, b"content") => {
                        content = non_empty(read_element_text(reader, b"content")?)
                    }
                    (Dialect::Atom, b"published") => {
                        published_raw = non_empty(read_element_text(reader, b"published")?)
                    }
                    (Dialect::Atom, b"updated") => {
                        updated_raw = non_empty(read_element_text(reader, b"updated")?)
                    }
                    // Unknown children (guid, author, media:*, ...) may nest
                    // elements with colliding local names; skip the subtree.
                    _ => {
                        skip_buf.clear();
                        reader
                            .read_to_end_into(e.name(), &mut skip_buf)
                            .map_err(|err| ParseError::Xml(err.to_string()))?;
                    }
                }
            }
            Event::Empty(e) => {
                if dialect == Dialect::Atom && e.local_name().as_ref() == b"link" {
                    note_atom_link(&e, decoder, &mut link, &mut other_link);
                }
            }
            Event::End(e) if e.local_name().as_ref() == dialect.entry_tag() => break,
            Event::Eof => {
                return Err(ParseError::Xml("unexpected EOF inside feed entry".into()))
            }
            _ => {}
        }
    }

    let link = link.or(other_link);
    if title.is_none() && link.is_none() {
        tracing::warn!("Skipping feed entry with neither title nor link");
        return Ok(None);
    }

    let summary = summary.or(content);
    let updated = updated_raw.as_deref().and_then(parse_date);
    let published = match dialect {
        Dialect::Rss => published_raw.as_deref().and_then(parse_date),
        // Atom entries frequently carry only <updated>
        Dialect::Atom => published_raw.as_deref().and_then(parse_date).or(updated),
    };

    let title = title
        .or_else(|| link.clone())
        .unwrap_or_else(|| "Untitled".to_string());
    let dedup_key = dedup_key(link.as_deref(), &title, summary.as_deref());

    Ok(Some(ParsedItem {
        dedup_key,
        title,
        summary,
        link,
        published,
        updated,
    }))
}

/// Collects the text content of the current element, tolerating nested
/// markup (escaped HTML arrives as text; CDATA is taken verbatim).
fn read_element_text(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<String, ParseError> {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(e)) => {
                if depth == 0 {
                    debug_assert_eq!(e.local_name().as_ref(), name);
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Text(t)) => match t.unescape() {
                Ok(s) => out.push_str(&s),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable text fragment");
                }
            },
            Ok(Event::CData(c)) => out.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Ok(Event::Eof) => {
                return Err(ParseError::Xml("unexpected EOF inside element".into()))
            }
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(out)
}

/// Records an Atom `<link>`: `rel="alternate"` (or no rel) is the canonical
/// entry link; any other rel is kept only as a fallback.
fn note_atom_link(
    e: &BytesStart<'_>,
    decoder: quick_xml::encoding::Decoder,
    link: &mut Option<String>,
    other_link: &mut Option<String>,
) {
    let mut href: Option<String> = None;
    let mut rel: Option<String> = None;
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed link attribute");
                continue;
            }
        };
        let value = match attr.decode_and_unescape_value(decoder) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable link attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"href" => href = Some(value.to_string()),
            b"rel" => rel = Some(value.to_string()),
            _ => {}
        }
    }

    let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
        return;
    };
    match rel.as_deref() {
        None | Some("alternate") => {
            if link.is_none() {
                *link = Some(href);
            }
        }
        _ => {
            if other_link.is_none() {
                *other_link = Some(href);
            }
        }
    }
}

/// RSS dates are RFC 2822, Atom dates ISO 8601; real feeds mix the two up,
/// so both formats are accepted everywhere. Unparseable dates become `None`.
fn parse_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.timestamp())
        .ok()
}

/// Link when present, otherwise a hash of the textual content. Never empty.
fn dedup_key(link: Option<&str>, title: &str, summary: Option<&str>) -> String {
    if let Some(link) = link {
        let trimmed = link.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let input = format!("{}|{}", title, summary.unwrap_or(""));
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn rss_items_map_all_fields() {
        let payload = br#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <link>https://example.com</link>
    <item>
        <title>First post</title>
        <link>https://example.com/a</link>
        <description>Hello world</description>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Second post</title>
        <link>https://example.com/b</link>
        <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
    </item>
</channel></rss>"#;

        let items = parse_feed(payload, Some("application/rss+xml")).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "First post");
        assert_eq!(items[0].dedup_key, "https://example.com/a");
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/a"));
        assert_eq!(items[0].summary.as_deref(), Some("Hello world"));
        assert_eq!(items[0].published, Some(1_704_067_200));
        assert_eq!(items[0].updated, None);

        assert_eq!(items[1].summary, None);
        assert_eq!(items[1].published, Some(1_704_153_600));
    }

    #[test]
    fn channel_metadata_does_not_leak_into_items() {
        // <title> and <link> also exist at channel level; only children of
        // <item> may populate item fields.
        let payload = br#"<rss version="2.0"><channel>
    <title>Channel title</title>
    <link>https://example.com</link>
    <item><title>Real item</title><link>https://example.com/x</link></item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Real item");
    }

    #[test]
    fn atom_entries_prefer_alternate_link() {
        let payload = br#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Example Atom</title>
    <entry>
        <title>Entry one</title>
        <link rel="self" href="https://example.com/entry/1.atom"/>
        <link rel="alternate" href="https://example.com/entry/1"/>
        <summary>Summary text</summary>
        <published>2024-01-03T00:00:00Z</published>
        <updated>2024-01-04T12:00:00Z</updated>
    </entry>
</feed>"#;

        let items = parse_feed(payload, Some("application/atom+xml")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].dedup_key, "https://example.com/entry/1");
        assert_eq!(items[0].published, Some(1_704_240_000));
        assert_eq!(items[0].updated, Some(1_704_369_600));
        assert_eq!(items[0].summary.as_deref(), Some("Summary text"));
    }

    #[test]
    fn atom_link_without_rel_is_alternate() {
        let payload = br#"<feed>
    <entry>
        <title>Bare link</title>
        <link href="https://example.com/bare"/>
    </entry>
</feed>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/bare"));
    }

    #[test]
    fn atom_published_falls_back_to_updated() {
        let payload = br#"<feed>
    <entry>
        <title>Only updated</title>
        <link href="https://example.com/u"/>
        <updated>2024-01-03T00:00:00Z</updated>
    </entry>
</feed>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].published, Some(1_704_240_000));
        assert_eq!(items[0].updated, Some(1_704_240_000));
    }

    #[test]
    fn atom_summary_falls_back_to_content() {
        let payload = br#"<feed>
    <entry>
        <title>Content only</title>
        <link href="https://example.com/c"/>
        <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
    </entry>
</feed>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].summary.as_deref(), Some("<p>Body</p>"));
    }

    #[test]
    fn cdata_description_is_taken_verbatim() {
        let payload = br#"<rss version="2.0"><channel>
    <item>
        <title>CDATA</title>
        <link>https://example.com/cdata</link>
        <description><![CDATA[Keep <b>tags</b> & ampersands]]></description>
    </item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(
            items[0].summary.as_deref(),
            Some("Keep <b>tags</b> & ampersands")
        );
    }

    #[test]
    fn unparseable_dates_become_none() {
        let payload = br#"<rss version="2.0"><channel>
    <item>
        <title>Bad date</title>
        <link>https://example.com/bad</link>
        <pubDate>sometime last tuesday</pubDate>
    </item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].published, None);
    }

    #[test]
    fn rfc3339_date_in_rss_is_accepted() {
        // Some generators emit ISO dates in pubDate; be lenient.
        let payload = br#"<rss version="2.0"><channel>
    <item>
        <title>ISO date</title>
        <link>https://example.com/iso</link>
        <pubDate>2024-01-01T00:00:00Z</pubDate>
    </item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].published, Some(1_704_067_200));
    }

    #[test]
    fn entry_without_title_or_link_is_skipped() {
        let payload = br#"<rss version="2.0"><channel>
    <item><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
    <item><title>Kept</title><link>https://example.com/kept</link></item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Kept");
    }

    #[test]
    fn missing_link_uses_content_hash_key() {
        let payload = br#"<rss version="2.0"><channel>
    <item><title>No link here</title><description>Body</description></item>
    <item><title>Different title</title><description>Body</description></item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items.len(), 2);
        for item in &items {
            assert_eq!(item.dedup_key.len(), 64); // SHA-256 hex
        }
        assert_ne!(items[0].dedup_key, items[1].dedup_key);
    }

    #[test]
    fn nested_foreign_elements_are_skipped() {
        // A media:group carries its own <title>; it must not override the
        // item's title.
        let payload = br#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel>
    <item>
        <title>Outer title</title>
        <link>https://example.com/media</link>
        <media:group><media:title>Inner title</media:title></media:group>
    </item>
</channel></rss>"#;

        let items = parse_feed(payload, None).unwrap();
        assert_eq!(items[0].title, "Outer title");
    }

    #[test]
    fn empty_feed_yields_zero_items() {
        let rss = parse_feed(br#"<rss version="2.0"><channel></channel></rss>"#, None).unwrap();
        assert!(rss.is_empty());

        let atom = parse_feed(br#"<feed><title>Empty</title></feed>"#, None).unwrap();
        assert!(atom.is_empty());
    }

    #[test]
    fn unknown_root_is_rejected() {
        let err = parse_feed(b"<html><body>nope</body></html>", None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownDialect(ref name) if name == "html"));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_feed(b"<not valid xml", None).is_err());
        assert!(matches!(parse_feed(b"", None), Err(ParseError::NoRoot)));
        assert!(matches!(
            parse_feed(b"plain text, no markup", None),
            Err(ParseError::NoRoot)
        ));
    }

    proptest! {
        // Every parseable entry gets a non-empty dedup key, link or not.
        #[test]
        fn dedup_keys_are_never_empty(
            title in "[a-zA-Z0-9 .,-]{1,40}",
            summary in proptest::option::of("[a-zA-Z0-9 ]{0,40}"),
            with_link in any::<bool>(),
        ) {
            let link = if with_link {
                "<link>https://example.com/x</link>".to_string()
            } else {
                String::new()
            };
            let summary_xml = summary
                .as_deref()
                .map(|s| format!("<description>{}</description>", s))
                .unwrap_or_default();
            let payload = format!(
                r#"<rss version="2.0"><channel><item><title>{}</title>{}{}</item></channel></rss>"#,
                title, link, summary_xml
            );

            let items = parse_feed(payload.as_bytes(), None).unwrap();
            for item in items {
                prop_assert!(!item.dedup_key.trim().is_empty());
            }
        }
    }
}

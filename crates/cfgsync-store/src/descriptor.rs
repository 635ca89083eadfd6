//! Codecs for the two metadata files of a record.
//!
//! `{name}.xml` holds the region declarations and the ordered artifact
//! sequence:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <configuration name="group1">
//!   <region name="regionForGroup1" refid="REPLICATE"/>
//!   <artifact name="group1.jar" version="1" sha256="..." size="1024"/>
//! </configuration>
//! ```
//!
//! `{name}.properties` uses the Java properties format: `key=value`,
//! `key: value` or `key value` lines, `#`/`!` comments, `\uXXXX` escapes
//! and `\` line continuations.

use std::collections::BTreeMap;
use std::str::Chars;

use cfgsync_core::{ArtifactRecord, RegionDescriptor};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Parsed contents of a `{name}.xml` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Name declared inside the file.
    pub name: String,
    pub regions: Vec<RegionDescriptor>,
    pub artifacts: Vec<ArtifactRecord>,
}

// ── XML descriptor ─────────────────────────────────────────────────

const ROOT: &str = "configuration";

pub fn encode_descriptor(
    name: &str,
    regions: &[RegionDescriptor],
    artifacts: &[ArtifactRecord],
) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!("<{ROOT} name=\"{}\">\n", escape(name)));
    for region in regions {
        out.push_str(&format!(
            "  <region name=\"{}\" refid=\"{}\"/>\n",
            escape(region.name.as_str()),
            escape(region.refid.as_str())
        ));
    }
    for artifact in artifacts {
        out.push_str(&format!(
            "  <artifact name=\"{}\" version=\"{}\" sha256=\"{}\" size=\"{}\"/>\n",
            escape(artifact.base_name.as_str()),
            artifact.version,
            escape(artifact.sha256.as_str()),
            artifact.size_bytes
        ));
    }
    out.push_str(&format!("</{ROOT}>\n"));
    out
}

pub fn decode_descriptor(xml: &str) -> Result<Descriptor, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = DescriptorParser::default();
    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed xml at byte {}: {e}", reader.buffer_position()))?;
        match event {
            Event::Start(element) => {
                let name = parser.open(&element)?;
                parser.open_elements.push(name);
            }
            Event::Empty(element) => {
                parser.open(&element)?;
            }
            Event::End(_) => {
                parser.open_elements.pop();
            }
            Event::Text(text) => {
                return Err(format!("unexpected text {:?}", String::from_utf8_lossy(&text)));
            }
            Event::CData(_) => return Err("unexpected CDATA section".to_string()),
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype.
            _ => {}
        }
    }

    if !parser.saw_root || !parser.open_elements.is_empty() {
        return Err(format!("missing or unclosed <{ROOT}> element"));
    }
    Ok(parser.descriptor)
}

#[derive(Default)]
struct DescriptorParser {
    descriptor: Descriptor,
    saw_root: bool,
    open_elements: Vec<String>,
}

impl DescriptorParser {
    /// Handle a start or empty element; returns its name.
    fn open(&mut self, element: &BytesStart<'_>) -> Result<String, String> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let attrs = attributes(element)?;
        let parent = self.open_elements.last().map(String::as_str);

        match (name.as_str(), parent) {
            (ROOT, None) if !self.saw_root => {
                self.saw_root = true;
                self.descriptor.name = required(&attrs, "name", &name)?;
            }
            ("region", Some(ROOT)) => {
                self.descriptor.regions.push(RegionDescriptor {
                    name: required(&attrs, "name", &name)?,
                    refid: attrs.get("refid").cloned().unwrap_or_default(),
                });
            }
            ("artifact", Some(ROOT)) => {
                let version = required(&attrs, "version", &name)?
                    .parse::<u32>()
                    .map_err(|e| format!("bad artifact version: {e}"))?;
                let size_bytes = required(&attrs, "size", &name)?
                    .parse::<u64>()
                    .map_err(|e| format!("bad artifact size: {e}"))?;
                self.descriptor.artifacts.push(ArtifactRecord {
                    record_name: self.descriptor.name.clone(),
                    base_name: required(&attrs, "name", &name)?,
                    version,
                    sha256: required(&attrs, "sha256", &name)?,
                    size_bytes,
                });
            }
            (ROOT, None) => return Err(format!("content after </{ROOT}>")),
            (other, _) => return Err(format!("unexpected element <{other}>")),
        }
        Ok(name)
    }
}

fn attributes(element: &BytesStart<'_>) -> Result<BTreeMap<String, String>, String> {
    let mut attrs = BTreeMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| format!("malformed attribute: {e}"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| format!("bad value for attribute {key}: {e}"))?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn required(attrs: &BTreeMap<String, String>, key: &str, element: &str) -> Result<String, String> {
    attrs
        .get(key)
        .cloned()
        .ok_or_else(|| format!("<{element}> is missing attribute {key}"))
}

// ── Properties ─────────────────────────────────────────────────────

pub fn encode_properties(properties: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in properties {
        out.push_str(&escape_property(key, true));
        out.push('=');
        out.push_str(&escape_property(value, false));
        out.push('\n');
    }
    out
}

pub fn decode_properties(text: &str) -> Result<BTreeMap<String, String>, String> {
    let mut properties = BTreeMap::new();
    for (lineno, line) in logical_lines(text) {
        let mut key = String::new();
        let mut chars = line.chars();
        let mut whitespace_separated = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => push_escaped(&mut key, &mut chars, lineno)?,
                '=' | ':' => break,
                c if c.is_whitespace() => {
                    whitespace_separated = true;
                    break;
                }
                c => key.push(c),
            }
        }
        if key.is_empty() {
            return Err(format!("line {}: empty key", lineno + 1));
        }

        let mut value_part = chars.as_str().trim_start();
        if whitespace_separated {
            // `key = value` and `key value` are both accepted.
            if let Some(stripped) = value_part.strip_prefix(['=', ':']) {
                value_part = stripped.trim_start();
            }
        }
        let mut value = String::new();
        let mut chars = value_part.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => push_escaped(&mut value, &mut chars, lineno)?,
                c => value.push(c),
            }
        }
        properties.insert(key, value);
    }
    Ok(properties)
}

/// Join continuation lines and drop blanks and comments.
///
/// Yields each logical line with the zero-based number of its first
/// physical line. Leading whitespace of a continuation line is dropped.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim_start();
        let (start, mut logical) = match pending.take() {
            Some(continued) => continued,
            None if line.is_empty() || line.starts_with(['#', '!']) => continue,
            None => (lineno, String::new()),
        };
        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            pending = Some((start, logical));
        } else {
            logical.push_str(line);
            lines.push((start, logical));
        }
    }
    // A trailing `\` on the last line continues into nothing.
    lines.extend(pending);
    lines
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn escape_property(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | ' ' if is_key => {
                out.push('\\');
                out.push(c);
            }
            '#' | '!' | ' ' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            c if c < ' ' || c > '~' => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Decode the escape following a `\` and append it to `out`.
fn push_escaped(out: &mut String, chars: &mut Chars<'_>, lineno: usize) -> Result<(), String> {
    match chars.next() {
        Some('n') => out.push('\n'),
        Some('r') => out.push('\r'),
        Some('t') => out.push('\t'),
        Some('f') => out.push('\u{c}'),
        Some('u') => {
            let unit = read_utf16_unit(chars, lineno)?;
            let decoded = if (0xD800..0xDC00).contains(&unit) {
                if chars.next() != Some('\\') || chars.next() != Some('u') {
                    return Err(format!("line {}: unpaired surrogate \\u{unit:04X}", lineno + 1));
                }
                let low = read_utf16_unit(chars, lineno)?;
                char::decode_utf16([unit, low]).next()
            } else {
                char::decode_utf16([unit]).next()
            };
            match decoded {
                Some(Ok(c)) => out.push(c),
                _ => return Err(format!("line {}: invalid \\u escape", lineno + 1)),
            }
        }
        Some(c) => out.push(c),
        None => return Err(format!("line {}: dangling escape", lineno + 1)),
    }
    Ok(())
}

fn read_utf16_unit(chars: &mut Chars<'_>, lineno: usize) -> Result<u16, String> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("line {}: malformed \\u escape {hex:?}", lineno + 1));
    }
    u16::from_str_radix(&hex, 16).map_err(|e| format!("line {}: {e}", lineno + 1))
}

//! Template part cleanup before Jinja compilation.
//!
//! Word splits typed text into runs wherever formatting, spell checking or
//! revision marks change, so a `{{ NAME }}` typed by an author often arrives
//! as several `<w:r>` elements. These passes glue delimiters back together,
//! strip markup inside tags and collapse the structural tag forms
//! (`{%tr ... %}`, `{{p ... }}`) onto the element they control.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::engine::EngineError;

lazy_static! {
    /// Markup between `{` and the second delimiter character.
    static ref SPLIT_OPEN: Regex = Regex::new(r"\{((?:<[^>]*>)+)([{%#])").unwrap();
    /// Markup between the first closing delimiter character and `}`.
    static ref SPLIT_CLOSE: Regex = Regex::new(r"([%}#])((?:<[^>]*>)+)\}").unwrap();
    /// Text run boundaries inside a tag.
    static ref RUN_BREAK: Regex = Regex::new(r"(?s)</w:t>.*?(?:<w:t>|<w:t [^>]*>)").unwrap();
    /// Leftover markup inside a tag, e.g. proofing marks between runs.
    static ref STRAY_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    /// Bare `<w:t>` whose text carries an expression.
    static ref BARE_TEXT: Regex = Regex::new(r"<w:t>([^<]*\{\{)").unwrap();
}

/// Elements a structural tag may take over, outermost first.
const STRUCTURAL: [&str; 4] = ["tr", "tc", "p", "r"];

/// Run every cleanup pass over one part's XML.
pub fn prepare(xml: &str) -> Result<String, EngineError> {
    let joined = join_split_delimiters(xml);
    let cleaned = clean_tags(&joined);
    let mut collapsed = cleaned;
    for element in STRUCTURAL {
        collapsed = collapse_structural(&collapsed, element)?;
    }
    Ok(preserve_space(&collapsed))
}

fn join_split_delimiters(xml: &str) -> String {
    let opened = SPLIT_OPEN.replace_all(xml, |caps: &Captures| format!("{{{}", &caps[2]));
    SPLIT_CLOSE
        .replace_all(&opened, |caps: &Captures| format!("{}}}", &caps[1]))
        .into_owned()
}

/// Find the end of the tag opened at `start`, returning the index just past
/// its closing delimiter.
fn tag_end(xml: &str, start: usize) -> Option<usize> {
    let close = match &xml[start..start + 2] {
        "{{" => "}}",
        "{%" => "%}",
        "{#" => "#}",
        _ => return None,
    };
    xml[start + 2..]
        .find(close)
        .map(|offset| start + 2 + offset + close.len())
}

fn next_tag_start(xml: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut idx = from;
    while let Some(offset) = xml[idx..].find('{') {
        let pos = idx + offset;
        match bytes.get(pos + 1) {
            Some(b'{') | Some(b'%') | Some(b'#') => return Some(pos),
            _ => idx = pos + 1,
        }
    }
    None
}

/// Remove run markup inside every tag and undo the XML and typographic
/// escaping Word applied to the expression text.
fn clean_tags(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;

    while let Some(start) = next_tag_start(xml, cursor) {
        let Some(end) = tag_end(xml, start) else {
            break;
        };
        out.push_str(&xml[cursor..start]);
        let inner = RUN_BREAK.replace_all(&xml[start..end], "");
        let inner = STRAY_TAG.replace_all(&inner, "");
        out.push_str(&unescape_expression(&inner));
        cursor = end;
    }

    out.push_str(&xml[cursor..]);
    out
}

fn unescape_expression(tag: &str) -> String {
    tag.replace("&#8216;", "'")
        .replace("&#8217;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace("&amp;", "&")
}

/// Replace each element holding a `{%y ...%}` or `{{y ...}}` tag with the bare tag.
fn collapse_structural(xml: &str, element: &str) -> Result<String, EngineError> {
    let statement = format!("{{%{element} ");
    let expression = format!("{{{{{element} ");
    let open_spaced = format!("<w:{element} ");
    let open_bare = format!("<w:{element}>");
    let close = format!("</w:{element}>");

    let mut xml = xml.to_string();
    let mut cursor = 0;
    loop {
        let found = [&statement, &expression]
            .iter()
            .filter_map(|needle| xml[cursor..].find(needle.as_str()).map(|i| cursor + i))
            .min();
        let Some(start) = found else {
            break;
        };
        let end = tag_end(&xml, start).ok_or_else(|| {
            EngineError::TemplateSyntax(format!(
                "unterminated '{}' tag",
                &xml[start..start + element.len() + 2]
            ))
        })?;

        let prefix = &xml[..start];
        let element_start = prefix
            .rfind(&open_spaced)
            .into_iter()
            .chain(prefix.rfind(&open_bare))
            .max()
            .ok_or_else(|| {
                EngineError::TemplateSyntax(format!(
                    "'{}' tag is not inside a w:{element} element",
                    &xml[start..end]
                ))
            })?;
        let element_end = xml[end..]
            .find(&close)
            .map(|i| end + i + close.len())
            .ok_or_else(|| {
                EngineError::TemplateSyntax(format!("w:{element} element around tag is not closed"))
            })?;

        let delimiters = &xml[start..start + 2];
        let body = xml[start + 2 + element.len()..end - 2].trim();
        let closing = &xml[end - 2..end];
        let replacement = format!("{delimiters} {body} {closing}");

        xml.replace_range(element_start..element_end, &replacement);
        cursor = element_start + replacement.len();
    }
    Ok(xml)
}

fn preserve_space(xml: &str) -> String {
    BARE_TEXT
        .replace_all(xml, |caps: &Captures| {
            format!(r#"<w:t xml:space="preserve">{}"#, &caps[1])
        })
        .into_owned()
}

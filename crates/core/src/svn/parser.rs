//! Parsers for svn command output (status columns and XML).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ScmError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnInfo {
    pub url: String,
    pub root_url: String,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnLogEntry {
    pub revision: u64,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// One line of `svn status` or `svn diff --summarize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub code: char,
    pub path: String,
}

/// Parse column output: the status code is the first column, the path
/// starts after seven more columns and a separating space.
///
/// Lines whose code is not in `codes`, and lines that do not have the
/// column layout (headers, conflict summaries), are skipped.
pub fn parse_status(output: &str, codes: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let mut chars = line.chars();
        let Some(code) = chars.next() else { continue };
        if !codes.contains(code) {
            continue;
        }
        let rest = chars.as_str();
        // Six more status columns, then a space.
        if rest.len() < 8 || !rest.is_char_boundary(7) {
            continue;
        }
        let (columns, path) = rest.split_at(7);
        if !columns.ends_with(' ') {
            continue;
        }
        let path = path.trim_end();
        if path.is_empty() {
            continue;
        }
        entries.push(StatusEntry {
            code,
            path: path.to_string(),
        });
    }
    debug!(count = entries.len(), codes, "parsed svn status lines");
    entries
}

/// Revision number from `svn commit` output.
pub fn parse_committed_revision(output: &str) -> Option<u64> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Committed revision ") {
            return rest.trim_end_matches('.').trim().parse().ok();
        }
    }
    None
}

pub fn parse_svn_info(xml: &str) -> Result<SvnInfo, ScmError> {
    debug!("parsing svn info XML ({} bytes)", xml.len());
    let url = extract_tag_content(xml, "url")
        .ok_or_else(|| ScmError::Parse("missing <url> in svn info".into()))?;
    let root_url = extract_tag_content(xml, "root")
        .ok_or_else(|| ScmError::Parse("missing <root> in svn info".into()))?;
    let revision = extract_attribute(xml, "entry", "revision")
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| ScmError::Parse("missing revision in svn info".into()))?;
    Ok(SvnInfo {
        url,
        root_url,
        revision,
    })
}

pub fn parse_svn_log(xml: &str) -> Result<Vec<SvnLogEntry>, ScmError> {
    debug!("parsing svn log XML ({} bytes)", xml.len());
    if !xml.contains("<log") {
        return Err(ScmError::Parse("missing <log> in svn log output".into()));
    }
    let mut entries = Vec::new();
    for part in xml.split("<logentry").skip(1) {
        let entry_xml = match part.find("</logentry>") {
            Some(pos) => &part[..pos],
            None => part,
        };
        let revision = match extract_attr_from_str(entry_xml, "revision")
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(rev) => rev,
            None => {
                warn!("skipping svn log entry with missing or unparseable revision attribute");
                continue;
            }
        };
        entries.push(SvnLogEntry {
            revision,
            author: extract_tag_content(entry_xml, "author").unwrap_or_default(),
            date: extract_tag_content(entry_xml, "date").unwrap_or_default(),
            message: extract_tag_content(entry_xml, "msg").unwrap_or_default(),
        });
    }
    debug!(count = entries.len(), "parsed svn log entries");
    Ok(entries)
}

fn extract_tag_content(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel_pos) = xml[search_from..].find(&open) {
        let start_pos = search_from + rel_pos;
        let after_open = &xml[start_pos + open.len()..];
        // <url> must not match <urlencoded>.
        if let Some(ch) = after_open.chars().next() {
            if ch != '>' && !ch.is_ascii_whitespace() {
                search_from = start_pos + open.len();
                continue;
            }
        }
        let content_start = after_open.find('>')? + 1;
        let content = &after_open[content_start..];
        let end_pos = content.find(&close)?;
        return Some(xml_unescape(content[..end_pos].trim()));
    }
    None
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let start_pos = xml.find(&open)?;
    let after_tag = &xml[start_pos + open.len()..];
    let tag_end = after_tag.find('>')?;
    extract_attr_from_str(&after_tag[..tag_end], attr)
}

fn extract_attr_from_str(s: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", attr, quote);
        if let Some(pos) = s.find(&pattern) {
            let after = &s[pos + pattern.len()..];
            let end = after.find(quote)?;
            return Some(after[..end].to_string());
        }
    }
    None
}

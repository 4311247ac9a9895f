//! ChangeLog-aware patching.
//!
//! New ChangeLog entries always belong at the top of the file, regardless of
//! how many entries landed since the patch was made. A hunk that adds a
//! single block at the very start of the old file is treated as an entry
//! insertion: the block is rotated so that it starts at its entry header,
//! the header date is set to today, and the entry is placed above the
//! current first entry. Any other hunk is applied as ordinary text.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::errors::PatchError;

use super::text::{self, split_lines, TextOutcome};
use super::{Hunk, HunkLine};

pub const DATE_PLACEHOLDER: &str = "DATE_HERE";
pub const REVIEWER_PLACEHOLDER: &str = "REVIEWER_HERE";
pub const UNREVIEWED_MARKER: &str = "NOBODY (OOPS!)";

/// Values substituted into added ChangeLog lines.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    today: NaiveDate,
    reviewer: Option<&'a str>,
}

impl<'a> Placeholders<'a> {
    pub fn new(today: NaiveDate, reviewer: Option<&'a str>) -> Self {
        Self { today, reviewer }
    }

    fn today(&self) -> String {
        self.today.format("%Y-%m-%d").to_string()
    }

    /// Fill in the date placeholder and, when a reviewer is known, the
    /// reviewer placeholder and the unreviewed marker.
    pub fn substitute(&self, line: &str) -> String {
        let mut out = line.replace(DATE_PLACEHOLDER, &self.today());
        if let Some(reviewer) = self.reviewer {
            out = out
                .replace(REVIEWER_PLACEHOLDER, reviewer)
                .replace(UNREVIEWED_MARKER, reviewer);
        }
        out
    }

    /// Copy of `hunks` with placeholders filled in on every added line.
    pub fn substitute_hunks(&self, hunks: &[Hunk]) -> Vec<Hunk> {
        hunks
            .iter()
            .map(|hunk| {
                let mut hunk = hunk.clone();
                for line in &mut hunk.lines {
                    if let HunkLine::Add(text) = line {
                        *text = self.substitute(text);
                    }
                }
                hunk
            })
            .collect()
    }

    /// Rewrite the date at the start of an entry header to today.
    fn redate_header(&self, line: &str) -> String {
        let rest = if let Some(rest) = line.strip_prefix(DATE_PLACEHOLDER) {
            rest
        } else if leading_date(line).is_some() {
            &line[10..]
        } else {
            return line.to_string();
        };
        format!("{}{}", self.today(), rest)
    }
}

/// `YYYY-MM-DD` at the start of `line`.
fn leading_date(line: &str) -> Option<&str> {
    let candidate = line.get(..10)?;
    let well_formed = candidate.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 => b == b'-',
        _ => b.is_ascii_digit(),
    });
    well_formed.then_some(candidate)
}

/// True for a ChangeLog entry header: a date (or the date placeholder),
/// whitespace, then the author.
pub fn is_entry_header(line: &str) -> bool {
    let line = line.trim_end_matches(['\n', '\r']);
    let rest = if let Some(rest) = line.strip_prefix(DATE_PLACEHOLDER) {
        rest
    } else if leading_date(line).is_some() {
        &line[10..]
    } else {
        return false;
    };
    let author = rest.trim_start();
    author.len() < rest.len() && !author.is_empty()
}

/// The first entry of a ChangeLog, without trailing blank lines.
pub fn latest_entry(contents: &str) -> Option<String> {
    let lines = split_lines(contents);
    let start = lines.iter().position(|l| is_entry_header(l))?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_entry_header(l))
        .map_or(lines.len(), |p| start + 1 + p);
    let mut entry = &lines[start..end];
    while let Some((last, init)) = entry.split_last() {
        if !last.trim().is_empty() || init.is_empty() {
            break;
        }
        entry = init;
    }
    let mut out = entry.concat();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

/// If `hunk` inserts a new entry at the top of the file, return the entry
/// lines rotated to start at its header.
///
/// `diff` often aligns a new entry against the old top entry, so the added
/// block may begin mid-entry and end with the old header. Such a hunk
/// qualifies when its single added block, rotated at its last header,
/// would start exactly at line one of the old file and its overlap with
/// the leading context is consistent.
fn top_insertion(hunk: &Hunk) -> Option<Vec<String>> {
    if hunk.lines.iter().any(|l| matches!(l, HunkLine::Remove(_))) {
        return None;
    }
    let leading = hunk.leading_context();
    let added: Vec<&str> = hunk.lines[leading..]
        .iter()
        .take_while(|l| matches!(l, HunkLine::Add(_)))
        .map(HunkLine::text)
        .collect();
    let n = added.len();
    if n == 0 || !hunk.lines[leading + n..].iter().all(HunkLine::is_context) {
        return None;
    }
    let header = added.iter().rposition(|l| is_entry_header(l))?;
    let tail = (n - header) % n;
    if hunk.old_start as isize - 1 + leading as isize - tail as isize != 0 {
        return None;
    }
    let overlap = leading.min(tail);
    let context: Vec<&str> = hunk.lines[..leading].iter().map(HunkLine::text).collect();
    let rotated_tail = &added[header..];
    if rotated_tail[rotated_tail.len() - overlap..] != context[leading - overlap..] {
        return None;
    }
    Some(
        added[header..]
            .iter()
            .chain(&added[..header])
            .map(|l| l.to_string())
            .collect(),
    )
}

/// Apply `hunks` to a ChangeLog's `content`.
pub fn apply(
    path: &str,
    content: &str,
    hunks: &[Hunk],
    placeholders: &Placeholders<'_>,
    fuzz: usize,
    force: bool,
) -> Result<TextOutcome, PatchError> {
    let mut entries: Vec<Vec<String>> = Vec::new();
    let mut remaining: Vec<Hunk> = Vec::new();
    for hunk in hunks {
        match top_insertion(hunk) {
            Some(entry) => entries.push(finish_entry(entry, placeholders)),
            None => remaining.extend(placeholders.substitute_hunks(std::slice::from_ref(hunk))),
        }
    }

    let mut outcome = text::apply_hunks(path, content, &remaining, fuzz, force)?;
    if entries.is_empty() {
        return Ok(outcome);
    }

    let mut lines = split_lines(&outcome.content);
    let mut at = lines.iter().position(|l| is_entry_header(l)).unwrap_or(0);
    for entry in entries {
        if lines[at..].starts_with(&entry) {
            if force {
                return Err(PatchError::conflict(path, "ChangeLog entry is already present"));
            }
            warn!(path, "ChangeLog entry already present, skipping");
            outcome.already_applied += 1;
            at += entry.len();
            continue;
        }
        debug!(path, line = at + 1, lines = entry.len(), "inserting ChangeLog entry");
        let len = entry.len();
        lines.splice(at..at, entry);
        at += len;
        outcome.applied += 1;
    }
    outcome.content = lines.concat();
    Ok(outcome)
}

fn finish_entry(entry: Vec<String>, placeholders: &Placeholders<'_>) -> Vec<String> {
    entry
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let line = if i == 0 {
                placeholders.redate_header(&line)
            } else {
                line
            };
            let mut line = placeholders.substitute(&line);
            if !line.ends_with('\n') {
                line.push('\n');
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::parse_patch;

    const FIRST_ENTRY: &str = "\
2009-10-26  Eric Seidel  <eric@webkit.org>

        Reviewed by Foo Bar.

        Most awesome change ever.

        * scm_unittest.py:
";

    const INTERMEDIATE_ENTRY: &str = "\
2009-10-27  Eric Seidel  <eric@webkit.org>

        Reviewed by Baz Bar.

        A more awesomer change yet!

        * scm_unittest.py:
";

    const ONE_LINE_OVERLAP: &str = "\
Index: ChangeLog
===================================================================
--- ChangeLog\t(revision 5)
+++ ChangeLog\t(working copy)
@@ -1,5 +1,13 @@
 2009-10-26  Eric Seidel  <eric@webkit.org>

+        Reviewed by NOBODY (OOPS!).
+
+        Second most awesome change ever.
+
+        * scm_unittest.py:
+
+2009-10-26  Eric Seidel  <eric@webkit.org>
+
         Reviewed by Foo Bar.

         Most awesome change ever.
";

    const TWO_LINE_OVERLAP: &str = "\
Index: ChangeLog
===================================================================
--- ChangeLog\t(revision 5)
+++ ChangeLog\t(working copy)
@@ -2,6 +2,14 @@

         Reviewed by Foo Bar.

+        Second most awesome change ever.
+
+        * scm_unittest.py:
+
+2009-10-26  Eric Seidel  <eric@webkit.org>
+
+        Reviewed by Foo Bar.
+
         Most awesome change ever.

         * scm_unittest.py:
";

    fn placeholders() -> Placeholders<'static> {
        Placeholders::new(NaiveDate::from_ymd_opt(2010, 4, 1).unwrap(), Some("Joe Cool"))
    }

    fn current() -> String {
        format!("{}\n{}", INTERMEDIATE_ENTRY, FIRST_ENTRY)
    }

    fn apply_patch(patch: &str, content: &str, force: bool) -> Result<TextOutcome, PatchError> {
        let hunks = parse_patch(patch).unwrap().files.remove(0).hunks;
        apply("ChangeLog", content, &hunks, &placeholders(), 3, force)
    }

    #[test]
    fn test_one_line_overlap_goes_to_top() {
        let out = apply_patch(ONE_LINE_OVERLAP, &current(), false).unwrap();
        let expected_entry = "\
2010-04-01  Eric Seidel  <eric@webkit.org>

        Reviewed by Joe Cool.

        Second most awesome change ever.

        * scm_unittest.py:
";
        assert_eq!(out.content, format!("{}\n{}", expected_entry, current()));
        assert_eq!(out.applied, 1);
    }

    #[test]
    fn test_two_line_overlap_goes_to_top() {
        let out = apply_patch(TWO_LINE_OVERLAP, &current(), false).unwrap();
        let expected_entry = "\
2010-04-01  Eric Seidel  <eric@webkit.org>

        Reviewed by Foo Bar.

        Second most awesome change ever.

        * scm_unittest.py:
";
        assert_eq!(out.content, format!("{}\n{}", expected_entry, current()));
    }

    #[test]
    fn test_reapplying_an_entry() {
        let once = apply_patch(ONE_LINE_OVERLAP, &current(), false).unwrap().content;
        let twice = apply_patch(ONE_LINE_OVERLAP, &once, false).unwrap();
        assert_eq!(twice.content, once);
        assert_eq!(twice.applied, 0);
        assert_eq!(twice.already_applied, 1);
        assert!(apply_patch(ONE_LINE_OVERLAP, &once, true)
            .unwrap_err()
            .is_conflict());
    }

    #[test]
    fn test_placeholder_entry_without_overlap() {
        let patch = "\
--- ChangeLog
+++ ChangeLog
@@ -1,3 +1,9 @@
+DATE_HERE  Jane Doe  <jane@example.org>
+
+        Reviewed by REVIEWER_HERE.
+
+        * file.c:
+
 2009-10-26  Eric Seidel  <eric@webkit.org>

         Reviewed by Foo Bar.
";
        let out = apply_patch(patch, &current(), false).unwrap();
        assert!(out.content.starts_with(
            "2010-04-01  Jane Doe  <jane@example.org>\n\n        Reviewed by Joe Cool.\n\n        * file.c:\n\n2009-10-27"
        ));
    }

    #[test]
    fn test_mid_file_hunk_is_plain_text() {
        let patch = "\
--- ChangeLog
+++ ChangeLog
@@ -3,3 +3,3 @@
         Reviewed by Foo Bar.

-        Most awesome change ever.
+        Most awesome change ever (DATE_HERE).
";
        let out = apply_patch(patch, FIRST_ENTRY, false).unwrap();
        assert!(out.content.contains("Most awesome change ever (2010-04-01)."));
        assert!(out.content.starts_with("2009-10-26"));
    }

    #[test]
    fn test_entry_headers() {
        assert!(is_entry_header("2009-10-26  Eric Seidel  <eric@webkit.org>\n"));
        assert!(is_entry_header("DATE_HERE  Someone"));
        assert!(!is_entry_header("2009-10-26"));
        assert!(!is_entry_header("2009-10-26X  Someone"));
        assert!(!is_entry_header("        Reviewed by Foo Bar."));
        assert!(!is_entry_header("209-10-26  Someone"));
    }

    #[test]
    fn test_latest_entry() {
        assert_eq!(latest_entry(&current()).as_deref(), Some(INTERMEDIATE_ENTRY));
        assert_eq!(latest_entry(FIRST_ENTRY).as_deref(), Some(FIRST_ENTRY));
        assert_eq!(latest_entry("no entries here\n"), None);
    }
}

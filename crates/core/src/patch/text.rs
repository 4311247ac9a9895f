//! Fuzzy application of text hunks.
//!
//! Each hunk is located by its preimage: exactly at the recorded position
//! (shifted by what earlier hunks moved), else at the nearest exact match
//! anywhere in the file, else with up to `fuzz` context lines dropped from
//! each end. A hunk whose preimage is missing but whose postimage is
//! present is already applied.

use tracing::{debug, warn};

use crate::errors::PatchError;

use super::Hunk;

/// Lines either side of a hunk's expected position searched for its
/// postimage when deciding whether it is already applied.
const ALREADY_APPLIED_WINDOW: usize = 100;

/// Result of applying a list of hunks to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOutcome {
    pub content: String,
    pub applied: usize,
    pub already_applied: usize,
}

/// Split into lines, keeping each `\n`.
pub fn split_lines(content: &str) -> Vec<String> {
    content.split_inclusive('\n').map(str::to_string).collect()
}

/// Apply `hunks` in order to `content`.
///
/// With `force`, an already-applied hunk is a conflict instead of being
/// skipped.
pub fn apply_hunks(
    path: &str,
    content: &str,
    hunks: &[Hunk],
    fuzz: usize,
    force: bool,
) -> Result<TextOutcome, PatchError> {
    let mut lines = split_lines(content);
    let mut offset: isize = 0;
    let mut applied = 0;
    let mut already_applied = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let number = index + 1;
        match locate(&lines, hunk, offset, fuzz) {
            Some(found) => {
                if found.fuzz > 0 {
                    debug!(path, hunk = number, fuzz = found.fuzz, at = found.at + 1, "hunk applied with fuzz");
                }
                let pre_len = found.pre_len;
                let post_len = found.post.len();
                lines.splice(found.at..found.at + pre_len, found.post);
                offset = found.at as isize - found.expected_base as isize + post_len as isize
                    - pre_len as isize;
                applied += 1;
            }
            None if is_already_applied(&lines, hunk, offset) => {
                if force {
                    return Err(PatchError::conflict(
                        path,
                        format!("hunk #{} is already applied", number),
                    ));
                }
                warn!(path, hunk = number, "hunk already applied, skipping");
                already_applied += 1;
            }
            None => {
                return Err(PatchError::conflict(
                    path,
                    format!(
                        "hunk #{} (@@ -{},{} +{},{} @@) does not apply",
                        number, hunk.old_start, hunk.old_len, hunk.new_start, hunk.new_len
                    ),
                ));
            }
        }
    }

    Ok(TextOutcome {
        content: lines.concat(),
        applied,
        already_applied,
    })
}

struct Found {
    at: usize,
    /// Position the (possibly trimmed) preimage was expected at, before the
    /// running offset.
    expected_base: usize,
    pre_len: usize,
    post: Vec<String>,
    fuzz: usize,
}

/// Candidate (preimage, postimage, lines dropped at the front, fuzz level)
/// tuples, from the full hunk to the most fuzzed.
fn candidates(hunk: &Hunk, fuzz: usize) -> Vec<(Vec<String>, Vec<String>, usize, usize)> {
    let pre = hunk.preimage();
    let post = hunk.postimage();
    let leading = hunk.leading_context();
    let trailing = hunk.trailing_context();

    let mut out = vec![(pre.clone(), post.clone(), 0, 0)];
    let mut seen = vec![(0, 0)];
    for level in 1..=fuzz {
        let lead = level.min(leading);
        let trail = level.min(trailing);
        // Never trim away the whole preimage.
        if seen.contains(&(lead, trail)) || lead + trail >= pre.len() {
            continue;
        }
        seen.push((lead, trail));
        let trimmed_pre = pre[lead..pre.len() - trail].to_vec();
        let trimmed_post = post[lead..post.len() - trail].to_vec();
        out.push((trimmed_pre, trimmed_post, lead, level));
    }
    out
}

fn locate(lines: &[String], hunk: &Hunk, offset: isize, fuzz: usize) -> Option<Found> {
    for (pre, post, lead, level) in candidates(hunk, fuzz) {
        let expected_base = hunk.anchor() + lead;
        let expected = shifted(expected_base, offset, lines.len());
        if pre.is_empty() {
            // Pure insertion without context.
            return Some(Found {
                at: expected,
                expected_base,
                pre_len: 0,
                post,
                fuzz: level,
            });
        }
        if let Some(at) = nearest_match(lines, &pre, expected, usize::MAX) {
            return Some(Found {
                at,
                expected_base,
                pre_len: pre.len(),
                post,
                fuzz: level,
            });
        }
    }
    None
}

/// The whole postimage, untrimmed, found near where the hunk belongs.
fn is_already_applied(lines: &[String], hunk: &Hunk, offset: isize) -> bool {
    let post = hunk.postimage();
    !post.is_empty()
        && nearest_match(
            lines,
            &post,
            shifted(hunk.anchor(), offset, lines.len()),
            ALREADY_APPLIED_WINDOW,
        )
        .is_some()
}

fn shifted(base: usize, offset: isize, len: usize) -> usize {
    let pos = base as isize + offset;
    pos.clamp(0, len as isize) as usize
}

/// Start index of the occurrence of `needle` closest to `expected`, at most
/// `max_distance` lines away.
fn nearest_match(
    lines: &[String],
    needle: &[String],
    expected: usize,
    max_distance: usize,
) -> Option<usize> {
    if needle.len() > lines.len() {
        return None;
    }
    let last = lines.len() - needle.len();
    let expected = expected.min(last);
    let matches_at = |at: usize| lines[at..at + needle.len()] == *needle;
    for distance in 0..=last.min(max_distance) {
        let after = expected + distance;
        if after <= last && matches_at(after) {
            return Some(after);
        }
        if distance > 0 && distance <= expected && matches_at(expected - distance) {
            return Some(expected - distance);
        }
        if after > last && distance > expected {
            break;
        }
    }
    None
}

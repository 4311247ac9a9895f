//! Patch document parser.
//!
//! Understands the unified diffs written by `svn diff` (`Index:` headers,
//! `(revision N)` labels, base64 bodies for binary files) and by
//! `git diff --binary` (`diff --git` headers, file mode lines, base85
//! `GIT binary patch` blocks), plus plain `---`/`+++` diffs.

use std::path::{Component, Path};

use base64::Engine;
use tracing::trace;

use crate::errors::PatchError;

use super::binary;
use super::{BinaryPayload, FileChange, FilePatch, Hunk, HunkLine, ParsedPatch};

const SVN_BINARY_MARKER: &str = "Cannot display: file marked as a binary type.";

/// Which header style introduced the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// `Index: path`; the target path is taken from this line only.
    Index,
    /// `diff --git a/path b/path`.
    Git,
    /// A bare `---`/`+++` pair.
    Plain,
}

#[derive(Debug)]
struct FileBuilder {
    origin: Origin,
    path: String,
    seen_headers: bool,
    create: bool,
    delete: bool,
    svn_binary: bool,
    hunks: Vec<Hunk>,
    binary: Option<BinaryPayload>,
}

impl FileBuilder {
    fn new(origin: Origin, path: impl Into<String>) -> Self {
        Self {
            origin,
            path: path.into(),
            seen_headers: false,
            create: false,
            delete: false,
            svn_binary: false,
            hunks: Vec::new(),
            binary: None,
        }
    }

    fn has_content(&self) -> bool {
        !self.hunks.is_empty() || self.binary.is_some()
    }

    fn finish(self) -> Result<Option<FilePatch>, PatchError> {
        let all_hunks_empty_after = !self.hunks.is_empty()
            && self.hunks.iter().all(|h| h.new_start == 0 && h.new_len == 0);
        let change = if self.delete || (self.origin != Origin::Git && all_hunks_empty_after) {
            FileChange::Delete
        } else if self.create {
            FileChange::Create
        } else {
            FileChange::Modify
        };
        if change == FileChange::Modify && !self.has_content() {
            trace!(path = %self.path, "dropping file entry without changes");
            return Ok(None);
        }
        validate_path(&self.path)?;
        Ok(Some(FilePatch {
            path: self.path,
            change,
            hunks: self.hunks,
            binary: self.binary,
        }))
    }
}

/// Reject targets that would land outside the checkout.
fn validate_path(path: &str) -> Result<(), PatchError> {
    if path.is_empty() {
        return Err(PatchError::InvalidPath("(empty)".into()));
    }
    let escapes = Path::new(path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(PatchError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Split a `---`/`+++` header value into path and label (`(revision 3)`,
/// a timestamp, ...).
fn split_header(value: &str) -> (&str, &str) {
    match value.split_once('\t') {
        Some((path, label)) => (path.trim(), label.trim()),
        None => (value.trim(), ""),
    }
}

fn is_dev_null(path: &str) -> bool {
    path == "/dev/null"
}

/// Parse `@@ -a[,b] +c[,d] @@`; a missing count means 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let range = |r: &str| -> Option<(usize, usize)> {
        match r.split_once(',') {
            Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
            None => Some((r.parse().ok()?, 1)),
        }
    };
    let (old_start, old_len) = range(old)?;
    let (new_start, new_len) = range(new)?;
    Some((old_start, old_len, new_start, new_len))
}

fn is_base64_line(line: &str) -> bool {
    !line.is_empty()
        && line
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    current: Option<FileBuilder>,
    files: Vec<FilePatch>,
}

/// Parse a patch document into per-file changes.
pub fn parse_patch(text: &str) -> Result<ParsedPatch, PatchError> {
    let mut parser = Parser {
        lines: text.split('\n').collect(),
        pos: 0,
        current: None,
        files: Vec::new(),
    };
    parser.run()?;
    Ok(ParsedPatch {
        files: parser.files,
    })
}

impl<'a> Parser<'a> {
    fn line(&self, index: usize) -> Option<&'a str> {
        self.lines.get(index).copied()
    }

    fn parse_error(&self, index: usize, detail: impl Into<String>) -> PatchError {
        PatchError::Parse {
            line: index + 1,
            detail: detail.into(),
        }
    }

    fn start(&mut self, builder: FileBuilder) -> Result<(), PatchError> {
        self.finish_current()?;
        self.current = Some(builder);
        Ok(())
    }

    fn finish_current(&mut self) -> Result<(), PatchError> {
        if let Some(builder) = self.current.take() {
            if let Some(file) = builder.finish()? {
                self.files.push(file);
            }
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), PatchError> {
        while let Some(line) = self.line(self.pos) {
            let line = line.strip_suffix('\r').unwrap_or(line);

            if let Some(path) = line.strip_prefix("Index: ") {
                self.start(FileBuilder::new(Origin::Index, path.trim()))?;
                self.pos += 1;
            } else if let Some(rest) = line.strip_prefix("diff --git ") {
                let path = rest
                    .split_once(" b/")
                    .map(|(_, b)| b)
                    .unwrap_or_else(|| rest.strip_prefix("a/").unwrap_or(rest));
                self.start(FileBuilder::new(Origin::Git, path.trim()))?;
                self.pos += 1;
            } else if line.starts_with("--- ")
                && self
                    .line(self.pos + 1)
                    .is_some_and(|next| next.starts_with("+++ "))
            {
                self.file_headers()?;
            } else if line.starts_with("@@ ") {
                self.hunk()?;
            } else if line == "GIT binary patch" {
                self.git_binary()?;
            } else if line.starts_with("new file mode") {
                self.with_current(|b| b.create = true);
                self.pos += 1;
            } else if line.starts_with("deleted file mode") {
                self.with_current(|b| b.delete = true);
                self.pos += 1;
            } else if line == SVN_BINARY_MARKER {
                self.with_current(|b| b.svn_binary = true);
                self.pos += 1;
            } else if line.starts_with("Property changes on:") {
                self.skip_until_blank();
            } else if is_base64_line(line)
                && self
                    .current
                    .as_ref()
                    .is_some_and(|b| b.svn_binary && b.binary.is_none())
            {
                self.svn_base64()?;
            } else {
                // Separators, `index` lines, wrapped hashes and other noise.
                self.pos += 1;
            }
        }
        self.finish_current()
    }

    fn with_current(&mut self, f: impl FnOnce(&mut FileBuilder)) {
        if let Some(builder) = self.current.as_mut() {
            f(builder);
        }
    }

    fn skip_until_blank(&mut self) {
        while let Some(line) = self.line(self.pos) {
            self.pos += 1;
            if line.trim().is_empty() {
                break;
            }
        }
    }

    fn file_headers(&mut self) -> Result<(), PatchError> {
        let old_line = self.line(self.pos).unwrap_or_default();
        let new_line = self.line(self.pos + 1).unwrap_or_default();
        let (old_path, old_label) = split_header(&old_line[4..]);
        let (new_path, new_label) = split_header(&new_line[4..]);
        self.pos += 2;

        let needs_new = match &self.current {
            None => true,
            Some(b) => b.has_content() || (b.seen_headers && b.origin == Origin::Plain),
        };
        if needs_new {
            self.start(FileBuilder::new(Origin::Plain, ""))?;
        }
        let Some(builder) = self.current.as_mut() else {
            return Ok(());
        };
        builder.seen_headers = true;

        if is_dev_null(old_path) || old_label.contains("(revision 0)") || old_label.contains("(nonexistent)") {
            builder.create = true;
        }
        if is_dev_null(new_path) || new_label.contains("(nonexistent)") {
            builder.delete = true;
        }

        match builder.origin {
            Origin::Index => {}
            Origin::Git => {
                let old = old_path.strip_prefix("a/").unwrap_or(old_path);
                let new = new_path.strip_prefix("b/").unwrap_or(new_path);
                builder.path = if is_dev_null(new_path) { old } else { new }.to_string();
            }
            Origin::Plain => {
                let prefixed = (old_path.starts_with("a/") || is_dev_null(old_path))
                    && (new_path.starts_with("b/") || is_dev_null(new_path));
                let strip = |path: &'a str, prefix: &str| -> &'a str {
                    if prefixed {
                        path.strip_prefix(prefix).unwrap_or(path)
                    } else {
                        path
                    }
                };
                builder.path = if is_dev_null(new_path) {
                    strip(old_path, "a/")
                } else {
                    strip(new_path, "b/")
                }
                .to_string();
            }
        }
        Ok(())
    }

    fn hunk(&mut self) -> Result<(), PatchError> {
        let header_index = self.pos;
        let header = self.line(header_index).unwrap_or_default();
        let (old_start, old_len, new_start, new_len) = parse_hunk_header(header)
            .ok_or_else(|| self.parse_error(header_index, format!("bad hunk header '{}'", header)))?;
        if self.current.is_none() {
            return Err(self.parse_error(header_index, "hunk before any file header"));
        }
        self.pos += 1;

        let mut old_left = old_len;
        let mut new_left = new_len;
        let mut lines: Vec<HunkLine> = Vec::new();

        while old_left > 0 || new_left > 0 {
            let index = self.pos;
            let at_end = index + 1 >= self.lines.len();
            let Some(raw) = self.line(index).filter(|l| !(l.is_empty() && at_end)) else {
                return Err(self.parse_error(index, "hunk ends early"));
            };
            self.pos += 1;

            if raw.starts_with('\\') {
                strip_newline(&mut lines);
                continue;
            }
            let (marker, body) = match raw.char_indices().nth(1) {
                Some((split, _)) => (raw.as_bytes()[0], &raw[split..]),
                None => (raw.as_bytes().first().copied().unwrap_or(b' '), ""),
            };
            let text = format!("{}\n", body);
            match marker {
                b' ' if old_left > 0 && new_left > 0 => {
                    old_left -= 1;
                    new_left -= 1;
                    lines.push(HunkLine::Context(text));
                }
                b'-' if old_left > 0 => {
                    old_left -= 1;
                    lines.push(HunkLine::Remove(text));
                }
                b'+' if new_left > 0 => {
                    new_left -= 1;
                    lines.push(HunkLine::Add(text));
                }
                _ => {
                    return Err(self.parse_error(
                        index,
                        format!("unexpected line in hunk: '{}'", raw),
                    ));
                }
            }
        }

        if self.line(self.pos).is_some_and(|l| l.starts_with('\\')) {
            strip_newline(&mut lines);
            self.pos += 1;
        }

        if let Some(builder) = self.current.as_mut() {
            builder.hunks.push(Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines,
            });
        }
        Ok(())
    }

    /// Collect one `literal N`/`delta N` block starting at `self.pos`.
    fn binary_block(&mut self, path: &str) -> Result<Option<super::GitBinaryHunk>, PatchError> {
        let Some(header) = self
            .line(self.pos)
            .filter(|l| l.starts_with("literal ") || l.starts_with("delta "))
        else {
            return Ok(None);
        };
        self.pos += 1;
        let mut data = Vec::new();
        while let Some(line) = self.line(self.pos) {
            self.pos += 1;
            if line.trim().is_empty() {
                break;
            }
            data.push(line.trim_end());
        }
        binary::decode_block(header.trim_end(), &data)
            .map(Some)
            .map_err(|detail| PatchError::BinaryDecode {
                path: path.to_string(),
                detail,
            })
    }

    fn git_binary(&mut self) -> Result<(), PatchError> {
        let marker_index = self.pos;
        self.pos += 1;
        let path = match &self.current {
            Some(b) => b.path.clone(),
            None => return Err(self.parse_error(marker_index, "binary patch before any file header")),
        };
        let forward = self.binary_block(&path)?.ok_or_else(|| PatchError::BinaryDecode {
            path: path.clone(),
            detail: "missing literal or delta block".into(),
        })?;
        let reverse = self.binary_block(&path)?;
        self.with_current(|b| b.binary = Some(BinaryPayload::Git { forward, reverse }));
        Ok(())
    }

    fn svn_base64(&mut self) -> Result<(), PatchError> {
        let mut encoded = String::new();
        while let Some(line) = self.line(self.pos) {
            let line = line.trim_end();
            if !is_base64_line(line) {
                break;
            }
            encoded.push_str(line);
            self.pos += 1;
        }
        let path = self.current.as_ref().map(|b| b.path.clone()).unwrap_or_default();
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| PatchError::BinaryDecode {
                path,
                detail: e.to_string(),
            })?;
        self.with_current(|b| b.binary = Some(BinaryPayload::SvnBase64(data)));
        Ok(())
    }
}

/// Apply a `\ No newline at end of file` marker to the previous line.
fn strip_newline(lines: &mut [HunkLine]) {
    if let Some(last) = lines.last_mut() {
        let text = last.text_mut();
        if text.ends_with('\n') {
            text.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::GitBinaryHunk;

    #[test]
    fn test_svn_modify() {
        let patch = "\
Index: test_file
===================================================================
--- test_file\t(revision 4)
+++ test_file\t(revision 3)
@@ -1,2 +1 @@
 test1test2test3
-test4
";
        let parsed = parse_patch(patch).unwrap();
        assert_eq!(parsed.files.len(), 1);
        let file = &parsed.files[0];
        assert_eq!(file.path, "test_file");
        assert_eq!(file.change, FileChange::Modify);
        assert_eq!(
            file.hunks[0].lines,
            vec![
                HunkLine::Context("test1test2test3\n".into()),
                HunkLine::Remove("test4\n".into()),
            ]
        );
    }

    #[test]
    fn test_svn_added_and_deleted_files() {
        let patch = "\
Index: test_file2
===================================================================
--- test_file2\t(revision 0)
+++ test_file2\t(revision 3)
@@ -0,0 +1 @@
+second file
\\ No newline at end of file
Index: gone
===================================================================
--- gone\t(revision 3)
+++ gone\t(working copy)
@@ -1 +0,0 @@
-bye
";
        let parsed = parse_patch(patch).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].change, FileChange::Create);
        assert_eq!(
            parsed.files[0].hunks[0].lines,
            vec![HunkLine::Add("second file".into())]
        );
        assert_eq!(parsed.files[1].path, "gone");
        assert_eq!(parsed.files[1].change, FileChange::Delete);
    }

    #[test]
    fn test_git_headers_and_multiple_files() {
        let patch = "\
diff --git a/dir/one b/dir/one
index 1111111..2222222 100644
--- a/dir/one
+++ b/dir/one
@@ -1,3 +1,3 @@
 a
-b
+c

diff --git a/two b/two
deleted file mode 100644
index 3333333..0000000
--- a/two
+++ /dev/null
@@ -1 +0,0 @@
-x
";
        let parsed = parse_patch(patch).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].path, "dir/one");
        // An empty line inside a hunk is an empty context line.
        assert_eq!(
            parsed.files[0].hunks[0].lines.last(),
            Some(&HunkLine::Context("\n".into()))
        );
        assert_eq!(parsed.files[1].path, "two");
        assert_eq!(parsed.files[1].change, FileChange::Delete);
    }

    #[test]
    fn test_plain_diff_strips_prefixes() {
        let parsed = parse_patch("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-1\n+2\n--- y\n+++ y\n@@ -1 +1 @@\n-1\n+2\n").unwrap();
        let paths: Vec<_> = parsed.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["x", "y"]);
    }

    #[test]
    fn test_git_binary_addition() {
        let patch = "\
diff --git a/empty.bin b/empty.bin
new file mode 100644
index 0000000000000000000000000000000000000000..e69de29bb2d1d6434b8b29ae775ad8c2
e48c5391
GIT binary patch
literal 0
HcmV?d00001

literal 7
OcmYex&reD$;sO8*F9L)B

";
        let parsed = parse_patch(patch).unwrap();
        let file = &parsed.files[0];
        assert_eq!(file.change, FileChange::Create);
        assert_eq!(
            file.binary,
            Some(BinaryPayload::Git {
                forward: GitBinaryHunk::Literal(Vec::new()),
                reverse: Some(GitBinaryHunk::Literal(b"foobar\n".to_vec())),
            })
        );
    }

    #[test]
    fn test_svn_binary_body() {
        let patch = "\
Index: test_file.swf
===================================================================
Cannot display: file marked as a binary type.
svn:mime-type = application/octet-stream

Property changes on: test_file.swf
___________________________________________________________________
Name: svn:mime-type
   + application/octet-stream


Q1dTBx0AAAB42itg4GlgYJjGwMDDyODMxMDw34GBgQEAJPQDJA==
";
        let parsed = parse_patch(patch).unwrap();
        let file = &parsed.files[0];
        assert_eq!(file.path, "test_file.swf");
        match &file.binary {
            Some(BinaryPayload::SvnBase64(data)) => {
                assert_eq!(data.len(), 37);
                assert!(data.starts_with(b"CWS"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_malformed_inputs() {
        let err = parse_patch("--- a/x\n+++ b/x\n@@ -1,2 +1,2 @@\n a\n").unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 5, .. }));

        let err = parse_patch("--- a/x\n+++ b/x\n@@ -1 +1 @@\n*junk\n").unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 4, .. }));

        let err = parse_patch("@@ -1 +1 @@\n-a\n+b\n").unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 1, .. }));

        let err = parse_patch("diff --git a/x b/x\nGIT binary patch\nliteral 3\nHcmV?d00001\n\n").unwrap_err();
        assert!(matches!(err, PatchError::BinaryDecode { .. }));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        for path in ["../outside", "/etc/passwd", "a/../../b"] {
            let patch = format!("Index: {0}\n--- {0}\n+++ {0}\n@@ -1 +1 @@\n-a\n+b\n", path);
            assert!(
                matches!(parse_patch(&patch), Err(PatchError::InvalidPath(_))),
                "{} accepted",
                path
            );
        }
    }

    #[test]
    fn test_header_only_entries_are_dropped() {
        let patch = "Index: prop_only\n===\n\nProperty changes on: prop_only\n___\nName: svn:executable\n   + *\n\n";
        assert!(parse_patch(patch).unwrap().files.is_empty());
    }
}

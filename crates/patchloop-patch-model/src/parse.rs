use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::{ChangeKind, Diagnostic, DiagnosticKind, FileDiff, Hunk, HunkLine, Patch};

/// Placeholder target used when no path can be recovered from a file block
pub const UNKNOWN_PATH: &str = "unknown";

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("valid hunk regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchParseError {
    #[error("no file blocks found")]
    NoFileBlocks,

    #[error("malformed hunk header at line {line}: {text}")]
    MalformedHunkHeader { line: usize, text: String },

    #[error("unexpected line {line} inside hunk body: {text}")]
    UnexpectedLine { line: usize, text: String },
}

/// Parse unified diff text, recovering as much as possible.
///
/// Never fails. Skipped input is reported through [`Patch::diagnostics`].
#[must_use]
pub fn parse(text: &str) -> Patch {
    let lines: Vec<&str> = text.lines().collect();
    let mut parser = Parser::default();
    for (idx, line) in lines.iter().enumerate() {
        let next = lines.get(idx + 1).copied();
        let after = lines.get(idx + 2).copied();
        parser.feed(idx + 1, line, next, after);
    }
    parser.finish()
}

/// Parse, rejecting input the tolerant parser would have to skip.
pub fn parse_strict(text: &str) -> Result<Patch, PatchParseError> {
    let patch = parse(text);
    for diag in &patch.diagnostics {
        match diag.kind {
            DiagnosticKind::MalformedHunkHeader => {
                return Err(PatchParseError::MalformedHunkHeader {
                    line: diag.line,
                    text: diag.text.clone(),
                });
            }
            DiagnosticKind::UnexpectedLine => {
                return Err(PatchParseError::UnexpectedLine {
                    line: diag.line,
                    text: diag.text.clone(),
                });
            }
            DiagnosticKind::EmptyFileBlock => {}
        }
    }
    if patch.files.is_empty() {
        return Err(PatchParseError::NoFileBlocks);
    }
    Ok(patch)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Side {
    DevNull,
    Path(String),
}

#[derive(Debug)]
struct FileBuilder {
    start_line: usize,
    git_source: Option<String>,
    git_target: Option<String>,
    minus: Option<Side>,
    plus: Option<Side>,
    change: ChangeKind,
    hunks: Vec<Hunk>,
}

impl FileBuilder {
    fn new(start_line: usize) -> Self {
        Self {
            start_line,
            git_source: None,
            git_target: None,
            minus: None,
            plus: None,
            change: ChangeKind::Modified,
            hunks: Vec::new(),
        }
    }

    fn from_git_line(start_line: usize, line: &str) -> Self {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut builder = Self::new(start_line);
        builder.git_source = tokens.get(2).and_then(|t| clean_path(t));
        builder.git_target = tokens.get(3).and_then(|t| clean_path(t));
        builder
    }

    fn saw_file_headers(&self) -> bool {
        self.minus.is_some() || self.plus.is_some() || !self.hunks.is_empty()
    }

    fn header_line(&mut self, line: &str) {
        if let Some(mode) = line.strip_prefix("new file mode ") {
            self.change = ChangeKind::Added {
                mode: Some(mode.trim().to_string()),
            };
        } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
            self.change = ChangeKind::Deleted {
                mode: Some(mode.trim().to_string()),
            };
        } else if let Some(rest) = line.strip_prefix("--- ") {
            self.minus = parse_side(rest);
            if self.minus == Some(Side::DevNull) && !self.change.is_added() {
                self.change = ChangeKind::Added { mode: None };
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            self.plus = parse_side(rest);
            if self.plus == Some(Side::DevNull) && !self.change.is_deleted() {
                self.change = ChangeKind::Deleted { mode: None };
            }
        }
    }

    fn target(&self) -> String {
        let from_headers = match (&self.plus, &self.minus) {
            (Some(Side::Path(p)), _) => Some(p.clone()),
            (Some(Side::DevNull), Some(Side::Path(src))) => Some(src.clone()),
            _ => None,
        };
        from_headers
            .or_else(|| self.git_target.clone())
            .unwrap_or_else(|| UNKNOWN_PATH.to_string())
    }

    fn source(&self) -> Option<String> {
        match &self.minus {
            Some(Side::Path(p)) => Some(p.clone()),
            Some(Side::DevNull) => None,
            None => self.git_source.clone(),
        }
    }

    fn build(self) -> Result<FileDiff, (usize, String)> {
        let path = self.target();
        if self.hunks.is_empty() {
            return Err((self.start_line, path));
        }
        let source_path = self.source().filter(|s| *s != path);
        Ok(FileDiff {
            path,
            source_path,
            change: self.change,
            hunks: self.hunks,
        })
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Outside,
    Header,
    InHunk(Hunk),
    /// Inside the body of a hunk whose header could not be parsed
    SkipHunk,
}

#[derive(Debug, Default)]
struct Parser {
    files: Vec<FileDiff>,
    diagnostics: Vec<Diagnostic>,
    current: Option<FileBuilder>,
    state: State,
}

impl Parser {
    fn feed(&mut self, lineno: usize, line: &str, next: Option<&str>, after: Option<&str>) {
        if line.starts_with("diff --git") {
            self.finish_file();
            self.current = Some(FileBuilder::from_git_line(lineno, line));
            self.state = State::Header;
            return;
        }

        if self.is_plain_boundary(line, next, after) {
            self.finish_file();
            self.current = Some(FileBuilder::new(lineno));
            self.state = State::Header;
        }

        match std::mem::take(&mut self.state) {
            State::Outside => {}
            State::Header => {
                if line.starts_with("@@") {
                    self.start_hunk(lineno, line);
                } else {
                    self.state = State::Header;
                    if let Some(file) = self.current.as_mut() {
                        file.header_line(line);
                    }
                }
            }
            State::InHunk(mut hunk) => {
                if line.starts_with("@@") {
                    self.close_hunk(hunk);
                    self.start_hunk(lineno, line);
                } else if let Some(body) = body_line(line) {
                    hunk.lines.push(body);
                    self.state = State::InHunk(hunk);
                } else {
                    self.close_hunk(hunk);
                    self.diagnose(lineno, DiagnosticKind::UnexpectedLine, line);
                    self.state = State::Header;
                }
            }
            State::SkipHunk => {
                if line.starts_with("@@") {
                    self.start_hunk(lineno, line);
                } else if body_line(line).is_some() {
                    self.state = State::SkipHunk;
                } else {
                    self.state = State::Header;
                }
            }
        }
    }

    /// `--- x` directly followed by `+++ y` opens a new block, unless it is
    /// the header pair of a `diff --git` block that has not seen one yet.
    fn is_plain_boundary(&self, line: &str, next: Option<&str>, after: Option<&str>) -> bool {
        if !line.starts_with("--- ") || !next.is_some_and(|n| n.starts_with("+++ ")) {
            return false;
        }
        match &self.state {
            State::Outside => true,
            State::Header => self
                .current
                .as_ref()
                .is_none_or(FileBuilder::saw_file_headers),
            State::InHunk(_) | State::SkipHunk => after.is_some_and(|a| a.starts_with("@@")),
        }
    }

    fn start_hunk(&mut self, lineno: usize, line: &str) {
        match parse_hunk_header(line) {
            Some(hunk) => self.state = State::InHunk(hunk),
            None => {
                self.diagnose(lineno, DiagnosticKind::MalformedHunkHeader, line);
                self.state = State::SkipHunk;
            }
        }
    }

    fn close_hunk(&mut self, mut hunk: Hunk) {
        // Editors and models often leave blank lines after the last hunk.
        while hunk.body_old_len() > hunk.old_len
            && matches!(hunk.lines.last(), Some(HunkLine::Context(t)) if t.is_empty())
        {
            hunk.lines.pop();
        }
        if let Some(file) = self.current.as_mut() {
            file.hunks.push(hunk);
        }
    }

    fn finish_file(&mut self) {
        if let State::InHunk(hunk) = std::mem::take(&mut self.state) {
            self.close_hunk(hunk);
        }
        if let Some(builder) = self.current.take() {
            match builder.build() {
                Ok(file) => self.files.push(file),
                Err((line, path)) => self.diagnose(line, DiagnosticKind::EmptyFileBlock, &path),
            }
        }
    }

    fn diagnose(&mut self, line: usize, kind: DiagnosticKind, text: &str) {
        self.diagnostics.push(Diagnostic {
            line,
            kind,
            text: text.to_string(),
        });
    }

    fn finish(mut self) -> Patch {
        self.finish_file();
        Patch {
            files: self.files,
            diagnostics: self.diagnostics,
        }
    }
}

fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER.captures(line)?;
    let num = |idx: usize| -> Option<Option<u32>> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok().map(Some),
            None => Some(None),
        }
    };
    Some(Hunk {
        old_start: num(1)??,
        old_len: num(2)?.unwrap_or(1),
        new_start: num(3)??,
        new_len: num(4)?.unwrap_or(1),
        section: caps.get(5).map_or("", |m| m.as_str()).to_string(),
        lines: Vec::new(),
    })
}

fn body_line(line: &str) -> Option<HunkLine> {
    let mut chars = line.chars();
    let text = |rest: &str| rest.to_string();
    match chars.next() {
        None => Some(HunkLine::Context(String::new())),
        Some(' ') => Some(HunkLine::Context(text(chars.as_str()))),
        Some('+') => Some(HunkLine::Added(text(chars.as_str()))),
        Some('-') => Some(HunkLine::Removed(text(chars.as_str()))),
        Some('\\') => Some(HunkLine::NoNewline(text(chars.as_str()))),
        Some(_) => None,
    }
}

fn parse_side(rest: &str) -> Option<Side> {
    let raw = rest.split('\t').next().unwrap_or_default().trim();
    if raw == "/dev/null" {
        return Some(Side::DevNull);
    }
    clean_path(raw).map(Side::Path)
}

/// Strip quoting and the `a/`/`b/` prefix; `None` for empty or `/dev/null`.
fn clean_path(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(raw);
    if unquoted.is_empty() || unquoted == "/dev/null" {
        return None;
    }
    let path = unquoted
        .strip_prefix("a/")
        .or_else(|| unquoted.strip_prefix("b/"))
        .unwrap_or(unquoted);
    (!path.is_empty()).then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_DIFF: &str = "\
diff --git a/src/app.py b/src/app.py
index 83db48f..bf269f4 100644
--- a/src/app.py
+++ b/src/app.py
@@ -1,3 +1,4 @@ import os
 import sys
+import json

 def main():
@@ -10,2 +11,2 @@ def main():
-    print('x')
+    print('y')
     return 0
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-old
+new
";

    #[test]
    fn test_parses_git_diff_blocks_and_hunks() {
        let patch = parse(GIT_DIFF);
        assert!(patch.diagnostics.is_empty(), "{:?}", patch.diagnostics);
        assert_eq!(patch.files.len(), 2);

        let app = &patch.files[0];
        assert_eq!(app.path, "src/app.py");
        assert_eq!(app.source_path, None);
        assert_eq!(app.change, ChangeKind::Modified);
        assert_eq!(app.hunks.len(), 2);
        assert_eq!(app.hunks[0].section, " import os");
        assert_eq!(app.hunks[0].lines[2], HunkLine::Context(String::new()));
        assert_eq!((app.hunks[1].old_start, app.hunks[1].new_start), (10, 11));

        let readme = &patch.files[1];
        assert_eq!((readme.hunks[0].old_len, readme.hunks[0].new_len), (1, 1));
        assert_eq!(patch.touched_paths(), vec!["README.md", "src/app.py"]);
    }

    #[test]
    fn test_plain_unified_diff_with_timestamps() {
        let text = "\
--- a/one.txt\t2024-01-01 00:00:00.000000000 +0000
+++ b/one.txt\t2024-01-02 00:00:00.000000000 +0000
@@ -1,2 +1,2 @@
 keep
-drop
+add
--- a/two.txt
+++ b/two.txt
@@ -5,1 +5,2 @@
 five
+six
";
        let patch = parse(text);
        assert_eq!(patch.touched_paths(), vec!["one.txt", "two.txt"]);
        assert_eq!(patch.files[0].hunks[0].lines.len(), 3);
        assert_eq!(patch.files[1].hunks[0].lines.len(), 2);
    }

    #[test]
    fn test_added_and_deleted_files_keep_modes() {
        let text = "\
diff --git a/new.py b/new.py
new file mode 100755
--- /dev/null
+++ b/new.py
@@ -0,0 +1,2 @@
+#!/usr/bin/env python
+print('hi')
diff --git a/gone.py b/gone.py
deleted file mode 100644
--- a/gone.py
+++ /dev/null
@@ -1 +0,0 @@
-x = 1
";
        let patch = parse(text);
        assert_eq!(
            patch.files[0].change,
            ChangeKind::Added {
                mode: Some("100755".into())
            }
        );
        assert_eq!(patch.files[1].path, "gone.py");
        assert_eq!(
            patch.files[1].change,
            ChangeKind::Deleted {
                mode: Some("100644".into())
            }
        );
    }

    #[test]
    fn test_dev_null_without_mode_lines_flags_change() {
        let text = "--- /dev/null\n+++ b/fresh.txt\n@@ -0,0 +1 @@\n+hello\n";
        let patch = parse(text);
        assert_eq!(patch.files[0].change, ChangeKind::Added { mode: None });
        assert_eq!(patch.files[0].path, "fresh.txt");
    }

    #[test]
    fn test_target_falls_back_to_git_line_then_unknown() {
        let from_git = parse("diff --git a/x.py b/x.py\n@@ -1 +1 @@\n-a\n+b\n");
        assert_eq!(from_git.files[0].path, "x.py");

        let unknown = parse("diff --git\n@@ -1 +1 @@\n-a\n+b\n");
        assert_eq!(unknown.files[0].path, UNKNOWN_PATH);
    }

    #[test]
    fn test_malformed_header_drops_only_that_hunk() {
        let text = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @ broken
-a
+b
@@ -9,1 +9,1 @@
-c
+d
";
        let patch = parse(text);
        assert_eq!(patch.files[0].hunks.len(), 1);
        assert_eq!(patch.files[0].hunks[0].old_start, 9);
        assert_eq!(patch.diagnostics[0].kind, DiagnosticKind::MalformedHunkHeader);
        assert_eq!(patch.diagnostics[0].line, 4);

        assert!(matches!(
            parse_strict(text),
            Err(PatchParseError::MalformedHunkHeader { line: 4, .. })
        ));
    }

    #[test]
    fn test_unexpected_line_terminates_hunk() {
        let text = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,1 +1,1 @@
-a
+b
This patch changes a to b.
";
        let patch = parse(text);
        assert_eq!(patch.files[0].hunks[0].lines.len(), 2);
        assert_eq!(patch.diagnostics[0].kind, DiagnosticKind::UnexpectedLine);
        assert!(matches!(
            parse_strict(text),
            Err(PatchParseError::UnexpectedLine { line: 7, .. })
        ));
    }

    #[test]
    fn test_trailing_blank_lines_beyond_old_len_are_trimmed() {
        let text = "diff --git a/a b/a\n--- a/a\n+++ b/a\n@@ -1,1 +1,1 @@\n-a\n+b\n\n\n";
        let patch = parse(text);
        assert_eq!(patch.files[0].hunks[0].lines.len(), 2);

        // Blank lines the declared old length accounts for are real context.
        let counted = "diff --git a/a b/a\n--- a/a\n+++ b/a\n@@ -1,2 +1,2 @@\n-a\n+b\n\n";
        let patch = parse(counted);
        assert_eq!(
            patch.files[0].hunks[0].lines.last(),
            Some(&HunkLine::Context(String::new()))
        );
    }

    #[test]
    fn test_block_without_hunks_is_dropped() {
        let text = "\
diff --git a/bin.dat b/bin.dat
Binary files a/bin.dat and b/bin.dat differ
diff --git a/a b/a
--- a/a
+++ b/a
@@ -1 +1 @@
-x
+y
";
        let patch = parse(text);
        assert_eq!(patch.touched_paths(), vec!["a"]);
        assert_eq!(patch.diagnostics[0].kind, DiagnosticKind::EmptyFileBlock);
        assert!(parse_strict(text).is_ok());
    }

    #[test]
    fn test_strict_rejects_text_without_file_blocks() {
        assert_eq!(parse_strict("just prose"), Err(PatchParseError::NoFileBlocks));
        assert_eq!(parse_strict(""), Err(PatchParseError::NoFileBlocks));
    }

    #[test]
    fn test_renamed_source_is_recorded() {
        let text = "diff --git a/old.py b/new.py\n--- a/old.py\n+++ b/new.py\n@@ -1 +1 @@\n-a\n+b\n";
        let patch = parse(text);
        assert_eq!(patch.files[0].path, "new.py");
        assert_eq!(patch.files[0].source_path.as_deref(), Some("old.py"));
    }

    #[test]
    fn test_crlf_input() {
        let text = "diff --git a/a b/a\r\n--- a/a\r\n+++ b/a\r\n@@ -1 +1 @@\r\n-x\r\n+y\r\n";
        let patch = parse(text);
        assert_eq!(patch.files[0].hunks[0].lines[1], HunkLine::Added("y".into()));
    }
}

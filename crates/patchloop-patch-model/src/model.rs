use serde::{Deserialize, Serialize};

/// A parsed unified diff: ordered file blocks plus parse diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub files: Vec<FileDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl Patch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sorted, deduplicated target paths
    #[must_use]
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.iter().find(|f| f.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Modified,
    Added { mode: Option<String> },
    Deleted { mode: Option<String> },
}

impl ChangeKind {
    #[must_use]
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

/// One file block of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Target path without `a/`/`b/` prefix
    pub path: String,
    /// Source path, only when it differs from `path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub change: ChangeKind,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    #[must_use]
    pub fn source(&self) -> &str {
        self.source_path.as_deref().unwrap_or(&self.path)
    }
}

/// One body line of a hunk, without its leading marker character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum HunkLine {
    Context(String),
    Added(String),
    Removed(String),
    /// `\ No newline at end of file`
    NoNewline(String),
}

impl HunkLine {
    #[must_use]
    pub fn marker(&self) -> char {
        match self {
            Self::Context(_) => ' ',
            Self::Added(_) => '+',
            Self::Removed(_) => '-',
            Self::NoNewline(_) => '\\',
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Context(t) | Self::Added(t) | Self::Removed(t) | Self::NoNewline(t) => t,
        }
    }

    pub(crate) fn render_into(&self, out: &mut String) {
        out.push(self.marker());
        out.push_str(self.text());
        out.push('\n');
    }
}

/// A hunk with its header values as written in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_len: u32,
    pub new_start: u32,
    pub new_len: u32,
    /// Text after the closing `@@`, including any leading space
    pub section: String,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    #[must_use]
    pub fn added(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Added(_)))
            .count()
    }

    #[must_use]
    pub fn removed(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Removed(_)))
            .count()
    }

    /// Old-side length implied by the body
    #[must_use]
    pub fn body_old_len(&self) -> u32 {
        count_u32(
            self.lines
                .iter()
                .filter(|l| matches!(l, HunkLine::Context(_) | HunkLine::Removed(_))),
        )
    }

    /// New-side length implied by the body
    #[must_use]
    pub fn body_new_len(&self) -> u32 {
        count_u32(
            self.lines
                .iter()
                .filter(|l| matches!(l, HunkLine::Context(_) | HunkLine::Added(_))),
        )
    }

    /// Header as originally declared
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@{}",
            self.old_start, self.old_len, self.new_start, self.new_len, self.section
        )
    }

    /// Header plus body, as declared (no count repair)
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = self.header();
        out.push('\n');
        for line in &self.lines {
            line.render_into(&mut out);
        }
        out
    }
}

fn count_u32<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedHunkHeader,
    UnexpectedLine,
    EmptyFileBlock,
}

/// Something the tolerant parser skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based line number in the input
    pub line: usize,
    pub kind: DiagnosticKind,
    pub text: String,
}

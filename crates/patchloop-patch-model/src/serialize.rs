use patchloop_utils::types::normalize_repo_path;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ChangeKind, FileDiff, Hunk, Patch};

impl Patch {
    /// Serialize every file block with repaired hunk headers.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            write_file(&mut out, file, file.hunks.iter());
        }
        out
    }

    /// Keep only the named files, in patch order.
    #[must_use]
    pub fn select_files<S: AsRef<str>>(&self, paths: &[S]) -> Patch {
        let wanted: BTreeSet<String> = paths.iter().map(|p| normalize_repo_path(p.as_ref())).collect();
        Patch {
            files: self
                .files
                .iter()
                .filter(|f| wanted.contains(&f.path))
                .cloned()
                .collect(),
            diagnostics: Vec::new(),
        }
    }

    /// Keep only the selected hunk indices per file.
    ///
    /// Indices are 0-based and applied in original order; out-of-range
    /// indices are ignored and files left with no hunks are dropped.
    #[must_use]
    pub fn select_hunks(&self, selection: &BTreeMap<String, Vec<usize>>) -> Patch {
        let selection: BTreeMap<String, BTreeSet<usize>> = selection
            .iter()
            .map(|(path, idx)| (normalize_repo_path(path), idx.iter().copied().collect()))
            .collect();

        let files = self
            .files
            .iter()
            .filter_map(|file| {
                let indices = selection.get(&file.path)?;
                let hunks: Vec<Hunk> = indices
                    .iter()
                    .filter_map(|&i| file.hunks.get(i).cloned())
                    .collect();
                (!hunks.is_empty()).then(|| FileDiff {
                    hunks,
                    ..file.clone()
                })
            })
            .collect();

        Patch {
            files,
            diagnostics: Vec::new(),
        }
    }
}

impl FileDiff {
    /// This file block alone, serialized
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        write_file(&mut out, self, self.hunks.iter());
        out
    }
}

fn write_file<'a>(out: &mut String, file: &FileDiff, hunks: impl Iterator<Item = &'a Hunk>) {
    let source = file.source();
    let path = &file.path;

    out.push_str(&format!("diff --git a/{source} b/{path}\n"));
    match &file.change {
        ChangeKind::Added { mode } => {
            out.push_str(&format!(
                "new file mode {}\n--- /dev/null\n+++ b/{path}\n",
                mode.as_deref().unwrap_or("100644")
            ));
        }
        ChangeKind::Deleted { mode } => {
            out.push_str(&format!(
                "deleted file mode {}\n--- a/{source}\n+++ /dev/null\n",
                mode.as_deref().unwrap_or("100644")
            ));
        }
        ChangeKind::Modified => {
            if source != path {
                out.push_str(&format!("rename from {source}\nrename to {path}\n"));
            }
            out.push_str(&format!("--- a/{source}\n+++ b/{path}\n"));
        }
    }

    // Running new-minus-old delta over the hunks emitted so far.
    let mut delta: i64 = 0;
    for hunk in hunks {
        let old_len = hunk.body_old_len();
        let new_len = hunk.body_new_len();
        let mut new_start = i64::from(hunk.old_start) + delta;
        if old_len == 0 {
            new_start += 1;
        }
        if new_len == 0 {
            new_start -= 1;
        }
        let new_start = u32::try_from(new_start.max(0)).unwrap_or(u32::MAX);

        out.push_str(&format!(
            "@@ -{},{} +{},{} @@{}\n",
            hunk.old_start, old_len, new_start, new_len, hunk.section
        ));
        for line in &hunk.lines {
            line.render_into(out);
        }
        delta += i64::from(new_len) - i64::from(old_len);
    }
}

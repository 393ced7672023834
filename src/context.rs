//! Per-page metadata index and the per-file step context.
//!
//! The index is built once per stage from the source tree and read-only
//! afterwards. Lookup is deliberately fuzzy: by the time a file is processed
//! its path no longer exactly matches the indexed source path, so the best
//! similarity match above a cutoff stands in for an exact key.
use crate::rules::{LinkUpdate, Rules, SectionSpec};
use crate::util::title_from_filename;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Fixed per-page metadata filename scanned for during index construction.
pub const PAGE_META_FILENAME: &str = "templateData.js";

/// Minimum similarity ratio for a lookup candidate to qualify.
pub const LOOKUP_CUTOFF: f64 = 0.4;

/// Sparse map from source file paths to their embedded template metadata.
pub struct PageMetaIndex {
    entries: BTreeMap<String, Map<String, Value>>,
}

impl PageMetaIndex {
    /// Walk `root` and index every page-metadata file found. Files whose
    /// embedded literal fails to parse are logged and dropped.
    pub fn build(root: &Path) -> Self {
        let literal = Regex::new(r"(?s)var\s+context\s*=\s*(\{.*?\});")
            .expect("regex for embedded context literal");
        let mut entries = BTreeMap::new();

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || entry.file_name() != PAGE_META_FILENAME {
                continue;
            }
            let path = entry.path();
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(target: "site2md::index", "cannot read {}: {err}", path.display());
                    continue;
                }
            };
            let Some(cap) = literal.captures(&text) else {
                tracing::debug!(target: "site2md::index", "no context literal in {}", path.display());
                continue;
            };
            match serde_json::from_str::<Map<String, Value>>(&cap[1]) {
                Ok(map) => {
                    entries.insert(path.display().to_string(), map);
                }
                Err(err) => {
                    tracing::warn!(
                        target: "site2md::index",
                        "invalid context literal in {}: {err}",
                        path.display()
                    );
                }
            }
        }

        tracing::debug!(target: "site2md::index", "indexed {} page metadata files", entries.len());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best fuzzy match for `path` above the cutoff, or an empty mapping.
    /// A miss is never an error.
    pub fn lookup(&self, path: &Path) -> Map<String, Value> {
        let needle = path.display().to_string();
        let mut best: Option<(f64, &Map<String, Value>)> = None;
        for (key, value) in &self.entries {
            let ratio = similarity_ratio(&needle, key);
            if ratio < LOOKUP_CUTOFF {
                continue;
            }
            if best.map(|(score, _)| ratio > score).unwrap_or(true) {
                best = Some((ratio, value));
            }
        }
        best.map(|(_, value)| value.clone()).unwrap_or_default()
    }
}

impl fmt::Display for PageMetaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}: {}", Value::Object(value.clone()))?;
        }
        Ok(())
    }
}

/// Similarity ratio over matching blocks: 2*M / (len(a) + len(b)), where M
/// totals the recursively longest common substrings. Equivalent to difflib's
/// SequenceMatcher ratio without the junk heuristic.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let matches = matching_len(a, b);
    (2.0 * matches as f64) / ((a.len() + b.len()) as f64)
}

fn matching_len(a: &[u8], b: &[u8]) -> usize {
    let (ai, bi, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_len(&a[..ai], &b[..bi]) + matching_len(&a[ai + size..], &b[bi + size..])
}

fn longest_match(a: &[u8], b: &[u8]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    if a.is_empty() || b.is_empty() {
        return best;
    }
    // lengths[j] = length of common suffix ending at a[i], b[j]
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ac) in a.iter().enumerate() {
        for (j, &bc) in b.iter().enumerate() {
            if ac == bc {
                cur[j + 1] = prev[j] + 1;
                if cur[j + 1] > best.2 {
                    best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
                }
            } else {
                cur[j + 1] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

/// Values rendered into a front matter template.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub aliases: String,
    pub weight: Option<usize>,
    pub doc_type: String,
    pub keywords: String,
}

/// Per-file context threaded through a step chain.
///
/// Field contracts (produced-by -> consumed-by):
/// - `page_meta`: file/section processor -> template expansion
/// - `title`, `base_dir`: file processor -> include resolution, front matter
/// - `up_level` / `remove_numeric`: processor -> heading normalization
/// - `template_values`: front-matter producer step or section processor ->
///   front-matter injection (documented prerequisite)
/// - `section` / `section_dir`: version processor ->
///   split-by-heading
/// - `link_updates`: version processor -> link rewriting (empty = no-op)
///
/// Every consumer must tolerate an absent optional field by defaulting to a
/// no-op.
#[derive(Clone)]
pub struct StepContext<'a> {
    pub rules: &'a Rules,
    pub page_meta: Map<String, Value>,
    pub title: String,
    pub src_file_name: String,
    pub base_dir: PathBuf,
    pub up_level: bool,
    pub remove_numeric: bool,
    pub template_values: Option<TemplateValues>,
    pub section: Option<&'a SectionSpec>,
    pub section_dir: Option<PathBuf>,
    pub doc_dir: Option<String>,
    pub link_updates: &'a [LinkUpdate],
}

impl<'a> StepContext<'a> {
    /// Fresh context for one source file, with the tolerant defaults the
    /// pre-process chain expects.
    pub fn for_file(
        rules: &'a Rules,
        page_meta: Map<String, Value>,
        src_file: &Path,
        dest_file: &Path,
    ) -> Self {
        Self {
            rules,
            page_meta,
            title: title_from_filename(dest_file),
            src_file_name: src_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            base_dir: src_file.parent().map(Path::to_path_buf).unwrap_or_default(),
            up_level: true,
            remove_numeric: true,
            template_values: None,
            section: None,
            section_dir: None,
            doc_dir: None,
            link_updates: &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn ratio_is_symmetric_and_bounded() {
        let a = "/ws/source/39/design.html";
        let b = "/ws/source/39/templateData.js";
        let r = similarity_ratio(a, b);
        assert!((0.0..=1.0).contains(&r));
        assert_eq!(r, similarity_ratio(b, a));
        assert_eq!(similarity_ratio(a, a), 1.0);
    }

    #[test]
    fn ratio_prefers_same_directory() {
        let indexed = "/ws/source/39/templateData.js";
        let same_dir = "/ws/interim/39/design.md";
        let other_dir = "/elsewhere/unrelated/readme.txt";
        assert!(similarity_ratio(same_dir, indexed) > similarity_ratio(other_dir, indexed));
    }

    #[test]
    fn lookup_miss_returns_empty_mapping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = PageMetaIndex::build(dir.path());
        assert!(index.is_empty());
        let meta = index.lookup(Path::new("/nowhere/at/all.html"));
        assert!(meta.is_empty());
    }

    #[test]
    fn builds_index_from_embedded_literal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let version = dir.path().join("39");
        fs::create_dir_all(&version).expect("mkdir");
        fs::write(
            version.join(PAGE_META_FILENAME),
            r#"var context = {"version": "39", "dotVersion": "3.9"};"#,
        )
        .expect("write meta");

        let index = PageMetaIndex::build(dir.path());
        assert_eq!(index.len(), 1);

        let meta = index.lookup(&version.join("design.html"));
        assert_eq!(meta.get("dotVersion").and_then(Value::as_str), Some("3.9"));
    }

    #[test]
    fn malformed_literal_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(PAGE_META_FILENAME),
            "var context = {not json};",
        )
        .expect("write meta");
        let index = PageMetaIndex::build(dir.path());
        assert!(index.is_empty());
    }
}

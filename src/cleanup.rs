//! Whole-tree passes that run after all content is materialized: manual
//! table-of-contents removal and shadow redirect generation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::rules::Rules;
use crate::section::version_sort_key;

/// Strips manually authored navigation scaffolding from every Markdown file
/// under the content root. The site generator produces its own ToC.
pub struct TocCleaner {
    output_dir: PathBuf,
    modified: usize,
    total: usize,
    failed: usize,
}

impl TocCleaner {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            modified: 0,
            total: 0,
            failed: 0,
        }
    }

    pub fn execute(&mut self) -> bool {
        let content_dir = self.output_dir.join("content");
        if !content_dir.is_dir() {
            tracing::warn!(
                target: "site2md::cleanup",
                "content directory not found: {}, nothing to clean",
                content_dir.display()
            );
            return true;
        }
        for entry in WalkDir::new(&content_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file()
                || !entry.path().extension().is_some_and(|ext| ext == "md")
            {
                continue;
            }
            self.total += 1;
            match self.clean_file(entry.path()) {
                Ok(true) => self.modified += 1,
                Ok(false) => {}
                // A broken file never stops the batch; skip it and go on.
                Err(err) => {
                    tracing::error!(
                        target: "site2md::cleanup",
                        "failed to clean {}, skipping: {err:#}",
                        entry.path().display()
                    );
                    self.failed += 1;
                }
            }
        }
        if self.failed > 0 {
            tracing::warn!(
                target: "site2md::cleanup",
                "skipped {} files that could not be cleaned",
                self.failed
            );
        }
        tracing::info!(
            target: "site2md::cleanup",
            "toc cleanup complete: modified {} of {} files",
            self.modified,
            self.total
        );
        true
    }

    /// Returns whether the file changed. Write-back only on change.
    fn clean_file(&self, path: &Path) -> Result<bool> {
        let original = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut content = original.clone();

        // Nested lists can survive one pass, so the first two patterns are
        // applied twice.
        for _ in 0..2 {
            content = remove_toc_block(&content);
            content = remove_config_reference_toc(&content);
        }
        content = remove_breadcrumbs(&content);
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().contains("protocol.md"))
        {
            content = remove_protocol_toc(&content);
        }

        if content == original {
            return Ok(false);
        }
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(
            target: "site2md::cleanup",
            "modified {}",
            path.display()
        );
        Ok(true)
    }
}

/// `**Table of Contents**` followed by an indented bullet list.
fn remove_toc_block(content: &str) -> String {
    let pattern = Regex::new(r"\*\*Table of Contents\*\*\n\n(?:  \* .*\n(?:    \* .*\n)*)*")
        .expect("regex for toc blocks");
    pattern.replace_all(content, "").into_owned()
}

/// The configuration parameter reference keeps its heading but loses the
/// bullet listing between it and the next section.
fn remove_config_reference_toc(content: &str) -> String {
    let pattern = Regex::new(
        r"(# Configuration parameter reference\n\n)(?:  \* .*\n(?:    \* .*\n)*)+(\n##)",
    )
    .expect("regex for config reference toc");
    pattern.replace_all(content, "$1$2").into_owned()
}

/// Lines made of two or more consecutive Markdown links are navigation
/// breadcrumbs.
fn remove_breadcrumbs(content: &str) -> String {
    let pattern = Regex::new(r"(?m)^(\[[\w\s:]+\]\([^)]+\)\s*){2,}\n\n")
        .expect("regex for breadcrumb lines");
    pattern.replace_all(content, "").into_owned()
}

/// The wire protocol reference carries its own hand-built ToC starting at a
/// "Preliminaries" bullet.
fn remove_protocol_toc(content: &str) -> String {
    let pattern = Regex::new(r"(?m)^\s*\*\s+Preliminaries\n(?:^\s+\* .*\n)*")
        .expect("regex for protocol toc");
    pattern.replace_all(content, "").into_owned()
}

/// Stub written at every shadow path; the site generator's layout turns it
/// into a redirect to the real document.
pub const REDIRECT_STUB: &str = "---\nlayout: redirect\n---\n";

/// Mirrors each version's content tree under a parallel `documentation`
/// path, writing redirect stubs where no shadow file exists yet, plus one
/// unversioned mirror of the most recent version.
pub struct ShadowRedirectGenerator<'a> {
    rules: &'a Rules,
    content_root: PathBuf,
}

impl<'a> ShadowRedirectGenerator<'a> {
    pub fn new(rules: &'a Rules, content_root: &Path) -> Self {
        Self {
            rules,
            content_root: content_root.to_path_buf(),
        }
    }

    pub fn execute(&self) -> bool {
        let doc_root = self.content_root.join("documentation");
        for version in &self.rules.doc_dirs {
            let src = self.content_root.join(version);
            if !src.is_dir() {
                tracing::info!(
                    target: "site2md::cleanup",
                    "no content for version {version}, skipping shadow mirror"
                );
                continue;
            }
            if let Err(err) = self.mirror(&src, &doc_root.join(version)) {
                tracing::error!(
                    target: "site2md::cleanup",
                    "shadow mirror failed for version {version}: {err:#}"
                );
                return false;
            }
        }

        let latest = self
            .rules
            .doc_dirs
            .iter()
            .filter(|v| self.content_root.join(v.as_str()).is_dir())
            .max_by_key(|v| version_sort_key(v));
        if let Some(latest) = latest {
            let src = self.content_root.join(latest);
            if let Err(err) = self.mirror(&src, &doc_root) {
                tracing::error!(
                    target: "site2md::cleanup",
                    "global shadow mirror failed for version {latest}: {err:#}"
                );
                return false;
            }
            tracing::info!(
                target: "site2md::cleanup",
                "mirrored most recent version {latest} at {}",
                doc_root.display()
            );
        }
        true
    }

    fn mirror(&self, src: &Path, dest: &Path) -> Result<()> {
        for entry in WalkDir::new(src)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file()
                || !entry.path().extension().is_some_and(|ext| ext == "md")
            {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(src)
                .with_context(|| format!("relativizing {}", entry.path().display()))?;
            let shadow = dest.join(relative);
            if shadow.exists() {
                continue;
            }
            if let Some(parent) = shadow.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(&shadow, REDIRECT_STUB)
                .with_context(|| format!("writing {}", shadow.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn toc_blocks_and_breadcrumbs_are_removed() {
        let ws = TempDir::new().expect("tempdir");
        let content_dir = ws.path().join("content/en/39");
        fs::create_dir_all(&content_dir).expect("mkdir");
        let doc = "\
**Table of Contents**

  * [Intro](#intro)
    * [Details](#details)
  * [Usage](#usage)
[Introduction](intro.md) [Quickstart](quickstart.md)

# Intro

Body.
";
        fs::write(content_dir.join("guide.md"), doc).expect("fixture");

        let mut cleaner = TocCleaner::new(ws.path());
        assert!(cleaner.execute());

        let cleaned = fs::read_to_string(content_dir.join("guide.md")).expect("cleaned");
        assert!(!cleaned.contains("Table of Contents"));
        assert!(!cleaned.contains("[Quickstart](quickstart.md)"));
        assert!(cleaned.contains("# Intro"));
        assert!(cleaned.contains("Body."));
    }

    #[test]
    fn unchanged_files_are_left_untouched() {
        let ws = TempDir::new().expect("tempdir");
        let content_dir = ws.path().join("content");
        fs::create_dir_all(&content_dir).expect("mkdir");
        fs::write(content_dir.join("plain.md"), "# Plain\n\nNothing to strip.\n")
            .expect("fixture");

        let mut cleaner = TocCleaner::new(ws.path());
        assert!(cleaner.execute());
        assert_eq!(cleaner.modified, 0);
        assert_eq!(cleaner.total, 1);
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() {
        let ws = TempDir::new().expect("tempdir");
        let content_dir = ws.path().join("content");
        fs::create_dir_all(&content_dir).expect("mkdir");
        // Invalid UTF-8 makes the read fail for this file only.
        fs::write(content_dir.join("broken.md"), [0xffu8, 0xfe, 0xfd]).expect("fixture");
        fs::write(
            content_dir.join("guide.md"),
            "**Table of Contents**\n\n  * [Intro](#intro)\n\n# Intro\n",
        )
        .expect("fixture");

        let mut cleaner = TocCleaner::new(ws.path());
        assert!(cleaner.execute());
        assert_eq!(cleaner.failed, 1);
        assert_eq!(cleaner.modified, 1);
        let cleaned = fs::read_to_string(content_dir.join("guide.md")).expect("cleaned");
        assert!(!cleaned.contains("Table of Contents"));
    }

    #[test]
    fn config_reference_listing_is_dropped_but_heading_kept() {
        let doc = "\
# Configuration parameter reference

  * [broker.id](#broker-id)
    * [details](#details)

## Broker configs
";
        let cleaned = remove_config_reference_toc(doc);
        assert!(cleaned.contains("# Configuration parameter reference\n"));
        assert!(!cleaned.contains("broker.id"));
        assert!(cleaned.contains("## Broker configs"));
    }

    #[test]
    fn shadow_mirror_writes_stubs_without_overwriting() {
        let ws = TempDir::new().expect("tempdir");
        let content_root = ws.path().join("content/en");
        fs::create_dir_all(content_root.join("39/design")).expect("mkdir");
        fs::create_dir_all(content_root.join("38")).expect("mkdir");
        fs::write(content_root.join("39/design/design.md"), "real").expect("fixture");
        fs::write(content_root.join("38/_index.md"), "real").expect("fixture");
        fs::create_dir_all(content_root.join("documentation/39/design")).expect("mkdir");
        fs::write(
            content_root.join("documentation/39/design/design.md"),
            "already here",
        )
        .expect("fixture");

        let rules = Rules {
            doc_dirs: vec!["38".to_string(), "39".to_string()],
            ..Rules::default()
        };
        let generator = ShadowRedirectGenerator::new(&rules, &content_root);
        assert!(generator.execute());

        // Existing shadow files are preserved.
        assert_eq!(
            fs::read_to_string(content_root.join("documentation/39/design/design.md"))
                .expect("shadow"),
            "already here"
        );
        assert_eq!(
            fs::read_to_string(content_root.join("documentation/38/_index.md")).expect("shadow"),
            REDIRECT_STUB
        );
        // The most recent version is mirrored once more without its prefix.
        assert_eq!(
            fs::read_to_string(content_root.join("documentation/design/design.md"))
                .expect("global shadow"),
            REDIRECT_STUB
        );
    }
}

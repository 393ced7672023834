//! File and directory processors for the pre-process stage.
//!
//! [`FileProcessor`] folds a step chain over one source document and is the
//! isolation boundary for per-file failures. [`DirectoryProcessor`] mirrors
//! a source tree into the interim tree, applying the exclusion and
//! static-copy policy along the way.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::context::{PageMetaIndex, StepContext};
use crate::rules::Rules;
use crate::steps::{run_step, Step};

/// Extension of documents fed through the step chain.
pub const SOURCE_DOC_EXT: &str = "html";
/// Extension of converted documents.
pub const TARGET_DOC_EXT: &str = "md";

pub struct FileProcessor<'a> {
    rules: &'a Rules,
    page_meta: &'a PageMetaIndex,
    steps: Vec<Step>,
}

impl<'a> FileProcessor<'a> {
    pub fn new(rules: &'a Rules, page_meta: &'a PageMetaIndex, steps: Vec<Step>) -> Self {
        Self {
            rules,
            page_meta,
            steps,
        }
    }

    /// Destination filename for a source document (.html becomes .md).
    pub fn dest_name(src: &Path) -> PathBuf {
        src.with_extension(TARGET_DOC_EXT)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default()
    }

    /// Run the step chain over `src`, writing the result into `dest_dir`.
    ///
    /// Never raises past this boundary: any failure is logged and converted
    /// to `false` so sibling files keep processing.
    pub fn process(&self, src: &Path, dest_dir: &Path) -> bool {
        match self.try_process(src, dest_dir) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    target: "site2md::process",
                    "failed to process {}: {err:#}",
                    src.display()
                );
                false
            }
        }
    }

    fn try_process(&self, src: &Path, dest_dir: &Path) -> Result<()> {
        let dest = dest_dir.join(Self::dest_name(src));
        let mut content = fs::read_to_string(src)
            .with_context(|| format!("reading {}", src.display()))?;
        let meta = self.page_meta.lookup(src);
        let mut ctx = StepContext::for_file(self.rules, meta, src, &dest);
        ctx.doc_dir = doc_dir_of(src, self.rules);
        for step in &self.steps {
            content = run_step(*step, content, &mut ctx)?;
        }
        // Terminal steps write their own outputs and return empty content.
        if !content.is_empty() {
            fs::write(&dest, content).with_context(|| format!("writing {}", dest.display()))?;
        }
        Ok(())
    }
}

/// Version directory identifier covering `path`, if any of its ancestors is
/// a configured documentation version directory.
fn doc_dir_of(path: &Path, rules: &Rules) -> Option<String> {
    path.ancestors()
        .filter_map(|a| a.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .find(|name| rules.doc_dirs.iter().any(|d| d == name))
}

pub struct DirectoryProcessor<'a> {
    rules: &'a Rules,
    files: FileProcessor<'a>,
}

impl<'a> DirectoryProcessor<'a> {
    pub fn new(rules: &'a Rules, page_meta: &'a PageMetaIndex, steps: Vec<Step>) -> Self {
        Self {
            rules,
            files: FileProcessor::new(rules, page_meta, steps),
        }
    }

    /// Mirror `src_dir` into `dest_dir`, with static assets landing under
    /// `static_root`. Fail-fast within a directory: the first failing entry
    /// fails the whole subtree.
    pub fn process(&self, src_dir: &Path, dest_dir: &Path, static_root: &Path) -> bool {
        let name = match src_dir.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => {
                tracing::error!(
                    target: "site2md::process",
                    "source directory has no name: {}",
                    src_dir.display()
                );
                return false;
            }
        };
        if self.rules.exclude_dirs.iter().any(|d| d == &name) {
            tracing::debug!(target: "site2md::process", "skipping excluded directory {name}");
            return true;
        }
        if self.rules.static_dirs.iter().any(|d| d == &name) {
            return self.copy_static(src_dir, &name, static_root);
        }
        if let Err(err) = self.materialize_dir(dest_dir) {
            tracing::error!(
                target: "site2md::process",
                "failed to create {}: {err:#}",
                dest_dir.display()
            );
            return false;
        }

        let entries = match sorted_entries(src_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(
                    target: "site2md::process",
                    "failed to read {}: {err:#}",
                    src_dir.display()
                );
                return false;
            }
        };
        for entry in entries {
            let ok = if entry.is_dir() {
                let sub_dest = match entry.file_name() {
                    Some(name) => dest_dir.join(name),
                    None => dest_dir.to_path_buf(),
                };
                self.process(&entry, &sub_dest, static_root)
            } else if entry.extension().is_some_and(|e| e == SOURCE_DOC_EXT) {
                self.files.process(&entry, dest_dir)
            } else {
                self.copy_file(&entry, dest_dir)
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Create the destination directory, seeding an empty placeholder index
    /// on first creation.
    fn materialize_dir(&self, dest_dir: &Path) -> Result<()> {
        if dest_dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(dest_dir)?;
        fs::write(dest_dir.join("_index.md"), "")?;
        Ok(())
    }

    /// Static directories are mirrored verbatim; the landing spot depends on
    /// whether the parent is a documentation version directory.
    fn copy_static(&self, src_dir: &Path, name: &str, static_root: &Path) -> bool {
        let parent_version = src_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| self.rules.doc_dirs.iter().any(|d| d == n));
        let dest = match parent_version {
            Some(version) => static_root.join(version).join(name),
            None => static_root.join(name),
        };
        match copy_tree(src_dir, &dest) {
            Ok(()) => {
                tracing::info!(
                    target: "site2md::process",
                    "copied static assets {} -> {}",
                    src_dir.display(),
                    dest.display()
                );
                true
            }
            Err(err) => {
                tracing::error!(
                    target: "site2md::process",
                    "failed to copy static assets {}: {err:#}",
                    src_dir.display()
                );
                false
            }
        }
    }

    fn copy_file(&self, src: &Path, dest_dir: &Path) -> bool {
        let Some(name) = src.file_name() else {
            return false;
        };
        match fs::copy(src, dest_dir.join(name)) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(
                    target: "site2md::process",
                    "failed to copy {}: {err:#}",
                    src.display()
                );
                false
            }
        }
    }
}

/// Deterministic traversal order regardless of filesystem enumeration.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in sorted_entries(src)? {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let target = dest.join(name);
        if entry.is_dir() {
            copy_tree(&entry, &target)?;
        } else {
            fs::copy(&entry, &target)
                .with_context(|| format!("copying {}", entry.display()))?;
        }
    }
    Ok(())
}

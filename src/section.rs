//! Post-process stage: assembles the versioned, sectioned output tree from
//! the interim Markdown tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use walkdir::WalkDir;

use crate::context::{StepContext, TemplateValues};
use crate::rules::{HeadingPin, Rules, SectionSpec, SectionStrategy};
use crate::steps::markdown::{
    apply_heading_pin, normalize_headings, render_front_matter, rewrite_links, split_by_heading,
    strip_front_matter, update_front_matter,
};

/// Human-readable version label from a version directory identifier.
///
/// The numeral grouping is positional: a 4-digit identifier keeps its middle
/// two digits together ("0110" -> "0.11.0.X"), everything else is one digit
/// per component ("390" -> "3.9.0.X", "39" -> "3.9.X", "3" -> "3.X").
pub fn version_label(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let mut parts: Vec<String> = if chars.len() == 4 {
        vec![
            chars[0].to_string(),
            chars[1..3].iter().collect(),
            chars[3].to_string(),
        ]
    } else {
        chars.iter().map(|c| c.to_string()).collect()
    };
    parts.push("X".to_string());
    parts.join(".")
}

/// Ordering key for version identifiers, newest-last. Components come from
/// the same grouping as [`version_label`].
pub fn version_sort_key(id: &str) -> Vec<u64> {
    version_label(id)
        .split('.')
        .filter_map(|p| p.parse::<u64>().ok())
        .collect()
}

pub struct VersionProcessor<'a> {
    rules: &'a Rules,
}

impl<'a> VersionProcessor<'a> {
    pub fn new(rules: &'a Rules) -> Self {
        Self { rules }
    }

    /// Materialize one version under `content_root`. Section failures are
    /// logged and flip the returned flag without stopping later sections.
    pub fn process(
        &self,
        version: &str,
        weight: usize,
        interim_root: &Path,
        content_root: &Path,
    ) -> bool {
        let version_src = interim_root.join(version);
        let version_out = content_root.join(version);
        if let Err(err) = self.write_version_index(version, weight, &version_out) {
            tracing::error!(
                target: "site2md::section",
                "failed to initialize version {version}: {err:#}"
            );
            return false;
        }

        let mut ok = true;
        for (idx, section) in self.rules.sections.iter().enumerate() {
            let processor = SectionProcessor {
                rules: self.rules,
                section,
                weight: idx + 1,
            };
            if !processor.process(&version_src, &version_out) {
                tracing::error!(
                    target: "site2md::section",
                    "section {} failed for version {version}",
                    section.name
                );
                ok = false;
            }
        }
        self.apply_heading_pins(&version_out);
        ok
    }

    /// Whole-tree pass over the version output: a pin applies to any
    /// matching file, whichever strategy produced it. Per-file failures are
    /// logged and skipped.
    fn apply_heading_pins(&self, version_out: &Path) {
        if self.rules.heading_pins.is_empty() {
            return;
        }
        for entry in WalkDir::new(version_out)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file()
                || !entry.path().extension().is_some_and(|ext| ext == "md")
            {
                continue;
            }
            let pins: Vec<&HeadingPin> = self
                .rules
                .heading_pins
                .iter()
                .filter(|pin| entry.path().ends_with(&pin.file))
                .collect();
            if pins.is_empty() {
                continue;
            }
            if let Err(err) = pin_file(entry.path(), &pins) {
                tracing::error!(
                    target: "site2md::section",
                    "heading pin failed for {}, skipping: {err:#}",
                    entry.path().display()
                );
            }
        }
    }

    fn write_version_index(&self, version: &str, weight: usize, version_out: &Path) -> Result<()> {
        fs::create_dir_all(version_out)
            .with_context(|| format!("creating {}", version_out.display()))?;
        let label = version_label(version);
        let prefix = &self.rules.front_matter.title_prefix;
        let title = if prefix.is_empty() {
            label
        } else {
            format!("{prefix} {label}")
        };
        let values = TemplateValues {
            title: title.clone(),
            description: title,
            tags: self.rules.front_matter.tags.clone(),
            weight: Some(weight),
            doc_type: "docs".to_string(),
            ..TemplateValues::default()
        };
        let front_matter = render_front_matter(&self.rules.front_matter, &values);
        fs::write(version_out.join("_index.md"), format!("{front_matter}\n"))?;
        Ok(())
    }
}

struct SectionProcessor<'a> {
    rules: &'a Rules,
    section: &'a SectionSpec,
    weight: usize,
}

impl SectionProcessor<'_> {
    /// Boundary for per-section failures: logs and returns false, callers
    /// continue with the next section.
    fn process(&self, version_src: &Path, version_out: &Path) -> bool {
        match self.try_process(version_src, version_out) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    target: "site2md::section",
                    "section {}: {err:#}",
                    self.section.name
                );
                false
            }
        }
    }

    fn try_process(&self, version_src: &Path, version_out: &Path) -> Result<()> {
        let section_dir = self.reset_section_dir(version_out)?;
        self.write_section_index(&section_dir)?;
        match self.section.strategy {
            SectionStrategy::Arrange => self.arrange(version_src, &section_dir),
            SectionStrategy::SplitMarkdownByHeading => self.split(version_src, &section_dir),
        }
    }

    /// Section directories are fully owned by this run: stale content from
    /// earlier runs is removed, never merged.
    fn reset_section_dir(&self, version_out: &Path) -> Result<PathBuf> {
        let section_dir = version_out.join(&self.section.name);
        if section_dir.is_dir() {
            fs::remove_dir_all(&section_dir)
                .with_context(|| format!("resetting {}", section_dir.display()))?;
        }
        fs::create_dir_all(&section_dir)
            .with_context(|| format!("creating {}", section_dir.display()))?;
        Ok(section_dir)
    }

    fn write_section_index(&self, section_dir: &Path) -> Result<()> {
        let values = TemplateValues {
            title: self.section.title.clone(),
            description: some_or(&self.section.description, &self.section.title),
            tags: merged_tags(self.rules, &self.section.tags),
            weight: Some(self.weight),
            doc_type: self.section.doc_type.clone(),
            keywords: self.section.keywords.clone(),
            ..TemplateValues::default()
        };
        let front_matter = render_front_matter(&self.rules.front_matter, &values);
        fs::write(section_dir.join("_index.md"), format!("{front_matter}\n"))?;
        Ok(())
    }

    /// The arrange strategy: copy declared interim files into the section in
    /// declared order, refitting front matter, headings, and links.
    fn arrange(&self, version_src: &Path, section_dir: &Path) -> Result<()> {
        for (idx, entry) in self.section.files.iter().enumerate() {
            let src = version_src.join(&entry.src_file);
            if !src.is_file() {
                tracing::info!(
                    target: "site2md::section",
                    "missing source {} for section {}, skipping",
                    src.display(),
                    self.section.name
                );
                continue;
            }
            let dest_name = entry.dst_file.clone().unwrap_or_else(|| {
                Path::new(&entry.src_file)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| entry.src_file.clone())
            });
            let dest = section_dir.join(&dest_name);

            let content = fs::read_to_string(&src)
                .with_context(|| format!("reading {}", src.display()))?;
            let mut ctx = StepContext::for_file(self.rules, Default::default(), &src, &dest);
            ctx.template_values = Some(TemplateValues {
                title: entry.title.clone(),
                description: some_or(&entry.description, &entry.title),
                tags: merged_tags(self.rules, &entry.tags),
                weight: Some(idx + 1),
                doc_type: self.section.doc_type.clone(),
                keywords: entry.keywords.clone(),
                ..TemplateValues::default()
            });
            ctx.link_updates = &self.rules.link_updates;
            // Interim content already had one heading bump during conversion.
            ctx.up_level = true;
            ctx.remove_numeric = true;

            let mut out = update_front_matter(content, &ctx)?;
            out = normalize_headings(out, &ctx);
            out = rewrite_links(out, ctx.link_updates);
            fs::write(&dest, out).with_context(|| format!("writing {}", dest.display()))?;
        }
        Ok(())
    }

    /// The split strategy: one interim file fans out into per-heading pages,
    /// written by the split step itself.
    fn split(&self, version_src: &Path, section_dir: &Path) -> Result<()> {
        let src_file = self
            .section
            .src_file
            .as_ref()
            .ok_or_else(|| anyhow!("section {} declares no src_file", self.section.name))?;
        let src = version_src.join(src_file);
        if !src.is_file() {
            tracing::info!(
                target: "site2md::section",
                "missing source {} for section {}, skipping",
                src.display(),
                self.section.name
            );
            return Ok(());
        }
        let content = fs::read_to_string(&src)
            .with_context(|| format!("reading {}", src.display()))?;
        let content = strip_front_matter(&content);

        let dest = section_dir.join("_split.md");
        let mut ctx = StepContext::for_file(self.rules, Default::default(), &src, &dest);
        ctx.section = Some(self.section);
        ctx.section_dir = Some(section_dir.to_path_buf());
        ctx.link_updates = &self.rules.link_updates;
        split_by_heading(content, &mut ctx)?;
        Ok(())
    }
}

fn pin_file(path: &Path, pins: &[&HeadingPin]) -> Result<()> {
    let original = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut content = original.clone();
    for pin in pins {
        content = apply_heading_pin(&content, pin);
    }
    if content != original {
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn some_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Default tags first, then entry-specific tags, without duplicates.
fn merged_tags(rules: &Rules, extra: &[String]) -> Vec<String> {
    let mut tags = rules.front_matter.tags.clone();
    for tag in extra {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ArrangeFile;
    use tempfile::TempDir;

    #[test]
    fn version_labels_follow_the_numeral_grouping() {
        assert_eq!(version_label("0110"), "0.11.0.X");
        assert_eq!(version_label("390"), "3.9.0.X");
        assert_eq!(version_label("39"), "3.9.X");
        assert_eq!(version_label("3"), "3.X");
    }

    #[test]
    fn version_ordering_uses_grouped_components() {
        let mut versions = vec!["0110", "39", "390", "3"];
        versions.sort_by_key(|v| version_sort_key(v));
        assert_eq!(versions, vec!["0110", "3", "39", "390"]);
    }

    fn arrange_rules() -> Rules {
        Rules {
            sections: vec![SectionSpec {
                name: "design".to_string(),
                title: "Design".to_string(),
                strategy: SectionStrategy::Arrange,
                files: vec![ArrangeFile {
                    src_file: "design.md".to_string(),
                    title: "Design".to_string(),
                    ..ArrangeFile::default()
                }],
                ..SectionSpec::default()
            }],
            ..Rules::default()
        }
    }

    #[test]
    fn arrange_writes_indexed_section_files() {
        let ws = TempDir::new().expect("tempdir");
        let interim = ws.path().join("interim");
        let content_root = ws.path().join("output/content/en");
        fs::create_dir_all(interim.join("39")).expect("mkdir");
        fs::write(
            interim.join("39/design.md"),
            "---\ntitle: \"stale\"\n---\n## 4.1 Motivation\nBody text\n",
        )
        .expect("fixture");

        let rules = arrange_rules();
        let processor = VersionProcessor::new(&rules);
        assert!(processor.process("39", 1, &interim, &content_root));

        let index = fs::read_to_string(content_root.join("39/_index.md")).expect("version index");
        assert!(index.contains("title: \"3.9.X\""));

        let section_index =
            fs::read_to_string(content_root.join("39/design/_index.md")).expect("section index");
        assert!(section_index.contains("title: \"Design\""));
        assert!(section_index.contains("weight: 1"));

        let page = fs::read_to_string(content_root.join("39/design/design.md")).expect("page");
        assert!(page.contains("title: \"Design\""));
        assert!(!page.contains("stale"));
        assert!(page.contains("# Motivation"));
    }

    #[test]
    fn missing_arrange_source_is_logged_not_fatal() {
        let ws = TempDir::new().expect("tempdir");
        let interim = ws.path().join("interim");
        fs::create_dir_all(interim.join("39")).expect("mkdir");

        let rules = arrange_rules();
        let processor = VersionProcessor::new(&rules);
        assert!(processor.process("39", 1, &interim, &ws.path().join("content")));
        assert!(!ws.path().join("content/39/design/design.md").exists());
    }

    #[test]
    fn section_directories_are_reset_between_runs() {
        let ws = TempDir::new().expect("tempdir");
        let interim = ws.path().join("interim");
        let content_root = ws.path().join("content");
        fs::create_dir_all(interim.join("39")).expect("mkdir");
        fs::create_dir_all(content_root.join("39/design")).expect("mkdir");
        fs::write(content_root.join("39/design/leftover.md"), "old").expect("fixture");

        let rules = arrange_rules();
        let processor = VersionProcessor::new(&rules);
        assert!(processor.process("39", 1, &interim, &content_root));
        assert!(!content_root.join("39/design/leftover.md").exists());
    }

    #[test]
    fn split_strategy_fans_out_per_heading() {
        let ws = TempDir::new().expect("tempdir");
        let interim = ws.path().join("interim");
        let content_root = ws.path().join("content");
        fs::create_dir_all(interim.join("39")).expect("mkdir");
        fs::write(
            interim.join("39/ops.md"),
            "# Operations\n## Basic Operations\nAdding topics.\n## Monitoring\nMetrics.\n",
        )
        .expect("fixture");

        let rules = Rules {
            sections: vec![SectionSpec {
                name: "operations".to_string(),
                title: "Operations".to_string(),
                strategy: SectionStrategy::SplitMarkdownByHeading,
                src_file: Some("ops.md".to_string()),
                heading_level: 2,
                ..SectionSpec::default()
            }],
            ..Rules::default()
        };
        let processor = VersionProcessor::new(&rules);
        assert!(processor.process("39", 1, &interim, &content_root));

        let ops_dir = content_root.join("39/operations");
        let first = fs::read_to_string(ops_dir.join("basic-operations.md")).expect("fragment");
        assert!(first.contains("title: \"Basic Operations\""));
        assert!(first.contains("weight: 1"));
        assert!(first.contains("Adding topics."));
        let second = fs::read_to_string(ops_dir.join("monitoring.md")).expect("fragment");
        assert!(second.contains("weight: 2"));
    }

    #[test]
    fn heading_pins_reach_split_output() {
        let ws = TempDir::new().expect("tempdir");
        let interim = ws.path().join("interim");
        let content_root = ws.path().join("content");
        fs::create_dir_all(interim.join("39")).expect("mkdir");
        fs::write(
            interim.join("39/ops.md"),
            "# Operations\n\
             ## Migration\n\
             intro\n\
             ### ZooKeeper to Quorum Migration\n\
             #### Detail Step\n\
             ### Other Topic\n",
        )
        .expect("fixture");

        let rules = Rules {
            sections: vec![SectionSpec {
                name: "operations".to_string(),
                title: "Operations".to_string(),
                strategy: SectionStrategy::SplitMarkdownByHeading,
                src_file: Some("ops.md".to_string()),
                heading_level: 2,
                ..SectionSpec::default()
            }],
            heading_pins: vec![HeadingPin {
                file: "operations/migration.md".to_string(),
                section: "Quorum Migration".to_string(),
                subordinate_level: 3,
            }],
            ..Rules::default()
        };
        let processor = VersionProcessor::new(&rules);
        assert!(processor.process("39", 1, &interim, &content_root));

        let page = fs::read_to_string(content_root.join("39/operations/migration.md"))
            .expect("fragment");
        assert!(page.contains("\n# ZooKeeper to Quorum Migration\n"));
        assert!(page.contains("\n## Detail Step\n"));
        // Headings past the pinned region keep their level.
        assert!(page.ends_with("## Other Topic"));
    }
}

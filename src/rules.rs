//! Typed rules configuration for the conversion pipeline.
//!
//! The rules file is the declarative half of the system: what to skip, what
//! to copy verbatim, which versions and sections to materialize, and the long
//! tail of link/heading fixups. Everything here is loaded once per run and
//! treated as immutable afterwards.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const RULES_FILE_NAME: &str = "process.yaml";

/// Default front matter template used when the rules file does not override it.
pub const DEFAULT_FRONT_MATTER_TEMPLATE: &str = "---\n\
title: \"{title}\"\n\
description: \"{description}\"\n\
tags: {tags}\n\
aliases: {aliases}\n\
weight: {weight}\n\
type: {type}\n\
keywords: \"{keywords}\"\n\
---\n";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Rules {
    /// Directory names skipped entirely during pre-processing.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    /// Directory names copied verbatim to the static asset root.
    #[serde(default)]
    pub static_dirs: Vec<String>,

    /// Ordered documentation version identifiers ("39", "0110", ...).
    #[serde(default)]
    pub doc_dirs: Vec<String>,

    /// Ordered section specs; declared order becomes destination weight.
    #[serde(default)]
    pub sections: Vec<SectionSpec>,

    #[serde(default)]
    pub front_matter: FrontMatterRules,

    /// Ordered link-rewrite rules applied to every Markdown link URL.
    #[serde(default)]
    pub link_updates: Vec<LinkUpdate>,

    /// File names requiring the character-escaping pass before HTML parsing.
    #[serde(default)]
    pub sanitize_list: Vec<String>,

    #[serde(default)]
    pub special_files: Vec<SpecialFileSpec>,

    #[serde(default)]
    pub git_options: GitOptions,

    /// Declarative heading-level carve-outs applied after post-processing.
    #[serde(default)]
    pub heading_pins: Vec<HeadingPin>,

    #[serde(default)]
    pub streams_enhancements: Vec<EnhancementSpec>,

    #[serde(default)]
    pub validation: ValidationRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontMatterRules {
    pub template: String,
    /// Default tag list merged into every document's front matter.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Prefix for version index titles ("<prefix> 3.9.X").
    #[serde(default)]
    pub title_prefix: String,
}

impl Default for FrontMatterRules {
    fn default() -> Self {
        Self {
            template: DEFAULT_FRONT_MATTER_TEMPLATE.to_string(),
            tags: Vec::new(),
            title_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStrategy {
    Arrange,
    SplitMarkdownByHeading,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionSpec {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: String,
    /// Hugo document type; defaults to "docs".
    #[serde(default = "default_doc_type", rename = "type")]
    pub doc_type: String,
    pub strategy: SectionStrategy,
    /// Arrange strategy: ordered file entries (order becomes weight).
    #[serde(default)]
    pub files: Vec<ArrangeFile>,
    /// Split strategy: the single source document to split.
    #[serde(default)]
    pub src_file: Option<String>,
    /// Split strategy: heading level that delimits fragments.
    #[serde(default = "default_split_level")]
    pub heading_level: usize,
}

impl Default for SectionSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            keywords: String::new(),
            doc_type: default_doc_type(),
            strategy: SectionStrategy::Arrange,
            files: Vec::new(),
            src_file: None,
            heading_level: default_split_level(),
        }
    }
}

fn default_doc_type() -> String {
    "docs".to_string()
}

fn default_split_level() -> usize {
    2
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArrangeFile {
    pub src_file: String,
    #[serde(default)]
    pub dst_file: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    Prefix,
    Replace,
    Substitute,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkUpdate {
    pub search_str: String,
    pub action: LinkAction,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecialFileSpec {
    /// Source file name relative to the input root.
    pub file: String,
    /// Registered processor name (contributors, testimonials, blog, cve).
    pub processor: String,
    /// Which tree the file is read from: "interim", "source", or a
    /// workspace-relative directory.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,
}

fn default_input_dir() -> String {
    "interim".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitOptions {
    /// Upstream repository for the source tree; clone stage is a no-op when
    /// absent (the tree is supplied externally).
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            repo: None,
            branch: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// One heading-level carve-out: inside a section whose heading contains
/// `section`, headings at `subordinate_level` or deeper get one extra bump.
#[derive(Debug, Clone, Deserialize)]
pub struct HeadingPin {
    /// Output file suffix the rule applies to (e.g. "operations/kraft.md").
    pub file: String,
    pub section: String,
    #[serde(default = "default_subordinate_level")]
    pub subordinate_level: usize,
}

fn default_subordinate_level() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementKind {
    MediaEmbeds,
    TabbedCode,
    UseCaseCards,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhancementSpec {
    /// File path relative to each version directory.
    pub file: String,
    pub kind: EnhancementKind,
    /// Heading the use-case-cards enhancer anchors on.
    #[serde(default = "default_cards_heading")]
    pub heading: String,
}

fn default_cards_heading() -> String {
    "Use Cases".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidationRules {
    /// Section names expected in every version (missing ones are warnings).
    #[serde(default)]
    pub key_sections: Vec<String>,
}

impl Rules {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read rules file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parse rules file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_rules() {
        let yaml = r#"
doc_dirs: ["39", "0110"]
exclude_dirs: ["markdown"]
sections:
  - name: design
    title: Design
    strategy: arrange
    files:
      - src_file: design.md
        title: Design
  - name: streams-developer-guide
    title: Developer Guide
    strategy: split_markdown_by_heading
    src_file: streams/developer-guide.md
    heading_level: 2
link_updates:
  - search_str: "/documentation"
    action: prefix
    value: "https://example.org"
"#;
        let rules: Rules = serde_yaml::from_str(yaml).expect("parse rules");
        assert_eq!(rules.doc_dirs, vec!["39", "0110"]);
        assert_eq!(rules.sections.len(), 2);
        assert_eq!(rules.sections[0].strategy, SectionStrategy::Arrange);
        assert_eq!(
            rules.sections[1].strategy,
            SectionStrategy::SplitMarkdownByHeading
        );
        assert_eq!(rules.sections[1].heading_level, 2);
        assert_eq!(rules.sections[0].doc_type, "docs");
        assert_eq!(rules.link_updates[0].action, LinkAction::Prefix);
        assert!(rules.git_options.repo.is_none());
        assert_eq!(rules.git_options.branch, "main");
    }

    #[test]
    fn heading_pins_default_subordinate_level() {
        let yaml = r#"
heading_pins:
  - file: operations/kraft.md
    section: "ZooKeeper to KRaft Migration"
"#;
        let rules: Rules = serde_yaml::from_str(yaml).expect("parse rules");
        assert_eq!(rules.heading_pins[0].subordinate_level, 3);
    }
}

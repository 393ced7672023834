//! Workflow orchestration: workspace layout, stage sequencing, and the six
//! stage bodies. Stages fail fast; units inside a stage are isolated at
//! their own boundaries.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context as _, Result};
use clap::ValueEnum;
use walkdir::WalkDir;

use crate::cleanup::{ShadowRedirectGenerator, TocCleaner};
use crate::context::PageMetaIndex;
use crate::enhance::run_enhancements;
use crate::process::DirectoryProcessor;
use crate::rules::{Rules, RULES_FILE_NAME};
use crate::section::VersionProcessor;
use crate::special::process_special_file;
use crate::steps::StepRegistry;

/// Fixed workspace layout: `source/`, `interim/`, `output/` (with
/// `output/static/` and `output/content/en/`), rules file at the root.
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn interim_dir(&self) -> PathBuf {
        self.root.join("interim")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.output_dir().join("static")
    }

    pub fn content_root(&self) -> PathBuf {
        self.output_dir().join("content").join("en")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join(RULES_FILE_NAME)
    }

    fn create_all(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.source_dir(),
            self.interim_dir(),
            self.output_dir(),
            self.static_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

pub struct WorkflowContext {
    pub paths: WorkspacePaths,
    pub rules: Rules,
}

impl WorkflowContext {
    /// Create the workspace layout, materialize the rules file into it on
    /// first run, and load the rules.
    pub fn load(workspace: PathBuf, rules_source: Option<&Path>) -> Result<Self> {
        let paths = WorkspacePaths::new(workspace);
        paths.create_all()?;

        let rules_dest = paths.rules_path();
        if !rules_dest.is_file() {
            let rules_src = rules_source
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(RULES_FILE_NAME));
            if !rules_src.is_file() {
                return Err(anyhow!(
                    "{} not found at {} (required to seed the workspace)",
                    RULES_FILE_NAME,
                    rules_src.display()
                ));
            }
            fs::copy(&rules_src, &rules_dest)
                .with_context(|| format!("copying rules to {}", rules_dest.display()))?;
            tracing::info!(
                target: "site2md::workflow",
                "copied {} into workspace: {}",
                RULES_FILE_NAME,
                rules_dest.display()
            );
        }

        let rules = Rules::load(&rules_dest)?;
        Ok(Self { paths, rules })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageKind {
    Clone,
    PreProcess,
    PostProcess,
    SpecialFiles,
    Enhance,
    Validate,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Clone => "clone",
            StageKind::PreProcess => "pre-process",
            StageKind::PostProcess => "post-process",
            StageKind::SpecialFiles => "special-files",
            StageKind::Enhance => "enhance",
            StageKind::Validate => "validate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

struct Stage {
    kind: StageKind,
    status: StageStatus,
}

pub struct Workflow {
    context: WorkflowContext,
    stages: Vec<Stage>,
}

impl Workflow {
    pub fn new(context: WorkflowContext) -> Self {
        let stages = [
            StageKind::Clone,
            StageKind::PreProcess,
            StageKind::PostProcess,
            StageKind::SpecialFiles,
            StageKind::Enhance,
            StageKind::Validate,
        ]
        .into_iter()
        .map(|kind| Stage {
            kind,
            status: StageStatus::NotStarted,
        })
        .collect();
        Self { context, stages }
    }

    pub fn skip_validation(&mut self) {
        self.stages.retain(|s| s.kind != StageKind::Validate);
    }

    /// Run the stage sequence, optionally starting partway through.
    /// Fail-fast at stage granularity.
    pub fn run(&mut self, start_stage: Option<StageKind>) -> bool {
        let start_idx = match start_stage {
            Some(kind) => match self.stages.iter().position(|s| s.kind == kind) {
                Some(idx) => idx,
                None => {
                    tracing::error!(
                        target: "site2md::workflow",
                        "invalid start stage: {}",
                        kind.name()
                    );
                    return false;
                }
            },
            None => 0,
        };
        for idx in start_idx..self.stages.len() {
            let kind = self.stages[idx].kind;
            self.stages[idx].status = StageStatus::InProgress;
            tracing::info!(target: "site2md::workflow", "starting stage: {}", kind.name());
            let ok = self.execute_stage(kind);
            self.stages[idx].status = if ok {
                StageStatus::Completed
            } else {
                StageStatus::Failed
            };
            tracing::info!(
                target: "site2md::workflow",
                "completed stage: {} ({})",
                kind.name(),
                if ok { "ok" } else { "failed" }
            );
            if !ok {
                return false;
            }
        }
        true
    }

    fn execute_stage(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Clone => self.clone_stage(),
            StageKind::PreProcess => self.pre_process_stage(),
            StageKind::PostProcess => self.post_process_stage(),
            StageKind::SpecialFiles => self.special_files_stage(),
            StageKind::Enhance => self.enhance_stage(),
            StageKind::Validate => self.validate_stage(),
        }
    }

    /// Clone or update the source tree. Without a configured repository the
    /// source directory is used as-is.
    fn clone_stage(&self) -> bool {
        let Some(repo) = self.context.rules.git_options.repo.as_deref() else {
            tracing::info!(
                target: "site2md::workflow",
                "no source repository configured, using workspace source as-is"
            );
            return true;
        };
        let source_dir = self.context.paths.source_dir();
        let result = if source_dir.join(".git").exists() {
            tracing::info!(target: "site2md::workflow", "updating existing repository");
            run_git(&["pull"], Some(&source_dir))
        } else {
            tracing::info!(target: "site2md::workflow", "cloning {repo}");
            run_git(
                &["clone", repo, &source_dir.to_string_lossy()],
                None,
            )
        };
        if let Err(err) = result {
            tracing::error!(target: "site2md::workflow", "git operation failed: {err:#}");
            return false;
        }
        let branch = &self.context.rules.git_options.branch;
        if branch != "main" {
            if let Err(err) = run_git(&["checkout", branch], Some(&source_dir)) {
                tracing::error!(
                    target: "site2md::workflow",
                    "failed to checkout branch {branch}: {err:#}"
                );
                return false;
            }
        }
        true
    }

    fn pre_process_stage(&self) -> bool {
        let source_dir = self.context.paths.source_dir();
        tracing::info!(target: "site2md::workflow", "building page metadata index");
        let index = PageMetaIndex::build(&source_dir);
        tracing::debug!(target: "site2md::workflow", "indexed {} metadata entries", index.len());

        let registry = StepRegistry::new();
        let steps = match registry.pre_process_steps(None) {
            Ok(steps) => steps,
            Err(err) => {
                tracing::error!(target: "site2md::workflow", "step resolution failed: {err:#}");
                return false;
            }
        };
        let processor = DirectoryProcessor::new(&self.context.rules, &index, steps);
        processor.process(
            &source_dir,
            &self.context.paths.interim_dir(),
            &self.context.paths.static_dir(),
        )
    }

    fn post_process_stage(&self) -> bool {
        let interim = self.context.paths.interim_dir();
        let content_root = self.context.paths.content_root();
        let processor = VersionProcessor::new(&self.context.rules);
        let mut ok = true;
        for (idx, version) in self.context.rules.doc_dirs.iter().enumerate() {
            tracing::info!(
                target: "site2md::workflow",
                "processing documentation version: {version}"
            );
            if !processor.process(version, idx + 1, &interim, &content_root) {
                tracing::error!(
                    target: "site2md::workflow",
                    "failed to process documentation version: {version}"
                );
                ok = false;
            }
        }
        ok
    }

    fn special_files_stage(&self) -> bool {
        let mut ok = true;
        for spec in &self.context.rules.special_files {
            let input_root = match spec.input_dir.as_str() {
                "interim" => self.context.paths.interim_dir(),
                "source" => self.context.paths.source_dir(),
                other => self.context.paths.root().join(other),
            };
            if !process_special_file(spec, &input_root, &self.context.paths.output_dir()) {
                ok = false;
            }
        }
        ok
    }

    /// Whole-tree passes after all content exists: document enhancers, ToC
    /// cleanup, and shadow redirect generation.
    fn enhance_stage(&self) -> bool {
        let content_root = self.context.paths.content_root();
        let mut ok = run_enhancements(&self.context.rules, &content_root);
        let mut cleaner = TocCleaner::new(&self.context.paths.output_dir());
        ok &= cleaner.execute();
        let shadows = ShadowRedirectGenerator::new(&self.context.rules, &content_root);
        ok &= shadows.execute();
        ok
    }

    /// Structural sanity checks over the generated tree.
    fn validate_stage(&self) -> bool {
        let output_dir = self.context.paths.output_dir();
        if !output_dir.is_dir() {
            tracing::error!(target: "site2md::workflow", "output directory does not exist");
            return false;
        }
        let md_count = count_files(&output_dir, Some("md"));
        if md_count == 0 {
            tracing::error!(target: "site2md::workflow", "no markdown files were generated");
            return false;
        }
        tracing::info!(target: "site2md::workflow", "found {md_count} markdown files");

        let static_count = count_files(&self.context.paths.static_dir(), None);
        if static_count == 0 {
            tracing::warn!(target: "site2md::workflow", "no static files were copied");
        } else {
            tracing::info!(target: "site2md::workflow", "found {static_count} static files");
        }

        let content_root = self.context.paths.content_root();
        let versions: Vec<&String> = self
            .context
            .rules
            .doc_dirs
            .iter()
            .filter(|v| content_root.join(v.as_str()).is_dir())
            .collect();
        if versions.is_empty() {
            tracing::error!(
                target: "site2md::workflow",
                "no documentation version directories found"
            );
            return false;
        }
        tracing::info!(
            target: "site2md::workflow",
            "found {} documentation versions",
            versions.len()
        );

        for version in versions {
            let version_dir = content_root.join(version);
            let sections: Vec<String> = match fs::read_dir(&version_dir) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect(),
                Err(err) => {
                    tracing::error!(
                        target: "site2md::workflow",
                        "failed to read {}: {err}",
                        version_dir.display()
                    );
                    return false;
                }
            };
            if sections.is_empty() {
                tracing::error!(
                    target: "site2md::workflow",
                    "no sections found in documentation version: {version}"
                );
                return false;
            }
            tracing::info!(
                target: "site2md::workflow",
                "found {} sections in version: {version}",
                sections.len()
            );
            let missing: Vec<&String> = self
                .context
                .rules
                .validation
                .key_sections
                .iter()
                .filter(|key| !sections.iter().any(|s| s == *key))
                .collect();
            if !missing.is_empty() {
                tracing::warn!(
                    target: "site2md::workflow",
                    "missing key sections in version {version}: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }

        let data_dir = output_dir.join("data");
        if data_dir.is_dir() {
            let data_count = count_files(&data_dir, Some("json"));
            tracing::info!(
                target: "site2md::workflow",
                "found {data_count} data files in data directory"
            );
        }
        true
    }
}

fn count_files(dir: &Path, extension: Option<&str>) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| match extension {
            Some(ext) => e.path().extension().is_some_and(|x| x == ext),
            None => true,
        })
        .count()
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    let output = cmd
        .output()
        .with_context(|| format!("running git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

//! The transform step catalog and its composition model.
//!
//! Steps are a closed enum dispatched through [`apply_step`]; registration
//! is static construction of ordered lists rather than runtime function
//! lookup, while named orderings per stage are still composable.
pub mod html;
pub mod markdown;

use crate::context::{StepContext, TemplateValues};
use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    // Pre-process direction (HTML -> Markdown).
    SanitizeHtml,
    ExpandTemplates,
    ResolveIncludes,
    ConvertToMarkdown,
    AddFrontMatter,
    NormalizeHeadings,
    // Post-process direction (Markdown restructuring).
    UpdateFrontMatter,
    RewriteLinks,
    SplitByHeading,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::SanitizeHtml => "sanitize_html",
            Step::ExpandTemplates => "process_handlebars",
            Step::ResolveIncludes => "process_ssi",
            Step::ConvertToMarkdown => "convert_to_md",
            Step::AddFrontMatter => "add_front_matter",
            Step::NormalizeHeadings => "process_headings",
            Step::UpdateFrontMatter => "update_front_matter",
            Step::RewriteLinks => "process_links",
            Step::SplitByHeading => "split_by_heading",
        }
    }
}

/// Default pre-process ordering. The order is a contract: templates expand
/// before includes resolve, conversion precedes front matter, headings are
/// normalized last.
pub const PRE_PROCESS_STEPS: &[Step] = &[
    Step::SanitizeHtml,
    Step::ExpandTemplates,
    Step::ResolveIncludes,
    Step::ConvertToMarkdown,
    Step::AddFrontMatter,
    Step::NormalizeHeadings,
];

/// Default post-process ordering.
pub const POST_PROCESS_STEPS: &[Step] = &[
    Step::UpdateFrontMatter,
    Step::RewriteLinks,
    Step::SplitByHeading,
];

/// Named catalogs for the two pipeline directions. An unknown requested
/// name is a configuration error surfaced immediately, never skipped.
pub struct StepRegistry;

impl StepRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn pre_process_steps(&self, names: Option<&[String]>) -> Result<Vec<Step>> {
        resolve(names, PRE_PROCESS_STEPS, "pre-process")
    }

    pub fn post_process_steps(&self, names: Option<&[String]>) -> Result<Vec<Step>> {
        resolve(names, POST_PROCESS_STEPS, "post-process")
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(names: Option<&[String]>, catalog: &[Step], kind: &str) -> Result<Vec<Step>> {
    let Some(names) = names else {
        return Ok(catalog.to_vec());
    };
    names
        .iter()
        .map(|name| {
            catalog
                .iter()
                .copied()
                .find(|step| step.name() == name)
                .ok_or_else(|| anyhow!("unknown {kind} step: {name}"))
        })
        .collect()
}

/// Dispatch one step over `(content, context)`.
pub fn apply_step(step: Step, content: String, ctx: &mut StepContext) -> Result<String> {
    match step {
        Step::SanitizeHtml => Ok(html::sanitize_html(content, ctx)),
        Step::ExpandTemplates => Ok(html::expand_templates(content, ctx)),
        Step::ResolveIncludes => Ok(html::resolve_includes(
            content,
            ctx,
            html::IncludeMode::Shortcode,
        )),
        Step::ConvertToMarkdown => Ok(html::convert_html_to_markdown(&content)),
        Step::AddFrontMatter => {
            // Produce template values for the injection from what the file
            // context already knows; downstream steps may overwrite them.
            let values = TemplateValues {
                title: ctx.title.clone(),
                description: ctx.title.clone(),
                tags: ctx.rules.front_matter.tags.clone(),
                doc_type: "docs".to_string(),
                ..TemplateValues::default()
            };
            ctx.template_values = Some(values);
            markdown::update_front_matter(content, ctx)
        }
        Step::NormalizeHeadings => Ok(markdown::normalize_headings(content, ctx)),
        Step::UpdateFrontMatter => markdown::update_front_matter(content, ctx),
        Step::RewriteLinks => Ok(markdown::rewrite_links(content, ctx.link_updates)),
        Step::SplitByHeading => markdown::split_by_heading(content, ctx),
    }
}

/// Execution wrapper: log a failing step with its name and input identity,
/// then re-raise to the enclosing processor boundary.
pub fn run_step(step: Step, content: String, ctx: &mut StepContext) -> Result<String> {
    apply_step(step, content, ctx).map_err(|err| {
        tracing::error!(
            target: "site2md::steps",
            "step {} failed for {}: {err}",
            step.name(),
            ctx.src_file_name
        );
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_orderings_are_returned_without_names() {
        let registry = StepRegistry::new();
        let pre = registry.pre_process_steps(None).expect("pre steps");
        assert_eq!(pre, PRE_PROCESS_STEPS.to_vec());
        let post = registry.post_process_steps(None).expect("post steps");
        assert_eq!(post.first(), Some(&Step::UpdateFrontMatter));
    }

    #[test]
    fn named_resolution_preserves_requested_order() {
        let registry = StepRegistry::new();
        let names = vec!["convert_to_md".to_string(), "sanitize_html".to_string()];
        let steps = registry.pre_process_steps(Some(&names)).expect("steps");
        assert_eq!(steps, vec![Step::ConvertToMarkdown, Step::SanitizeHtml]);
    }

    #[test]
    fn unknown_step_name_is_a_configuration_error() {
        let registry = StepRegistry::new();
        let names = vec!["no_such_step".to_string()];
        let err = registry.pre_process_steps(Some(&names)).unwrap_err();
        assert!(err.to_string().contains("no_such_step"));
    }

    #[test]
    fn post_process_names_do_not_resolve_pre_process_steps() {
        let registry = StepRegistry::new();
        let names = vec!["convert_to_md".to_string()];
        assert!(registry.post_process_steps(Some(&names)).is_err());
    }
}

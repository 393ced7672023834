//! Markdown-direction transform steps: heading normalization, the
//! configured heading-pin carve-outs, front matter injection, link
//! rewriting, and split-by-heading.
use crate::context::{StepContext, TemplateValues};
use crate::rules::{FrontMatterRules, HeadingPin, LinkAction, LinkUpdate};
use crate::util::slugify;
use anyhow::{anyhow, Result};
use regex::{Captures, Regex};
use std::fs;

fn heading_pattern() -> Regex {
    Regex::new(r"(?m)^(#{1,6})\s*(.*)$").expect("regex for headings")
}

/// Reduce every heading level by one, floor at level 1.
pub fn bump_headings(content: &str) -> String {
    heading_pattern()
        .replace_all(content, |caps: &Captures| {
            let level = caps[1].len().saturating_sub(1).max(1);
            format!("{} {}", "#".repeat(level), &caps[2])
        })
        .into_owned()
}

/// Strip leading numeric prefixes (`2.`, `2.3`, `4:`) from heading text.
pub fn strip_numeric_headings(content: &str) -> String {
    let numeric = Regex::new(r"^\d+(\.\d+)*[.:]*\s*").expect("regex for numeric prefixes");
    heading_pattern()
        .replace_all(content, |caps: &Captures| {
            let text = numeric.replace(&caps[2], "");
            format!("{} {}", &caps[1], text)
        })
        .into_owned()
}

/// Apply the `up_level` and `remove_numeric` toggles from the context.
/// Both default to no-ops when unset.
pub fn normalize_headings(content: String, ctx: &StepContext) -> String {
    let mut out = content;
    if ctx.up_level {
        out = bump_headings(&out);
    }
    if ctx.remove_numeric {
        out = strip_numeric_headings(&out);
    }
    out
}

/// Apply one heading-pin carve-out: the matching section heading and its
/// subordinate headings get one extra bump; a heading shallower than the
/// subordinate level exits the pinned region untouched.
pub fn apply_heading_pin(content: &str, pin: &HeadingPin) -> String {
    let heading = Regex::new(r"^(#{1,6})\s+(.+)$").expect("regex for heading lines");
    let mut out = Vec::new();
    let mut pinned = false;

    for line in content.lines() {
        let Some(caps) = heading.captures(line) else {
            out.push(line.to_string());
            continue;
        };
        let level = caps[1].len();
        let text = caps[2].to_string();

        if text.contains(&pin.section) {
            pinned = true;
            out.push(format!("{} {}", "#".repeat(level.saturating_sub(1).max(1)), text));
        } else if pinned && level >= pin.subordinate_level {
            out.push(format!("{} {}", "#".repeat(level.saturating_sub(1).max(1)), text));
        } else {
            pinned = false;
            out.push(line.to_string());
        }
    }

    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Render the front matter template with the given values. Tags render as a
/// bracketed, quoted list; a missing weight renders empty.
pub fn render_front_matter(fm: &FrontMatterRules, values: &TemplateValues) -> String {
    let tags = format!(
        "[{}]",
        values
            .tags
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let weight = values.weight.map(|w| w.to_string()).unwrap_or_default();
    fm.template
        .replace("{title}", &values.title)
        .replace("{description}", &values.description)
        .replace("{tags}", &tags)
        .replace("{aliases}", &values.aliases)
        .replace("{weight}", &weight)
        .replace("{type}", &values.doc_type)
        .replace("{keywords}", &values.keywords)
}

/// Strip a leading comment block and a leading delimited metadata block.
pub fn strip_front_matter(content: &str) -> String {
    let comment = Regex::new(r"^(?s)\s*(?:<!--.*?-->\s*)+").expect("regex for leading comments");
    let stripped = comment.replace(content, "");
    let block = Regex::new(r"^(?s)---\n.*?\n---\n*").expect("regex for metadata block");
    block.replace(&stripped, "").into_owned()
}

/// Replace any existing front matter with a freshly rendered block.
/// Requires `template_values`; running the step on its own output replaces
/// the previous block rather than stacking a second one.
pub fn update_front_matter(content: String, ctx: &StepContext) -> Result<String> {
    let values = ctx
        .template_values
        .as_ref()
        .ok_or_else(|| anyhow!("update_front_matter requires template_values in context"))?;
    let front_matter = render_front_matter(&ctx.rules.front_matter, values);
    Ok(format!("{front_matter}\n{}", strip_front_matter(&content)))
}

/// Rewrite the URL of every Markdown link matching a configured rule.
pub fn rewrite_links(content: String, updates: &[LinkUpdate]) -> String {
    let link = Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("regex for markdown links");
    let mut out = content;
    for update in updates {
        let substitute = match update.action {
            LinkAction::Substitute => match Regex::new(&update.search_str) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(
                        target: "site2md::steps",
                        "invalid substitute pattern {:?}: {err}, skipping rule",
                        update.search_str
                    );
                    continue;
                }
            },
            _ => None,
        };
        out = link
            .replace_all(&out, |caps: &Captures| {
                let text = &caps[1];
                let mut url = caps[2].to_string();
                match update.action {
                    LinkAction::Prefix => {
                        if url.contains(&update.search_str) && !url.starts_with(&update.value) {
                            url = format!("{}{}", update.value, url);
                        }
                    }
                    LinkAction::Replace => {
                        if url.contains(&update.search_str) {
                            url = update.value.clone();
                        }
                    }
                    LinkAction::Substitute => {
                        if let Some(re) = &substitute {
                            url = re.replace_all(&url, update.value.as_str()).into_owned();
                        }
                    }
                }
                format!("[{text}]({url})")
            })
            .into_owned();
    }
    out
}

/// Split one document into one output file per heading at the configured
/// level. Terminal step: writes fragments itself and returns empty content.
pub fn split_by_heading(content: String, ctx: &mut StepContext) -> Result<String> {
    let section = ctx
        .section
        .ok_or_else(|| anyhow!("split_by_heading requires a section in context"))?;
    let section_dir = ctx
        .section_dir
        .clone()
        .ok_or_else(|| anyhow!("split_by_heading requires a section_dir in context"))?;
    let level = section.heading_level.clamp(1, 6);
    let marker = format!("{} ", "#".repeat(level));

    let mut current_title: Option<String> = None;
    let mut fragment: Vec<&str> = Vec::new();
    let mut weight = 0usize;

    for line in content.lines() {
        if let Some(text) = line.strip_prefix(&marker) {
            if !text.trim().is_empty() && !text.starts_with('#') {
                if let Some(title) = current_title.take() {
                    weight += 1;
                    write_fragment(ctx, &section_dir, &title, &fragment.join("\n"), weight)?;
                }
                current_title = Some(text.trim().to_string());
                fragment = vec![line];
                continue;
            }
        }
        fragment.push(line);
    }
    if let Some(title) = current_title {
        weight += 1;
        write_fragment(ctx, &section_dir, &title, &fragment.join("\n"), weight)?;
    }

    Ok(String::new())
}

fn write_fragment(
    ctx: &StepContext,
    section_dir: &std::path::Path,
    title: &str,
    body: &str,
    weight: usize,
) -> Result<()> {
    let section = ctx
        .section
        .ok_or_else(|| anyhow!("split_by_heading requires a section in context"))?;
    let numeric = Regex::new(r"^\d+(\.\d+)*[.:]*\s*").expect("regex for numeric prefixes");
    let title = numeric.replace(title.trim(), "").into_owned();

    let mut out = normalize_headings(body.to_string(), ctx);
    out = rewrite_links(out, ctx.link_updates);
    out = suppress_duplicate_title(&out, &title);

    let values = TemplateValues {
        title: title.clone(),
        description: title.clone(),
        tags: ctx.rules.front_matter.tags.clone(),
        aliases: String::new(),
        weight: Some(weight),
        doc_type: section.doc_type.clone(),
        keywords: String::new(),
    };
    let front_matter = render_front_matter(&ctx.rules.front_matter, &values);
    let output = format!("{front_matter}\n{}", strip_front_matter(&out));

    let file_name = format!("{}.md", slugify(&title));
    let dest = section_dir.join(&file_name);
    fs::write(&dest, output)?;
    tracing::info!(target: "site2md::steps", "wrote split fragment {}", dest.display());
    Ok(())
}

/// Drop a leading heading whose text duplicates the fragment's own title.
fn suppress_duplicate_title(content: &str, title: &str) -> String {
    let heading = Regex::new(r"^(#{1,6})\s+(.+)$").expect("regex for heading lines");
    let mut lines = content.lines();
    let mut kept: Vec<&str> = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            kept.push(line);
            continue;
        }
        if let Some(caps) = heading.captures(line) {
            if caps[2].trim() == title {
                // Duplicate of the injected front matter title.
                break;
            }
        }
        kept.push(line);
        break;
    }
    let rest: Vec<&str> = lines.collect();
    let mut out: Vec<&str> = kept;
    out.extend(rest);
    out.join("\n")
}

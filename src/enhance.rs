//! Document-specific enhancers applied after the output tree exists:
//! media-embed conversion, tabbed code block construction, and use-case
//! card injection, driven by the `streams_enhancements` rules.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::rules::{EnhancementKind, EnhancementSpec, Rules};

/// Apply every configured enhancement to every matching file under the
/// content root. One enhancement failing is logged and flips the flag
/// without stopping the rest.
pub fn run_enhancements(rules: &Rules, content_root: &Path) -> bool {
    let mut ok = true;
    for spec in &rules.streams_enhancements {
        for path in matching_files(content_root, &spec.file) {
            if let Err(err) = enhance_file(&path, spec) {
                tracing::error!(
                    target: "site2md::enhance",
                    "enhancement failed for {}: {err:#}",
                    path.display()
                );
                ok = false;
            }
        }
    }
    ok
}

fn matching_files(content_root: &Path, file_name: &str) -> Vec<std::path::PathBuf> {
    WalkDir::new(content_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().ends_with(file_name))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn enhance_file(path: &Path, spec: &EnhancementSpec) -> Result<()> {
    let original = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let enhanced = match spec.kind {
        EnhancementKind::MediaEmbeds => convert_media_embeds(&original),
        EnhancementKind::TabbedCode => build_tabbed_code(&original),
        EnhancementKind::UseCaseCards => inject_use_case_cards(&original, &spec.heading),
    };
    if enhanced != original {
        fs::write(path, enhanced).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(
            target: "site2md::enhance",
            "enhanced {} ({:?})",
            path.display(),
            spec.kind
        );
    }
    Ok(())
}

/// Embedded YouTube iframes become the generator's video shortcode.
pub fn convert_media_embeds(content: &str) -> String {
    let iframe = Regex::new(
        r#"(?s)<iframe[^>]*src="[^"]*youtube(?:-nocookie)?\.com/embed/([A-Za-z0-9_-]+)[^"]*"[^>]*>\s*</iframe>"#,
    )
    .expect("regex for youtube iframes");
    iframe
        .replace_all(content, "{{< youtube $1 >}}")
        .into_owned()
}

/// Runs of two or more adjacent fenced code blocks (blank lines between
/// them allowed) collapse into one tabbed pane, one tab per language.
pub fn build_tabbed_code(content: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<(String, Vec<String>)> = Vec::new();

    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(lang) = line.strip_prefix("```").filter(|l| !l.is_empty()) else {
            out.push(line.to_string());
            continue;
        };
        let mut block = Vec::new();
        for body_line in lines.by_ref() {
            if body_line == "```" {
                break;
            }
            block.push(body_line.to_string());
        }
        run.push((lang.to_string(), block));
        // Only blank lines may separate blocks of the same run.
        let mut blanks = 0usize;
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
            blanks += 1;
        }
        if lines
            .peek()
            .is_some_and(|l| l.len() > 3 && l.starts_with("```"))
        {
            continue;
        }
        flush_run(&mut out, &mut run);
        for _ in 0..blanks {
            out.push(String::new());
        }
    }
    flush_run(&mut out, &mut run);

    let mut result = out.join("\n");
    if content.ends_with('\n') && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn flush_run(out: &mut Vec<String>, run: &mut Vec<(String, Vec<String>)>) {
    if run.len() >= 2 {
        out.push("{{< tabpane >}}".to_string());
        for (lang, block) in run.drain(..) {
            out.push(format!("{{{{< tab header=\"{}\" lang=\"{lang}\" >}}}}", tab_header(&lang)));
            out.extend(block);
            out.push("{{< /tab >}}".to_string());
        }
        out.push("{{< /tabpane >}}".to_string());
    } else {
        for (lang, block) in run.drain(..) {
            out.push(format!("```{lang}"));
            out.extend(block);
            out.push("```".to_string());
        }
    }
}

fn tab_header(lang: &str) -> String {
    let mut chars = lang.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Bullet entries of the form `* **Title**: description` under the
/// configured heading become a card pane.
pub fn inject_use_case_cards(content: &str, heading: &str) -> String {
    let heading_line = Regex::new(r"^(#{1,6})\s+(.*)$").expect("regex for heading lines");
    let bullet = Regex::new(r"^\s*[*-]\s+\*\*(.+?)\*\*:?\s*(.*)$").expect("regex for card bullets");

    let mut out: Vec<String> = Vec::new();
    let mut cards: Vec<(String, String)> = Vec::new();
    let mut in_section = false;
    let mut section_level = 0usize;

    for line in content.lines() {
        if let Some(caps) = heading_line.captures(line) {
            flush_cards(&mut out, &mut cards);
            let level = caps[1].len();
            if caps[2].trim() == heading {
                in_section = true;
                section_level = level;
            } else if in_section && level <= section_level {
                in_section = false;
            }
            out.push(line.to_string());
            continue;
        }
        if in_section {
            if let Some(caps) = bullet.captures(line) {
                cards.push((caps[1].to_string(), caps[2].to_string()));
                continue;
            }
        }
        flush_cards(&mut out, &mut cards);
        out.push(line.to_string());
    }
    flush_cards(&mut out, &mut cards);

    let mut result = out.join("\n");
    if content.ends_with('\n') && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn flush_cards(out: &mut Vec<String>, cards: &mut Vec<(String, String)>) {
    if cards.is_empty() {
        return;
    }
    out.push("{{< cardpane >}}".to_string());
    for (title, body) in cards.drain(..) {
        out.push(format!("{{{{< card header=\"{title}\" >}}}}"));
        if !body.is_empty() {
            out.push(body);
        }
        out.push("{{< /card >}}".to_string());
    }
    out.push("{{< /cardpane >}}".to_string());
}

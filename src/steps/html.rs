//! HTML-direction transform steps: sanitization, embedded-template
//! expansion, server-include resolution, and the legacy-dialect
//! HTML-to-Markdown renderer.
//!
//! The renderer is deliberately not a general HTML parser. It supports the
//! specific template dialect of the legacy site: headings, paragraphs,
//! lists, tables, pre/code blocks, links, images, and emphasis.
use crate::context::StepContext;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::fs;

/// Fixed escape table applied to files on the sanitize list before any HTML
/// parsing. Keys are escaped with a leading backslash.
pub const SANITIZE_ESCAPES: &[(&str, &str)] = &[("\\", "\\\\"), ("$", "\\$"), ("`", "\\`")];

/// Apply the backslash-escaping pass when the file is on the sanitize list.
pub fn sanitize_html(content: String, ctx: &StepContext) -> String {
    if !ctx
        .rules
        .sanitize_list
        .iter()
        .any(|name| name == &ctx.src_file_name)
    {
        return content;
    }
    tracing::debug!(target: "site2md::steps", "sanitizing {}", ctx.src_file_name);
    let mut out = content;
    for (from, to) in SANITIZE_ESCAPES {
        out = out.replace(from, to);
    }
    out
}

/// Expand `<script type="text/x-handlebars-template">` blocks against the
/// page metadata mapping. Conditional blocks resolve against the mapping's
/// truthiness; plain `{{key}}` tokens substitute their value, with a missing
/// key becoming an empty string rather than aborting the file.
pub fn expand_templates(content: String, ctx: &StepContext) -> String {
    let block = Regex::new(
        r#"(?s)<script[^>]*type="text/x-handlebars-template"[^>]*>(.*?)</script>"#,
    )
    .expect("regex for template blocks");
    block
        .replace_all(&content, |caps: &Captures| {
            render_tokens(&caps[1], &ctx.page_meta)
        })
        .into_owned()
}

/// Render a template fragment against the metadata mapping: `{{#if key}}` /
/// `{{#unless key}}` blocks resolve on the key's truthiness (with optional
/// `{{else}}` branches), then `{{key}}` / `{{{key}}}` tokens substitute
/// their values. Markers of other block helpers are stripped, keeping their
/// bodies.
pub fn render_tokens(template: &str, meta: &Map<String, Value>) -> String {
    let resolved = render_conditionals(template, meta);
    let helper = Regex::new(r"\{\{[#/][^}]*\}\}").expect("regex for block helpers");
    let token =
        Regex::new(r"\{\{\{?\s*([A-Za-z0-9_.]+)\s*\}?\}\}").expect("regex for template tokens");

    let stripped = helper.replace_all(&resolved, "");
    token
        .replace_all(&stripped, |caps: &Captures| lookup_string(meta, &caps[1]))
        .into_owned()
}

/// Resolve conditional blocks innermost-first: a falsy key drops the block
/// body (or keeps its `{{else}}` branch), a truthy key keeps it.
fn render_conditionals(template: &str, meta: &Map<String, Value>) -> String {
    let open = Regex::new(r"\{\{#(?:if|unless)\s+[A-Za-z0-9_.]+\s*\}\}")
        .expect("regex for conditional openers");
    let close = Regex::new(r"\{\{/(?:if|unless)\}\}").expect("regex for conditional closers");

    let mut text = template.to_string();
    loop {
        let (close_start, close_end) = match close.find(&text) {
            Some(m) => (m.start(), m.end()),
            None => return text,
        };
        // The last opener before the first closer delimits an innermost
        // block, so nested conditionals resolve from the inside out.
        let Some((open_start, open_end)) = open
            .find_iter(&text[..close_start])
            .last()
            .map(|m| (m.start(), m.end()))
        else {
            // Unbalanced closer; drop it so the token pass cannot see it.
            text.replace_range(close_start..close_end, "");
            continue;
        };

        let inner = text[open_start..open_end]
            .trim_start_matches("{{#")
            .trim_end_matches("}}")
            .trim();
        let (helper, key) = inner.split_once(char::is_whitespace).unwrap_or((inner, ""));
        let negate = helper == "unless";
        let truthy = is_truthy(meta, key.trim());

        let body = &text[open_end..close_start];
        let keep = match body.split_once("{{else}}") {
            Some((then_branch, else_branch)) => {
                if truthy != negate {
                    then_branch
                } else {
                    else_branch
                }
            }
            None => {
                if truthy != negate {
                    body
                } else {
                    ""
                }
            }
        };
        let replacement = keep.to_string();
        text.replace_range(open_start..close_end, &replacement);
    }
}

fn lookup(meta: &Map<String, Value>, dotted: &str) -> Option<Value> {
    let mut current = Value::Object(meta.clone());
    for part in dotted.split('.') {
        current = current.get(part)?.clone();
    }
    Some(current)
}

fn lookup_string(meta: &Map<String, Value>, dotted: &str) -> String {
    match lookup(meta, dotted) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Truthiness rules of the original template dialect: missing, null, false,
/// empty string, zero, and empty array are falsy.
fn is_truthy(meta: &Map<String, Value>, dotted: &str) -> bool {
    match lookup(meta, dotted) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum IncludeMode {
    /// Inline the referenced file's content (raw-HTML output).
    Inline,
    /// Emit a static-site include shortcode (final-format output).
    Shortcode,
}

/// Resolve legacy `<!--#include virtual="p.html" -->` directives.
///
/// Shortcode mode recomputes the destination path (`.html` -> `.md`);
/// build-generated assets keep their `.html` name but move under the static
/// root for the current version directory.
pub fn resolve_includes(content: String, ctx: &StepContext, mode: IncludeMode) -> String {
    let directive = Regex::new(r#"<!--#include virtual="([^"]+\.html)"\s*-->"#)
        .expect("regex for include directives");

    directive
        .replace_all(&content, |caps: &Captures| {
            let path = &caps[1];
            match mode {
                IncludeMode::Inline => {
                    let include_path = ctx.base_dir.join(path);
                    match fs::read_to_string(&include_path) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(
                                target: "site2md::steps",
                                "include file not found: {}",
                                include_path.display()
                            );
                            caps[0].to_string()
                        }
                    }
                }
                IncludeMode::Shortcode => {
                    if path.contains("generated/") {
                        let version = ctx.doc_dir.clone().unwrap_or_else(|| {
                            ctx.base_dir
                                .file_name()
                                .map(|n| n.to_string_lossy().to_string())
                                .unwrap_or_default()
                        });
                        format!("{{{{< include file=\"/static/{version}/{path}\" >}}}}")
                    } else {
                        let dest = path.replace(".html", ".md");
                        format!("{{{{< include file=\"{dest}\" >}}}}")
                    }
                }
            }
        })
        .into_owned()
}

/// Single full-document HTML-to-Markdown conversion: links, images,
/// emphasis, tables, lists, and code preserved; no line wrapping.
pub fn convert_html_to_markdown(html: &str) -> String {
    let mut text = html.to_string();

    // Shortcodes injected by earlier steps ({{< ... >}}) must survive
    // untouched. Every tag pattern here requires a slash or letter right
    // after `<`; the shortcode delimiters put a space there, so the tag
    // passes leave them alone. Keep that property when editing patterns.
    let noise = Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>")
        .expect("regex for script/style blocks");
    text = noise.replace_all(&text, "").into_owned();
    let comment = Regex::new(r"(?s)<!--.*?-->").expect("regex for comments");
    text = comment.replace_all(&text, "").into_owned();
    let doctype = Regex::new(r"(?i)<!DOCTYPE[^>]*>").expect("regex for doctype");
    text = doctype.replace_all(&text, "").into_owned();

    // Protect pre/code blocks before any other pass rewrites their content.
    let mut fences: Vec<String> = Vec::new();
    let pre = Regex::new(r"(?is)<pre([^>]*)>(.*?)</pre>").expect("regex for pre blocks");
    text = pre
        .replace_all(&text, |caps: &Captures| {
            let lang = code_language(&caps[0]);
            let inner = Regex::new(r"(?i)</?code[^>]*>")
                .expect("regex for code tags")
                .replace_all(&caps[2], "")
                .into_owned();
            let body = decode_entities(inner.trim_matches('\n'));
            fences.push(format!("```{lang}\n{body}\n```"));
            format!("\u{1}FENCE{}\u{1}", fences.len() - 1)
        })
        .into_owned();

    text = convert_tables(&text);
    text = convert_lists(&text);

    let heading = Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").expect("regex for headings");
    text = heading
        .replace_all(&text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n\n{} {}\n\n", "#".repeat(level), inline_to_markdown(&caps[2]))
        })
        .into_owned();

    for (pattern, replacement) in [
        (r"(?i)<p[^>]*>", "\n\n"),
        (r"(?i)</p>", "\n\n"),
        (r"(?i)<br\s*/?>", "\n"),
        (r"(?i)<hr\s*/?>", "\n\n---\n\n"),
        (r"(?i)<blockquote[^>]*>", "\n\n> "),
        (r"(?i)</blockquote>", "\n\n"),
        (r"(?i)</?(div|section|article|main|span|center)[^>]*>", "\n"),
    ] {
        text = Regex::new(pattern)
            .expect("regex for block tag")
            .replace_all(&text, replacement)
            .into_owned();
    }

    text = inline_to_markdown(&text);

    // Collapse runs of blank lines introduced by tag removal.
    let squeeze = Regex::new(r"\n{3,}").expect("regex for blank runs");
    text = squeeze.replace_all(&text, "\n\n").into_owned();
    let trailing = Regex::new(r"(?m)[ \t]+$").expect("regex for trailing spaces");
    text = trailing.replace_all(&text, "").into_owned();

    for (i, fence) in fences.iter().enumerate() {
        text = text.replace(&format!("\u{1}FENCE{i}\u{1}"), fence);
    }

    text.trim_matches('\n').to_string() + "\n"
}

fn code_language(pre_tag: &str) -> String {
    let lang = Regex::new(r#"class="[^"]*language-([A-Za-z0-9]+)"#)
        .expect("regex for code language");
    lang.captures(pre_tag)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

fn convert_tables(text: &str) -> String {
    let table = Regex::new(r"(?is)<table[^>]*>(.*?)</table>").expect("regex for tables");
    let row = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("regex for table rows");
    let cell = Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").expect("regex for table cells");

    table
        .replace_all(text, |caps: &Captures| {
            let mut out = String::from("\n\n");
            let mut first = true;
            for row_caps in row.captures_iter(&caps[1]) {
                let cells: Vec<String> = cell
                    .captures_iter(&row_caps[1])
                    .map(|c| inline_to_markdown(&c[1]).replace('\n', " ").trim().to_string())
                    .collect();
                if cells.is_empty() {
                    continue;
                }
                out.push_str(&cells.join(" | "));
                out.push('\n');
                if first {
                    out.push_str(&vec!["---"; cells.len()].join("|"));
                    out.push('\n');
                    first = false;
                }
            }
            out.push('\n');
            out
        })
        .into_owned()
}

fn convert_lists(text: &str) -> String {
    let tag = Regex::new(r"(?is)</?(ul|ol|li)[^>]*>").expect("regex for list tags");
    let mut stack: Vec<(bool, usize)> = Vec::new(); // (ordered, counter)
    tag.replace_all(text, |caps: &Captures| {
        let raw = caps[0].to_lowercase();
        if raw.starts_with("<ul") {
            stack.push((false, 0));
            "\n".to_string()
        } else if raw.starts_with("<ol") {
            stack.push((true, 0));
            "\n".to_string()
        } else if raw.starts_with("</ul") || raw.starts_with("</ol") {
            stack.pop();
            "\n".to_string()
        } else if raw.starts_with("<li") {
            let depth = stack.len().max(1);
            let indent = "  ".repeat(depth);
            match stack.last_mut() {
                Some((true, counter)) => {
                    *counter += 1;
                    format!("\n{indent}{}. ", counter)
                }
                _ => format!("\n{indent}* "),
            }
        } else {
            // </li>
            String::new()
        }
    })
    .into_owned()
}

/// Inline conversion shared by headings, table cells, and the final pass:
/// images, links, emphasis, inline code, then tag stripping and entities.
pub fn inline_to_markdown(fragment: &str) -> String {
    let mut text = fragment.to_string();

    let img = Regex::new(r"(?is)<img[^>]*>").expect("regex for images");
    text = img
        .replace_all(&text, |caps: &Captures| {
            let tag = &caps[0];
            let src = attr_value(tag, "src").unwrap_or_default();
            let alt = attr_value(tag, "alt").unwrap_or_default();
            format!("![{alt}]({src})")
        })
        .into_owned();

    let link = Regex::new(r#"(?is)<a\s[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .expect("regex for links");
    text = link
        .replace_all(&text, |caps: &Captures| {
            let inner = inline_to_markdown(&caps[2]);
            if inner.trim().is_empty() {
                String::new()
            } else {
                format!("[{}]({})", inner.trim(), &caps[1])
            }
        })
        .into_owned();
    // Anchor-only links (<a id="x"></a>) carry no href and render to nothing.
    let anchor = Regex::new(r"(?is)<a\s[^>]*>(.*?)</a>").expect("regex for anchors");
    text = anchor.replace_all(&text, "$1").into_owned();

    for (pattern, replacement) in [
        (r"(?is)<(?:b|strong)[^>]*>(.*?)</(?:b|strong)>", "**$1**"),
        (r"(?is)<(?:i|em)[^>]*>(.*?)</(?:i|em)>", "*$1*"),
        (r"(?is)<(?:code|tt)[^>]*>(.*?)</(?:code|tt)>", "`$1`"),
    ] {
        text = Regex::new(pattern)
            .expect("regex for inline markup")
            .replace_all(&text, replacement)
            .into_owned();
    }

    let tags = Regex::new(r"(?s)</?[A-Za-z][^>]*>").expect("regex for residual tags");
    text = tags.replace_all(&text, "").into_owned();

    decode_entities(&text)
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&mdash;", "\u{2014}")
        .replace("&ndash;", "\u{2013}")
        .replace("&hellip;", "\u{2026}")
        .replace("&copy;", "\u{a9}")
        .replace("&amp;", "&")
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"(?i){name}="([^"]*)""#);
    Regex::new(&pattern)
        .expect("regex for attribute value")
        .captures(tag)
        .map(|caps| caps[1].to_string())
}

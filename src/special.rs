//! Special-file processors: targeted extractors for documents that do not
//! fit the page pipeline (contributor rosters, testimonial data, the blog
//! digest, the CVE list).
//!
//! Uniform shape: each processor takes the raw content and the output root
//! and owns its output location and format. A missing input file is not a
//! failure; an unregistered processor name is.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::rules::SpecialFileSpec;
use crate::util::slugify;

/// Dispatch one configured special file. Boundary for per-file failures.
pub fn process_special_file(spec: &SpecialFileSpec, input_root: &Path, output_root: &Path) -> bool {
    let input_file = input_root.join(&spec.file);
    if !input_file.is_file() {
        tracing::warn!(
            target: "site2md::special",
            "special file not found: {} (optional, skipping)",
            input_file.display()
        );
        return true;
    }
    let result = fs::read_to_string(&input_file)
        .with_context(|| format!("reading {}", input_file.display()))
        .and_then(|content| {
            let stem = Path::new(&spec.file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| spec.file.clone());
            match spec.processor.as_str() {
                "contributors" => contributors(&content, output_root, &stem),
                "testimonials" => testimonials(&content, output_root),
                "blog" => blog_digest(&content, output_root),
                "cve" => cve_list(&content, output_root, &stem),
                other => Err(anyhow!("no processor registered for: {other}")),
            }
        });
    match result {
        Ok(()) => {
            tracing::info!(
                target: "site2md::special",
                "processed special file {} with {}",
                spec.file,
                spec.processor
            );
            true
        }
        Err(err) => {
            tracing::error!(
                target: "site2md::special",
                "failed to process special file {}: {err:#}",
                spec.file
            );
            false
        }
    }
}

#[derive(Debug, Serialize)]
struct Contributor {
    image: String,
    name: String,
    title: String,
    #[serde(rename = "linkedIn")]
    linked_in: Option<String>,
    twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    github: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mastodon: Option<String>,
}

/// Parse the contributor roster table into `data/<stem>.json`.
///
/// The table layout is positional: an image cell followed by a name cell,
/// then username and title lines, then zero or more social-link lines until
/// the next image row.
fn contributors(content: &str, output_root: &Path, stem: &str) -> Result<()> {
    let data_dir = output_root.join("data");
    fs::create_dir_all(&data_dir)?;

    let lines: Vec<&str> = content.lines().collect();
    let mut roster: Vec<Contributor> = Vec::new();
    let mut i = 0;
    while i + 2 < lines.len() {
        let line = lines[i].trim();
        if !line.starts_with("![](") {
            i += 1;
            continue;
        }
        let mut cells = line.split('|');
        let image = cells
            .next()
            .unwrap_or_default()
            .trim()
            .trim_start_matches("![](")
            .trim_end_matches(')')
            .to_string();
        let name = cells.next().unwrap_or_default().trim().to_string();
        // Username line is informational only; the title follows it.
        let title = lines[i + 2].trim().to_string();

        let mut entry = Contributor {
            image: format!("/{image}"),
            name,
            title,
            linked_in: None,
            twitter: None,
            github: None,
            website: None,
            mastodon: None,
        };

        let mut j = i + 3;
        while j < lines.len() && !lines[j].trim().starts_with("![](") {
            let link_line = lines[j].trim();
            if let Some(url) = link_target(link_line) {
                if link_line.contains("[/in/") {
                    entry.linked_in = Some(url);
                } else if link_line.contains("[@") && link_line.contains("hachyderm.io") {
                    entry.mastodon = Some(url);
                } else if link_line.contains("[@") {
                    entry.twitter = Some(url);
                } else if link_line.contains("[github.com/") {
                    entry.github = Some(url);
                } else if !link_line.contains("/in/") && !link_line.contains("github") {
                    entry.website = Some(url);
                }
            }
            j += 1;
            if link_line.is_empty() || link_line == "---|---|---|---" {
                break;
            }
        }
        roster.push(entry);
        i = j;
    }

    let output_file = data_dir.join(format!("{stem}.json"));
    fs::write(&output_file, serde_json::to_string_pretty(&roster)?)?;
    tracing::info!(
        target: "site2md::special",
        "wrote {} with {} entries",
        output_file.display(),
        roster.len()
    );
    Ok(())
}

fn link_target(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("](")?;
    let (url, _) = rest.split_once(')')?;
    Some(url.to_string())
}

/// Extract the testimonial array literal from the page's script block and
/// rewrite it as `data/testimonials.json`.
fn testimonials(content: &str, output_root: &Path) -> Result<()> {
    let data_dir = output_root.join("data");
    fs::create_dir_all(&data_dir)?;

    let script_start = content
        .find("<script>")
        .ok_or_else(|| anyhow!("no script block found"))?;
    let script_end = content[script_start..]
        .find("</script>")
        .map(|off| script_start + off)
        .ok_or_else(|| anyhow!("unterminated script block"))?;
    let script = &content[script_start..script_end];

    let decl = Regex::new(r"var\s+\w+\s*=\s*\[").expect("regex for array declaration");
    let m = decl
        .find(script)
        .ok_or_else(|| anyhow!("no array declaration found in script block"))?;
    let array_start = m.end() - 1;
    let array = extract_bracketed(&script[array_start..])
        .ok_or_else(|| anyhow!("no matching closing bracket for the array"))?;

    // Attribute values inside embedded HTML use unescaped double quotes,
    // which breaks the JSON string they live in. Flip them to single quotes.
    let repaired = flip_quotes_in_tags(array);

    let output_file = data_dir.join("testimonials.json");
    match serde_json::from_str::<serde_json::Value>(&repaired) {
        Ok(value) => {
            fs::write(&output_file, serde_json::to_string_pretty(&value)?)?;
            tracing::info!(
                target: "site2md::special",
                "wrote {}",
                output_file.display()
            );
        }
        Err(err) => {
            tracing::warn!(
                target: "site2md::special",
                "testimonial array did not parse ({err}), writing raw content"
            );
            fs::write(&output_file, repaired)?;
        }
    }
    Ok(())
}

/// Span from the leading `[` to its balanced closing `]`, inclusive.
fn extract_bracketed(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (idx, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn flip_quotes_in_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(c);
            }
            '>' => {
                in_tag = false;
                out.push(c);
            }
            '"' if in_tag => out.push('\''),
            _ => out.push(c),
        }
    }
    out
}

/// Fallbacks when a post's first line carries no recognizable byline.
pub const FALLBACK_POST_DATE: &str = "1970-01-01";
pub const FALLBACK_POST_AUTHOR: &str = "Unknown";

struct BlogPost {
    title: String,
    date: String,
    author: String,
    body: String,
}

/// Split the blog digest at top-level headings into one document per
/// release post, plus a section index.
fn blog_digest(content: &str, output_root: &Path) -> Result<()> {
    let blog_dir = output_root.join("content/en/blog");
    fs::create_dir_all(&blog_dir)?;

    let mut posts: Vec<BlogPost> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in content.lines() {
        if let Some(text) = line.strip_prefix("# ") {
            if let Some((title, body)) = current.take() {
                posts.push(finish_post(title, &body));
            }
            current = Some((text.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((title, body)) = current.take() {
        posts.push(finish_post(title, &body));
    }

    fs::write(
        blog_dir.join("_index.md"),
        "---\ntitle: \"Blog\"\ntype: blog\n---\n",
    )?;
    for (idx, post) in posts.iter().enumerate() {
        let file_name = format!("{}.md", slugify(&post.title));
        let front_matter = format!(
            "---\ntitle: \"{}\"\ndate: {}\nauthor: {}\nweight: {}\ntype: blog\n---\n",
            post.title,
            post.date,
            post.author,
            idx + 1
        );
        fs::write(
            blog_dir.join(&file_name),
            format!("{front_matter}\n{}", post.body),
        )?;
    }
    tracing::info!(
        target: "site2md::special",
        "wrote {} blog posts to {}",
        posts.len(),
        blog_dir.display()
    );
    Ok(())
}

fn finish_post(title: String, body: &[&str]) -> BlogPost {
    let mut date = FALLBACK_POST_DATE.to_string();
    let mut author = FALLBACK_POST_AUTHOR.to_string();
    let mut byline_idx: Option<usize> = None;

    for (idx, line) in body.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some((d, a)) = parse_byline(line) {
            date = d;
            author = a;
            byline_idx = Some(idx);
        }
        break;
    }

    let body: String = body
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != byline_idx)
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n");
    BlogPost {
        title,
        date,
        author,
        body: body.trim_start_matches('\n').to_string(),
    }
}

/// Byline forms: "21 March 2025 - Jane Doe" or "March 21, 2025 - Jane Doe",
/// possibly wrapped in emphasis markers or a Markdown link.
fn parse_byline(line: &str) -> Option<(String, String)> {
    let link = Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("regex for markdown links");
    let plain = link.replace_all(line, "$1");
    let plain = plain.trim().trim_matches(['*', '_', ' ']);

    let (date_part, author_part) = match plain.split_once(" - ") {
        Some((d, a)) => (d.trim(), a.trim()),
        None => (plain, ""),
    };
    for format in ["%d %B %Y", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            let author = if author_part.is_empty() {
                FALLBACK_POST_AUTHOR.to_string()
            } else {
                author_part.to_string()
            };
            return Some((date.format("%Y-%m-%d").to_string(), author));
        }
    }
    None
}

/// Restructure the CVE list: fresh title, headings shifted up one level,
/// anchor IDs injected on headings naming a CVE identifier.
fn cve_list(content: &str, output_root: &Path, stem: &str) -> Result<()> {
    let community_dir = output_root.join("content/en/community");
    fs::create_dir_all(&community_dir)?;

    let heading = Regex::new(r"(?m)^(#{1,6})\s*(.*)$").expect("regex for heading lines");
    let cve_id = Regex::new(r"CVE-\d{4}-\d+").expect("regex for CVE identifiers");
    let body = heading.replace_all(content, |caps: &regex::Captures| {
        let level = caps[1].len().saturating_sub(1).max(1);
        let text = caps[2].trim();
        match cve_id.find(text) {
            Some(m) => format!(
                "{} {} {{#{}}}",
                "#".repeat(level),
                text,
                m.as_str().to_lowercase()
            ),
            None => format!("{} {}", "#".repeat(level), text),
        }
    });

    let output_file = community_dir.join(format!("{stem}.md"));
    let front_matter = "---\ntitle: \"CVE list\"\ntype: docs\n---\n";
    fs::write(&output_file, format!("{front_matter}\n{body}"))?;
    tracing::info!(
        target: "site2md::special",
        "wrote {}",
        output_file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(file: &str, processor: &str) -> SpecialFileSpec {
        SpecialFileSpec {
            file: file.to_string(),
            processor: processor.to_string(),
            input_dir: "interim".to_string(),
        }
    }

    #[test]
    fn missing_input_file_is_not_a_failure() {
        let ws = TempDir::new().expect("tempdir");
        assert!(process_special_file(
            &spec("absent.md", "contributors"),
            ws.path(),
            ws.path()
        ));
    }

    #[test]
    fn unknown_processor_name_is_a_failure() {
        let ws = TempDir::new().expect("tempdir");
        fs::write(ws.path().join("roster.md"), "content").expect("fixture");
        assert!(!process_special_file(
            &spec("roster.md", "nonsense"),
            ws.path(),
            ws.path()
        ));
    }

    #[test]
    fn contributor_entries_keep_nullable_social_fields() {
        let ws = TempDir::new().expect("tempdir");
        let content = "\
# The committers

![](images/jane.jpg) | Jane Doe
janed
Committer
[/in/janed](https://example.com/in/janed)
[github.com/janed](https://github.com/janed)

![](images/sam.jpg) | Sam Roe
samr
PMC member
";
        fs::write(ws.path().join("roster.md"), content).expect("fixture");
        assert!(process_special_file(
            &spec("roster.md", "contributors"),
            ws.path(),
            ws.path()
        ));

        let json = fs::read_to_string(ws.path().join("data/roster.json")).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        let roster = value.as_array().expect("array");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0]["image"], "/images/jane.jpg");
        assert_eq!(roster[0]["name"], "Jane Doe");
        assert_eq!(roster[0]["title"], "Committer");
        assert_eq!(roster[0]["linkedIn"], "https://example.com/in/janed");
        assert_eq!(roster[0]["github"], "https://github.com/janed");
        // Absent nullable fields stay present as null; optional ones vanish.
        assert!(roster[1]["linkedIn"].is_null());
        assert!(roster[1].get("github").is_none());
    }

    #[test]
    fn testimonials_repair_embedded_attribute_quotes() {
        let ws = TempDir::new().expect("tempdir");
        let content = r#"<html><script>
var poweredByItems = [
  {"name": "Acme", "description": "Uses <a href="https://acme.example">streams</a> heavily."}
];
</script></html>"#;
        fs::write(ws.path().join("powered-by.html"), content).expect("fixture");
        assert!(process_special_file(
            &spec("powered-by.html", "testimonials"),
            ws.path(),
            ws.path()
        ));

        let json = fs::read_to_string(ws.path().join("data/testimonials.json")).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value[0]["name"], "Acme");
        assert!(value[0]["description"]
            .as_str()
            .expect("string")
            .contains("href='https://acme.example'"));
    }

    #[test]
    fn blog_digest_splits_posts_and_extracts_bylines() {
        let ws = TempDir::new().expect("tempdir");
        let content = "\
# Release 3.9.0

_21 March 2025 - Jane Doe_

Highlights of the release.

# Release 3.8.0

No byline here, just notes.
";
        fs::write(ws.path().join("blog.md"), content).expect("fixture");
        assert!(process_special_file(
            &spec("blog.md", "blog"),
            ws.path(),
            ws.path()
        ));

        let blog_dir = ws.path().join("content/en/blog");
        assert!(blog_dir.join("_index.md").is_file());

        let first = fs::read_to_string(blog_dir.join("release-3.9.0.md")).expect("post");
        assert!(first.contains("title: \"Release 3.9.0\""));
        assert!(first.contains("date: 2025-03-21"));
        assert!(first.contains("author: Jane Doe"));
        assert!(first.contains("weight: 1"));
        assert!(first.contains("Highlights of the release."));
        assert!(!first.contains("21 March 2025 - Jane Doe"));

        let second = fs::read_to_string(blog_dir.join("release-3.8.0.md")).expect("post");
        assert!(second.contains(&format!("date: {FALLBACK_POST_DATE}")));
        assert!(second.contains(&format!("author: {FALLBACK_POST_AUTHOR}")));
        assert!(second.contains("weight: 2"));
    }

    #[test]
    fn cve_list_shifts_headings_and_injects_anchors() {
        let ws = TempDir::new().expect("tempdir");
        let content = "\
## Vulnerabilities

### CVE-2024-1234: Deserialization issue

Details.
";
        fs::write(ws.path().join("cve-list.md"), content).expect("fixture");
        assert!(process_special_file(
            &spec("cve-list.md", "cve"),
            ws.path(),
            ws.path()
        ));

        let out =
            fs::read_to_string(ws.path().join("content/en/community/cve-list.md")).expect("doc");
        assert!(out.contains("title: \"CVE list\""));
        assert!(out.contains("# Vulnerabilities"));
        assert!(out.contains("## CVE-2024-1234: Deserialization issue {#cve-2024-1234}"));
    }
}

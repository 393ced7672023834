use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const RULES: &str = r#"
doc_dirs: ["39"]
exclude_dirs: ["old"]
static_dirs: ["images"]
sections:
  - name: design
    title: Design
    strategy: arrange
    files:
      - src_file: design.md
        title: Design
special_files:
  - file: blog.md
    processor: blog
    input_dir: interim
validation:
  key_sections: ["design"]
"#;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write fixture");
}

fn run_site2md(workspace: &Path, rules: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_site2md"))
        .arg("--workspace")
        .arg(workspace)
        .arg("--rules")
        .arg(rules)
        .args(extra)
        .output()
        .expect("run site2md")
}

fn seed_workspace(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let rules = root.join("rules.yaml");
    fs::write(&rules, RULES).expect("rules");

    let workspace = root.join("workspace");
    let source = workspace.join("source");
    write(
        &source.join("39/design.html"),
        concat!(
            "<html><body>\n",
            "<script type=\"text/x-handlebars-template\">",
            "<p>Version {{version}}</p>",
            "</script>\n",
            "<h2>1.1 Design</h2>\n",
            "<p>See <a href=\"intro.html\">the intro</a> for context.</p>\n",
            "<!--#include virtual=\"includes/footer.html\" -->\n",
            "</body></html>\n",
        ),
    );
    write(
        &source.join("39/templateData.js"),
        "var context = {\"version\": \"3.9\"};",
    );
    write(&source.join("39/includes/footer.html"), "<p>Footer</p>");
    write(&source.join("39/images/logo.png"), "png-bytes");
    write(&source.join("old/stale.html"), "<p>stale</p>");
    write(
        &source.join("blog.md"),
        "# Release 3.9.0\n\n_21 March 2025 - Jane Doe_\n\nRelease notes.\n",
    );
    (workspace, rules)
}

#[test]
fn converts_a_source_tree_end_to_end() {
    let dir = TempDir::new().expect("tempdir");
    let (workspace, rules) = seed_workspace(dir.path());

    let output = run_site2md(&workspace, &rules, &[]);
    assert!(
        output.status.success(),
        "site2md failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // Excluded directories leave no trace in the interim tree.
    assert!(!workspace.join("interim/old").exists());

    // Static assets land under their version in the static root.
    assert!(workspace.join("output/static/39/images/logo.png").is_file());

    // The version index carries the numeral-grouped label.
    let version_index =
        fs::read_to_string(workspace.join("output/content/en/39/_index.md")).expect("index");
    assert!(version_index.contains("title: \"3.9.X\""));

    // The arranged section file: metadata block, bumped/denumbered heading,
    // expanded template, resolved include shortcode.
    let page = fs::read_to_string(workspace.join("output/content/en/39/design/design.md"))
        .expect("design page");
    assert!(page.starts_with("---\n"));
    assert!(page.contains("title: \"Design\""));
    assert!(page.contains("# Design"));
    assert!(!page.contains("1.1"));
    assert!(page.contains("Version 3.9"));
    assert!(page.contains("[the intro](intro.html)"));
    assert!(page.contains("{{< include file=\"includes/footer.md\" >}}"));

    // The blog digest fans out into dated, weighted posts.
    let post = fs::read_to_string(workspace.join("output/content/en/blog/release-3.9.0.md"))
        .expect("blog post");
    assert!(post.contains("date: 2025-03-21"));
    assert!(post.contains("author: Jane Doe"));
    assert!(post.contains("Release notes."));

    // Shadow redirects mirror the version tree and the latest version.
    let shadow = workspace.join("output/content/en/documentation/39/design/design.md");
    assert!(fs::read_to_string(shadow)
        .expect("shadow")
        .contains("layout: redirect"));
    assert!(workspace
        .join("output/content/en/documentation/design/design.md")
        .is_file());
}

#[test]
fn reruns_from_the_post_process_stage() {
    let dir = TempDir::new().expect("tempdir");
    let (workspace, rules) = seed_workspace(dir.path());

    let first = run_site2md(&workspace, &rules, &[]);
    assert!(first.status.success());

    // Drop a stale file into the section to prove the rerun resets it.
    write(
        &workspace.join("output/content/en/39/design/leftover.md"),
        "old",
    );
    let second = run_site2md(&workspace, &rules, &["--start-stage", "post-process"]);
    assert!(
        second.status.success(),
        "rerun failed: {}",
        String::from_utf8_lossy(&second.stderr)
    );
    assert!(!workspace
        .join("output/content/en/39/design/leftover.md")
        .exists());
    assert!(workspace
        .join("output/content/en/39/design/design.md")
        .is_file());
}

#[test]
fn missing_rules_seed_exits_nonzero() {
    let dir = TempDir::new().expect("tempdir");
    let output = run_site2md(
        &dir.path().join("workspace"),
        &dir.path().join("absent.yaml"),
        &[],
    );
    assert!(!output.status.success());
}

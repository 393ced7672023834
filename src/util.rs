use std::path::Path;

/// Derive a human title from a filename: `stream-processing.html` -> `Stream Processing`.
pub fn title_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filename-safe slug for a heading title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.trim().to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' | '.' => slug.push(ch),
            ' ' | '-' | '_' | '/' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {}
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_from_filenames() {
        assert_eq!(title_from_filename(Path::new("design.html")), "Design");
        assert_eq!(
            title_from_filename(Path::new("39/stream-processing.md")),
            "Stream Processing"
        );
    }

    #[test]
    fn slugs_are_filename_safe() {
        assert_eq!(slugify("Exactly Once Semantics"), "exactly-once-semantics");
        assert_eq!(slugify("  KRaft / Quorum  "), "kraft-quorum");
        assert_eq!(slugify("What's New?"), "whats-new");
    }
}

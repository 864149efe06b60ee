//! Subdomain normalization for free-form input

/// Character placed between words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Separator {
    #[default]
    Hyphen,
    Underscore,
}

impl Separator {
    pub fn as_char(&self) -> char {
        match self {
            Separator::Hyphen => '-',
            Separator::Underscore => '_',
        }
    }
}

/// Convert text to a slug usable as a subdomain and registry token.
///
/// Lowercases and trims, turns `/` into the separator, drops everything except
/// `a-z`, `0-9`, spaces, hyphens and underscores, then collapses runs of spaces
/// and runs of hyphens into a single separator. Leading and trailing hyphens
/// are removed.
pub fn slugify(text: &str, separator: Separator) -> String {
    let sep = separator.as_char();
    let lowered = text.to_lowercase();

    let kept: String = lowered
        .trim()
        .chars()
        .map(|c| if c == '/' { sep } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(*c, ' ' | '-' | '_'))
        .collect();

    let spaced = collapse_runs(&kept, ' ', sep);
    let hyphened = collapse_runs(&spaced, '-', sep);

    hyphened.trim_matches('-').to_string()
}

/// Replace every run of `target` with a single `replacement`
fn collapse_runs(s: &str, target: char, replacement: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c == target {
            if !in_run {
                out.push(replacement);
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

//! Filesystem naming: sanitization, length limits, template expansion.

use std::sync::LazyLock;

use regex::Regex;

static FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\<>:"|?*]"#).expect("static regex compiles"));

/// Replace filesystem-hostile characters with `_`, then trim trailing dots
/// and surrounding whitespace.
pub fn sanitize(name: &str) -> String {
    let replaced = FORBIDDEN.replace_all(name, "_");
    replaced.trim().trim_end_matches('.').trim_end().to_string()
}

/// Truncate to `max` characters, counted in codepoints.
pub fn limit_string(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        value.chars().take(max).collect()
    } else {
        value.to_string()
    }
}

/// Expand `{Token}` placeholders with their replacements.
pub fn apply_template(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (token, value) in pairs {
        out = out.replace(token, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_forbidden_characters() {
        assert_eq!(sanitize(r#"AC/DC: "Back" <in> Black?|*"#), "AC_DC_ _Back_ _in_ Black___");
        assert_eq!(sanitize("Name\\Path"), "Name_Path");
    }

    #[test]
    fn test_sanitize_trailing_dots_and_spaces() {
        assert_eq!(sanitize("Vol. 1..."), "Vol. 1");
        assert_eq!(sanitize("  spaced out . "), "spaced out");
        assert_eq!(sanitize("ok"), "ok");
    }

    #[test]
    fn test_limit_string_counts_codepoints() {
        assert_eq!(limit_string("abcdef", 4), "abcd");
        assert_eq!(limit_string("héllo wörld", 5), "héllo");
        assert_eq!(limit_string("ありがとうございます", 5), "ありがとう");
        assert_eq!(limit_string("short", 10), "short");
    }

    #[test]
    fn test_apply_template() {
        let out = apply_template(
            "{SongNumber}. {SongName} ({Quality})",
            &[
                ("{SongNumber}", "03"),
                ("{SongName}", "Glimpse of Us"),
                ("{Quality}", "24B-96.0kHz"),
            ],
        );
        assert_eq!(out, "03. Glimpse of Us (24B-96.0kHz)");
    }
}

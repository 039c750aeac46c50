//! Filename sanitization for titles coming from the metadata API.
//!
//! Titles become single path components: Unicode letters and digits survive
//! (Estonian õ/ä/ö/ü included), whitespace turns into `_`, and everything else
//! that could confuse a filesystem is dropped.

const FALLBACK_NAME: &str = "unnamed";

/// Normalize a title into a filesystem-safe slug.
///
/// 1. Keeps alphanumerics, `-` and `_`
/// 2. Collapses whitespace runs into a single `_`
/// 3. Drops every other character
/// 4. Collapses consecutive `_` and trims `_`/`-` from both ends
/// 5. Returns `"unnamed"` if nothing is left
///
/// ```
/// use jupiter_engine::filename::sanitize_component;
///
/// assert_eq!(sanitize_component("Piia seiklused"), "Piia_seiklused");
/// assert_eq!(sanitize_component("Õnne 13: osa 5/6"), "Õnne_13_osa_56");
/// assert_eq!(sanitize_component("???"), "unnamed");
/// ```
pub fn sanitize_component(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_underscore = false;

    for c in input.chars() {
        let mapped = if c.is_alphanumeric() || c == '-' {
            c
        } else if c == '_' || c.is_whitespace() {
            '_'
        } else {
            continue;
        };

        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        result.push(mapped);
    }

    let trimmed = result.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_becomes_single_underscore() {
        assert_eq!(sanitize_component("Piia  \t seiklused"), "Piia_seiklused");
    }

    #[test]
    fn punctuation_is_dropped() {
        assert_eq!(sanitize_component("Kes. Mida? Kus!"), "Kes_Mida_Kus");
        assert_eq!(sanitize_component("a/b\\c:d"), "abcd");
    }

    #[test]
    fn estonian_letters_survive() {
        assert_eq!(sanitize_component("Õnne tänav"), "Õnne_tänav");
    }

    #[test]
    fn dashes_and_underscores_kept_inside() {
        assert_eq!(sanitize_component("-ERR_uudised - 2024-"), "ERR_uudised_-_2024");
    }

    #[test]
    fn empty_results_fall_back() {
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component(" . "), "unnamed");
    }

    #[test]
    fn idempotent() {
        for input in ["Piia seiklused", "Õnne 13: osa 5/6", "  x__y  ", "???"] {
            let once = sanitize_component(input);
            assert_eq!(sanitize_component(&once), once, "input: {input}");
        }
    }
}

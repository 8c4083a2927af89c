//! Naming convention utilities
//!
//! Inflection (singular/plural) and case conversion shared by the
//! introspector, the dispatch engine and the CSV importer. Everything here is
//! a pure function over `&str`.
//!
//! Inflection works on the last camel-case segment of a word, so accessor
//! names inflect the way their property does:
//!
//! ```
//! use groundwork_common::naming::{singularize, pluralize};
//!
//! assert_eq!(singularize("GetOrders"), "GetOrder");
//! assert_eq!(singularize("Address"), "Address");
//! assert_eq!(pluralize("Category"), "Categories");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

/// Words with identical singular and plural forms
const UNINFLECTED: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "deer",
    "metadata",
    "feedback",
    "software",
];

/// Irregular (singular, plural) pairs
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("criterion", "criteria"),
    ("move", "moves"),
    ("sex", "sexes"),
];

/// Ordered plural rules; first match wins
static PLURAL_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile_rules(&[
        (r"(?i)(quiz)$", "${1}zes"),
        (r"(?i)^(ox)$", "${1}en"),
        (r"(?i)([ml])ouse$", "${1}ice"),
        (r"(?i)(matr|vert|ind)(ix|ex)$", "${1}ices"),
        (r"(?i)(alias|status|bus)$", "${1}es"),
        (r"(?i)(octop|vir)us$", "${1}i"),
        (r"(?i)(ax|test|cris)is$", "${1}es"),
        (r"(?i)(x|ch|ss|sh)$", "${1}es"),
        (r"(?i)([^aeiouy]|qu)y$", "${1}ies"),
        (r"(?i)(hive)$", "${1}s"),
        (r"(?i)(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
        (r"(?i)sis$", "ses"),
        (r"(?i)([ti])um$", "${1}a"),
        (r"(?i)(buffal|tomat|potat|her)o$", "${1}oes"),
        (r"(?i)s$", "s"),
        (r"$", "s"),
    ])
});

/// Ordered singular rules; first match wins
static SINGULAR_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile_rules(&[
        (r"(?i)(quiz)zes$", "${1}"),
        (r"(?i)(matr)ices$", "${1}ix"),
        (r"(?i)(vert|ind)ices$", "${1}ex"),
        (r"(?i)^(ox)en$", "${1}"),
        (r"(?i)(alias|status|bus)(es)?$", "${1}"),
        (r"(?i)(octop|vir)(us|i)$", "${1}us"),
        (r"(?i)(cris|ax|test)(is|es)$", "${1}is"),
        (r"(?i)(shoe)s$", "${1}"),
        (r"(?i)(buffal|tomat|potat|her)oes$", "${1}o"),
        (r"(?i)([ml])ice$", "${1}ouse"),
        (r"(?i)(x|ch|ss|sh)es$", "${1}"),
        (r"(?i)(m)ovies$", "${1}ovie"),
        (r"(?i)([^aeiouy]|qu)ies$", "${1}y"),
        (r"(?i)([lr])ves$", "${1}f"),
        (r"(?i)(tive|hive)s$", "${1}"),
        (r"(?i)([^f])ves$", "${1}fe"),
        (r"(?i)(analy|ba|diagno|parenthe|progno|synop|the)(sis|ses)$", "${1}sis"),
        (r"(?i)([ti])a$", "${1}um"),
        (r"(?i)(n)ews$", "${1}ews"),
        (r"(?i)(ss|us|is)$", "${1}"),
        (r"(?i)s$", ""),
    ])
});

fn compile_rules(rules: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    rules
        .iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|regex| (regex, *replacement))
        })
        .collect()
}

/// Split a word into (prefix, last camel-case segment)
///
/// The last segment starts at the last upper-case letter that follows a
/// lower-case letter or digit; words without such a boundary are one segment.
fn split_last_segment(word: &str) -> (&str, &str) {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    for pair in chars.windows(2).rev() {
        let (_, prev) = pair[0];
        let (index, current) = pair[1];
        if current.is_ascii_uppercase() && (prev.is_ascii_lowercase() || prev.is_ascii_digit()) {
            return word.split_at(index);
        }
    }
    ("", word)
}

/// Re-apply the case of `original`'s first letter to `inflected`
fn match_first_letter_case(original: &str, inflected: String) -> String {
    match original.chars().next() {
        Some(first) if first.is_uppercase() => capitalize(&inflected),
        _ => inflected,
    }
}

fn inflect(
    word: &str,
    irregular: impl Fn(&str) -> Option<&'static str>,
    rules: &[(Regex, &'static str)],
) -> String {
    let (prefix, segment) = split_last_segment(word);
    if segment.is_empty() {
        return word.to_string();
    }

    let lowered = segment.to_ascii_lowercase();
    if UNINFLECTED.contains(&lowered.as_str()) {
        return word.to_string();
    }

    if let Some(replacement) = irregular(&lowered) {
        let inflected = match_first_letter_case(segment, replacement.to_string());
        return format!("{}{}", prefix, inflected);
    }

    for (regex, replacement) in rules {
        if regex.is_match(segment) {
            let inflected = regex.replace(segment, *replacement).into_owned();
            let inflected = match_first_letter_case(segment, inflected);
            return format!("{}{}", prefix, inflected);
        }
    }

    word.to_string()
}

/// Singular form of a word (idempotent on singular input)
pub fn singularize(word: &str) -> String {
    inflect(
        word,
        |lowered| {
            IRREGULAR
                .iter()
                .find(|(singular, plural)| *plural == lowered || *singular == lowered)
                .map(|(singular, _)| *singular)
        },
        &SINGULAR_RULES,
    )
}

/// Plural form of a word
pub fn pluralize(word: &str) -> String {
    inflect(
        word,
        |lowered| {
            IRREGULAR
                .iter()
                .find(|(singular, plural)| *singular == lowered || *plural == lowered)
                .map(|(_, plural)| *plural)
        },
        &PLURAL_RULES,
    )
}

/// Exact suffix match; an empty needle always matches
pub fn ends_with(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.ends_with(needle)
}

/// Upper-case the first character
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lower-case the first character
pub fn lcfirst(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `firstName` -> `first_name`
pub fn to_snake_case(camel: &str) -> String {
    let mut result = String::with_capacity(camel.len() + 4);
    for (index, ch) in camel.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                result.push('_');
            }
            result.push(ch.to_ascii_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

/// `first_name` -> `firstName`
pub fn to_camel_case(snake: &str) -> String {
    let mut parts = snake.split('_');
    let mut result = parts.next().unwrap_or_default().to_string();
    for part in parts {
        result.push_str(&capitalize(part));
    }
    result
}

/// Lookup key of a property: singularized and capitalized (`orders` -> `Order`)
pub fn property_key(property: &str) -> String {
    singularize(&capitalize(property))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singularize_regular() {
        assert_eq!(singularize("orders"), "order");
        assert_eq!(singularize("Categories"), "Category");
        assert_eq!(singularize("Addresses"), "Address");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("knives"), "knife");
        assert_eq!(singularize("wolves"), "wolf");
        assert_eq!(singularize("statuses"), "status");
    }

    #[test]
    fn test_singularize_irregular_and_uninflected() {
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("People"), "Person");
        assert_eq!(singularize("children"), "child");
        assert_eq!(singularize("series"), "series");
        assert_eq!(singularize("sheep"), "sheep");
    }

    #[test]
    fn test_singularize_idempotent() {
        for word in ["Order", "Address", "Status", "Person", "Analysis", "Id", "Name", "IsArchive"] {
            let once = singularize(word);
            assert_eq!(singularize(&once), once, "singularize not idempotent for {}", word);
        }
        assert_eq!(singularize("Address"), "Address");
        assert_eq!(singularize("Status"), "Status");
    }

    #[test]
    fn test_singularize_last_camel_segment() {
        assert_eq!(singularize("GetOrders"), "GetOrder");
        assert_eq!(singularize("AddOrder"), "AddOrder");
        assert_eq!(singularize("getShippingAddresses"), "getShippingAddress");
        assert_eq!(singularize("GetPeople"), "GetPerson");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("order"), "orders");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("status"), "statuses");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("knife"), "knives");
        assert_eq!(pluralize("AddTag"), "AddTags");
    }

    #[test]
    fn test_ends_with() {
        assert!(ends_with("GetOrder", "Order"));
        assert!(!ends_with("GetOrder", "order"));
        assert!(ends_with("anything", ""));
        assert!(ends_with("", ""));
        assert!(!ends_with("Or", "Order"));
    }

    #[test]
    fn test_case_conversion_round_trip() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("isArchive"), "is_archive");
        assert_eq!(to_camel_case("first_name"), "firstName");
        assert_eq!(to_camel_case("name"), "name");

        for camel in ["firstName", "shippingAddressLine", "id", "isArchive"] {
            assert_eq!(to_camel_case(&to_snake_case(camel)), camel);
        }
        for snake in ["first_name", "shipping_address_line", "id"] {
            assert_eq!(to_snake_case(&to_camel_case(snake)), snake);
        }
    }

    #[test]
    fn test_property_key() {
        assert_eq!(property_key("orders"), "Order");
        assert_eq!(property_key("shippingAddress"), "ShippingAddress");
        assert_eq!(property_key("isArchive"), "IsArchive");
    }
}

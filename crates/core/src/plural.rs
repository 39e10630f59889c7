//! Naive English pluralization used as the last resort when the REST plural of a kind is
//! not known from schema metadata. The output is used verbatim as a URL path segment.
//!
//! Irregular plurals are guessed wrong (e.g. `Index` -> `indexes` is right by luck,
//! `Analysis` -> `analysises` is not); that is an accepted approximation.

const VOWELS: &[u8] = b"aeiou";

/// Lower-case `kind` and pluralize it.
pub fn plural_of(kind: &str) -> String {
    let noun = kind.to_lowercase();

    if ["s", "x", "z", "sh", "ch"].iter().any(|sfx| noun.ends_with(sfx)) {
        return noun + "es";
    }
    if let Some(stem) = noun.strip_suffix('y') {
        let vowel_before = stem.as_bytes().last().is_some_and(|c| VOWELS.contains(c));
        return if vowel_before { format!("{}s", noun) } else { format!("{}ies", stem) };
    }
    if let Some(stem) = noun.strip_suffix('f') {
        return format!("{}ves", stem);
    }
    if let Some(stem) = noun.strip_suffix("fe") {
        return format!("{}ves", stem);
    }
    if noun.ends_with('o') {
        return noun + "es";
    }
    noun + "s"
}

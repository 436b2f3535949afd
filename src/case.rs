//! Case conversion and pluralization for resource names: `BlogPost` -> `blog_post`, `blog-posts`, `BlogPosts`.

/// Irregular English plurals (lowercase singular, lowercase plural).
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("datum", "data"),
];

/// Words whose plural equals the singular.
const UNCOUNTABLE: &[&str] = &["data", "information", "equipment", "series", "species", "news", "metadata"];

/// Split an identifier into words at case boundaries, `_`, `-` and spaces.
/// Acronym runs stay together: "APIKey" -> ["API", "Key"], "CreatedByID" -> ["Created", "By", "ID"].
fn words(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Convert an identifier to snake_case.
/// e.g. "BlogPost" -> "blog_post", "CreatedByID" -> "created_by_id"
pub fn to_snake_case(s: &str) -> String {
    words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Convert an identifier to kebab-case.
/// e.g. "BlogPost" -> "blog-post"
pub fn to_kebab_case(s: &str) -> String {
    words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// True for identifiers of the form `[A-Z][A-Za-z0-9]*`.
pub fn is_pascal_case(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// Pluralize the last word of an identifier, keeping the casing of the input.
/// e.g. "Post" -> "Posts", "HistoryEntry" -> "HistoryEntries", "Address" -> "Addresses"
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let parts = words(word);
    let last = parts.last().map(String::as_str).unwrap_or(word);
    let head = &word[..word.len() - last.len()];
    let lower = last.to_lowercase();

    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return format!("{}{}", head, match_case(last, plural));
    }

    let mut out = String::with_capacity(word.len() + 2);
    out.push_str(word);
    let ends_with = |suffix: &str| lower.ends_with(suffix);
    if ends_with("s") || ends_with("x") || ends_with("z") || ends_with("ch") || ends_with("sh") {
        out.push_str("es");
    } else if ends_with("y") && !ends_with_vowel_y(&lower) {
        out.pop();
        out.push_str("ies");
    } else {
        out.push('s');
    }
    out
}

fn ends_with_vowel_y(lower: &str) -> bool {
    let mut rev = lower.chars().rev();
    rev.next();
    matches!(rev.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

/// Apply the leading-capital convention of `template` to a lowercase word.
fn match_case(template: &str, lower: &str) -> String {
    let capitalized = template.chars().next().map(char::is_uppercase).unwrap_or(false);
    if !capitalized {
        return lower.to_string();
    }
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

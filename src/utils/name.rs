use unicode_normalization::UnicodeNormalization;

/// Folds a display name into a storage-safe identifier: accents stripped,
/// anything outside `[a-zA-Z0-9]` collapsed into single underscores, trimmed
/// and lowercased.
///
/// `"OpenAI / GPT-4o"` becomes `"openai_gpt_4o"`.
pub fn normalize(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();

    let mut out = String::with_capacity(ascii.len());
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

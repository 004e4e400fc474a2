/// Language codes accepted by LibreTranslate-style endpoints
pub const LANGUAGES: [(&str, &str); 17] = [
    ("en", "English"),
    ("ru", "Русский"),
    ("es", "Español"),
    ("fr", "Français"),
    ("de", "Deutsch"),
    ("it", "Italiano"),
    ("pt", "Português"),
    ("nl", "Nederlands"),
    ("pl", "Polski"),
    ("zh", "中文"),
    ("ja", "日本語"),
    ("ko", "한국어"),
    ("ar", "العربية"),
    ("hi", "हिन्दी"),
    ("tr", "Türkçe"),
    ("sv", "Svenska"),
    ("ro", "Română"),
];

pub fn name_of(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// Expand a bare two-letter code into a locale tag (`ru` -> `ru-RU`)
pub fn locale_tag(code: &str) -> String {
    let code = code.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{}-{}", code.to_ascii_lowercase(), code.to_ascii_uppercase())
    } else {
        code.to_string()
    }
}

/// Locale to hand to a recognizer; `auto` has no locale of its own
pub fn recognition_locale(source: &str, fallback: &str) -> String {
    if source.trim().is_empty() || source.eq_ignore_ascii_case("auto") {
        fallback.to_string()
    } else {
        locale_tag(source)
    }
}

/// `pt-BR` -> `pt`
pub fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

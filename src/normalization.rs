use serde::{Deserialize, Deserializer};

/// Normalizes a name by stripping any surrounding whitespace and
/// decomposing it into Unicode Normalization Form D.
///
/// ```
/// use intern_tracker::normalization::normalize_name;
/// assert_eq!(normalize_name(" hï "), "hï");
/// ```
pub fn normalize_name(name: impl AsRef<str>) -> String {
    use unicode_normalization::UnicodeNormalization;

    name.as_ref().trim().nfd().to_string()
}

/// Normalizes a name for use as a lookup key: as [`normalize_name`],
/// then lowercased, so that `"Asha"` and `" asha "` collide.
pub fn normalize_key(name: impl AsRef<str>) -> String {
    normalize_name(name.as_ref().to_lowercase())
}

/// Deserializes an optional `String` after running it through `normalize_name`.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let o: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(o.map(normalize_name))
}

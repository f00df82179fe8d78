use serde::Deserialize;

/// `hours` is kept as text so that a malformed value is reported
/// against the field rather than as an unparseable query string.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub hours: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EligibilityQuery {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RaterQuery {
    #[serde(default)]
    pub rater: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    #[serde(default)]
    pub name: Option<String>,
}

use url::Url;
use uuid::Uuid;

/// Convenience wrapper for URL generation functions.
#[derive(Clone)]
pub struct Urls {
    /// Top-level URL, including trailing slash.
    base: Url,

    /// Single path segment under which every API route lives.
    pub(crate) api_path: String,
}

impl Urls {
    /// Create a new instance. `api_path` is a single segment without
    /// slashes, e.g. `api`.
    pub fn new(base: impl AsRef<str>, api_path: impl Into<String>) -> Self {
        let base =
            Url::parse(base.as_ref()).unwrap_or_else(|_| panic!("parse {} as URL", base.as_ref()));
        let api_path = api_path.into().trim_matches('/').to_owned();

        assert!(
            !api_path.is_empty() && !api_path.contains('/'),
            "API path {:?} must be a single path segment",
            api_path
        );

        Urls { base, api_path }
    }

    pub fn submission(&self, id: &Uuid) -> Url {
        self.resource("submissions", id)
    }

    pub fn project(&self, id: &Uuid) -> Url {
        self.resource("projects", id)
    }

    pub fn group(&self, id: &Uuid) -> Url {
        self.resource("groups", id)
    }

    fn resource(&self, collection: &str, id: &Uuid) -> Url {
        let path = format!("{}/{}/{}", self.api_path, collection, id);

        self.base
            .join(&path)
            .unwrap_or_else(|_| panic!("get URL for {}", path))
    }
}

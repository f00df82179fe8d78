use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::errors::BackendError;
use crate::validation::{in_range, required_text, required_timestamp};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A tracked internship project.
#[derive(Clone, Debug, Serialize)]
pub struct Project {
    /// The ID of the project.
    id: Uuid,

    #[serde(flatten)]
    details: ProjectDetails,

    /// The date and time it was created.
    #[serde(with = "time::serde::timestamp")]
    created_at: OffsetDateTime,
}

impl Project {
    pub fn new(id: Uuid, details: ProjectDetails, created_at: OffsetDateTime) -> Self {
        Project {
            id,
            details,
            created_at,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn details(&self) -> &ProjectDetails {
        &self.details
    }

    pub(crate) fn replace_details(&mut self, details: ProjectDetails) {
        self.details = details;
    }
}

/// The editable part of a project.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectDetails {
    pub(crate) name: String,

    pub(crate) description: String,

    #[serde(with = "time::serde::timestamp")]
    pub(crate) deadline: OffsetDateTime,

    /// Percent complete.
    pub(crate) progress: i16,

    pub(crate) links: Vec<ProjectLink>,
}

impl ProjectDetails {
    pub fn deadline(&self) -> OffsetDateTime {
        self.deadline
    }

    pub fn progress(&self) -> i16 {
        self.progress
    }

    pub fn links(&self) -> &[ProjectLink] {
        &self.links
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProjectLink {
    pub(crate) title: String,
    pub(crate) url: Url,
}

impl ProjectLink {
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// A project as returned to clients, with the time left until its
/// deadline.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    project: Project,

    /// Whole days until the deadline, rounded up; negative once overdue.
    days_remaining: i64,
}

impl ProjectView {
    pub fn new(project: Project, now: OffsetDateTime) -> Self {
        let days_remaining = days_remaining(project.details.deadline, now);

        ProjectView {
            project,
            days_remaining,
        }
    }
}

pub fn days_remaining(deadline: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let seconds = (deadline - now).whole_seconds();
    let days = seconds / SECONDS_PER_DAY;

    // integer division truncates towards zero, which is already the
    // ceiling for negative values
    if seconds % SECONDS_PER_DAY > 0 {
        days + 1
    } else {
        days
    }
}

/// The project form used both to create and to replace a project.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProjectForm {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// RFC 3339.
    #[serde(default)]
    pub deadline: Option<String>,

    #[serde(default)]
    pub progress: Option<i64>,

    #[serde(default)]
    pub links: Vec<LinkForm>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LinkForm {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

impl ProjectForm {
    pub fn validate(self) -> Result<ProjectDetails, BackendError> {
        let name = required_text("name", self.name)?;
        let description = self.description.map(|d| d.trim().to_owned()).unwrap_or_default();
        let deadline = required_timestamp("deadline", self.deadline)?;
        let progress = in_range("progress", self.progress.unwrap_or(0), 0..=100)?;

        let links = self
            .links
            .into_iter()
            .filter_map(LinkForm::complete)
            .map(|(title, url)| parse_link(title, url))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProjectDetails {
            name,
            description,
            deadline,
            progress,
            links,
        })
    }
}

impl LinkForm {
    /// Links lacking either a title or a URL are dropped.
    fn complete(self) -> Option<(String, String)> {
        let title = self.title.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty())?;
        let url = self.url.map(|u| u.trim().to_owned()).filter(|u| !u.is_empty())?;

        Some((title, url))
    }
}

fn parse_link(title: String, raw: String) -> Result<ProjectLink, BackendError> {
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| BackendError::invalid("links", format!("{} is not a URL ({})", with_scheme, e)))?;

    Ok(ProjectLink { title, url })
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::BackendError;
use crate::identity::IdentityKey;
use crate::normalization;
use crate::validation::{required_text, required_timestamp};

/// A single accepted activity submission. Never modified once stored.
#[derive(Clone, Debug, Serialize)]
pub struct ActivityRecord {
    /// The ID of the record.
    id: Uuid,

    /// The key the cool-down is tracked under.
    identity: IdentityKey,

    /// The name as submitted, after normalization.
    name: String,

    /// The branch the intern belongs to.
    branch: String,

    /// What the intern did.
    activities: String,

    /// The day the activities happened, as given by the intern.
    #[serde(with = "time::serde::timestamp")]
    date: OffsetDateTime,

    /// When the server accepted the submission.
    #[serde(with = "time::serde::timestamp")]
    created_at: OffsetDateTime,
}

impl ActivityRecord {
    pub fn new(id: Uuid, submission: NewSubmission) -> Self {
        let NewSubmission {
            identity,
            name,
            branch,
            activities,
            date,
            submitted_at,
        } = submission;

        ActivityRecord {
            id,
            identity,
            name,
            branch,
            activities,
            date,
            created_at: submitted_at,
        }
    }

    pub(crate) fn from_parts(
        id: Uuid,
        identity: IdentityKey,
        name: String,
        branch: String,
        activities: String,
        date: OffsetDateTime,
        created_at: OffsetDateTime,
    ) -> Self {
        ActivityRecord {
            id,
            identity,
            name,
            branch,
            activities,
            date,
            created_at,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn date(&self) -> OffsetDateTime {
        self.date
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

/// Submissions per branch, with the number of distinct interns behind them.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BranchCount {
    pub(crate) branch: String,
    pub(crate) interns: i64,
    pub(crate) submissions: i64,
}

impl BranchCount {
    pub fn new(branch: String, interns: i64, submissions: i64) -> Self {
        BranchCount {
            branch,
            interns,
            submissions,
        }
    }
}

/// The activity form as posted by the browser. Every field is optional
/// here so that a missing one produces a field-level error rather than
/// a generic deserialization failure.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubmissionForm {
    #[serde(default)]
    #[serde(deserialize_with = "normalization::deserialize_option")]
    pub name: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub activities: Option<String>,

    /// RFC 3339.
    #[serde(default)]
    pub date: Option<String>,
}

impl SubmissionForm {
    /// Checks the form and stamps it with the time the server received it.
    pub fn validate(self, submitted_at: OffsetDateTime) -> Result<NewSubmission, BackendError> {
        let name = required_text("name", self.name)?;
        let identity = IdentityKey::from_name(&name)?;
        let branch = required_text("branch", self.branch)?;
        let activities = required_text("activities", self.activities)?;
        let date = required_timestamp("date", self.date)?;

        Ok(NewSubmission {
            identity,
            name,
            branch,
            activities,
            date,
            submitted_at,
        })
    }
}

/// A validated submission awaiting admission.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub(crate) identity: IdentityKey,
    pub(crate) name: String,
    pub(crate) branch: String,
    pub(crate) activities: String,
    pub(crate) date: OffsetDateTime,
    pub(crate) submitted_at: OffsetDateTime,
}

impl NewSubmission {
    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn submitted_at(&self) -> OffsetDateTime {
        self.submitted_at
    }
}

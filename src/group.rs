//! Intern groups, their members and the peer ratings they collect.
//!
//! Each rater scores a group once per category; rating again replaces
//! the earlier scores. The summary shown for a group is a plain fold
//! over its ratings.

use std::cmp::Ordering;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::BackendError;
use crate::identity::IdentityKey;
use crate::normalization::normalize_name;
use crate::validation::{in_range, required_text};

/// The weight range every category score must fall in.
pub const SCORE_RANGE: RangeInclusive<i16> = 1..=5;

#[derive(Clone, Debug, Serialize)]
pub struct Group {
    /// The ID of the group.
    id: Uuid,

    /// The unique name of the group.
    name: String,

    /// The date and time it was created.
    #[serde(with = "time::serde::timestamp")]
    created_at: OffsetDateTime,
}

impl Group {
    pub fn new(id: Uuid, name: String, created_at: OffsetDateTime) -> Self {
        Group {
            id,
            name,
            created_at,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One rater's scores for a group.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Scores {
    pub(crate) communication: i16,
    pub(crate) teamwork: i16,
    pub(crate) technical: i16,
}

impl Scores {
    pub fn new(communication: i16, teamwork: i16, technical: i16) -> Self {
        Scores {
            communication,
            teamwork,
            technical,
        }
    }

    pub fn total(&self) -> i64 {
        i64::from(self.communication) + i64::from(self.teamwork) + i64::from(self.technical)
    }
}

/// Count, sum and mean of a group's ratings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RatingSummary {
    pub(crate) ratings: usize,
    pub(crate) total: i64,
    pub(crate) average: f64,
}

impl RatingSummary {
    /// Folds ratings into a summary; `average` is the mean total per
    /// rating, or zero when there are none.
    ///
    /// ```
    /// use intern_tracker::group::{RatingSummary, Scores};
    ///
    /// let summary = RatingSummary::reduce(&[Scores::new(5, 4, 3), Scores::new(1, 1, 1)]);
    /// assert_eq!(summary.total(), 15);
    /// assert_eq!(summary.average(), 7.5);
    /// ```
    pub fn reduce<'a>(scores: impl IntoIterator<Item = &'a Scores>) -> Self {
        let (ratings, total) = scores
            .into_iter()
            .fold((0, 0), |(count, total), s| (count + 1, total + s.total()));

        let average = if ratings == 0 {
            0.0
        } else {
            total as f64 / ratings as f64
        };

        RatingSummary {
            ratings,
            total,
            average,
        }
    }

    pub fn ratings(&self) -> usize {
        self.ratings
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn average(&self) -> f64 {
        self.average
    }
}

/// A stored group together with the scores of its ratings and its
/// members, ordered by key.
#[derive(Clone, Debug)]
pub struct GroupRecord {
    pub(crate) group: Group,
    pub(crate) scores: Vec<Scores>,
    pub(crate) members: Vec<IdentityKey>,
}

impl GroupRecord {
    pub fn new(group: Group, scores: Vec<Scores>, members: Vec<IdentityKey>) -> Self {
        GroupRecord {
            group,
            scores,
            members,
        }
    }

    /// A group nobody has joined or rated yet.
    pub fn empty(group: Group) -> Self {
        GroupRecord::new(group, Vec::new(), Vec::new())
    }
}

/// A group as returned to clients.
#[derive(Clone, Debug, Serialize)]
pub struct GroupView {
    #[serde(flatten)]
    group: Group,

    members: Vec<IdentityKey>,

    #[serde(flatten)]
    summary: RatingSummary,
}

impl GroupView {
    pub fn new(record: GroupRecord) -> Self {
        GroupView {
            summary: RatingSummary::reduce(&record.scores),
            group: record.group,
            members: record.members,
        }
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn members(&self) -> &[IdentityKey] {
        &self.members
    }

    pub fn summary(&self) -> &RatingSummary {
        &self.summary
    }
}

/// Orders groups best-rated first, then by name.
pub fn rank(views: &mut [GroupView]) {
    views.sort_by(|a, b| {
        b.summary
            .average
            .partial_cmp(&a.summary.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.group.name.cmp(&b.group.name))
    });
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GroupForm {
    #[serde(default)]
    pub name: Option<String>,
}

impl GroupForm {
    pub fn validate(self) -> Result<String, BackendError> {
        required_text("name", self.name.map(normalize_name))
    }
}

/// Names the intern joining a group.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemberForm {
    #[serde(default)]
    pub name: Option<String>,
}

impl MemberForm {
    pub fn validate(self) -> Result<IdentityKey, BackendError> {
        IdentityKey::from_name(self.name.unwrap_or_default())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RatingForm {
    /// The display name of whoever is rating.
    #[serde(default)]
    pub rater: Option<String>,

    #[serde(default)]
    pub communication: Option<i64>,

    #[serde(default)]
    pub teamwork: Option<i64>,

    #[serde(default)]
    pub technical: Option<i64>,
}

/// A validated rating.
#[derive(Clone, Debug)]
pub struct NewRating {
    pub(crate) rater: IdentityKey,
    pub(crate) scores: Scores,
}

impl RatingForm {
    pub fn validate(self) -> Result<NewRating, BackendError> {
        let rater = self.rater.ok_or(BackendError::MissingField { field: "rater" })?;
        let rater = IdentityKey::from_name(rater).map_err(|_| BackendError::MissingField { field: "rater" })?;

        let score = |field: &'static str, value: Option<i64>| -> Result<i16, BackendError> {
            let value = value.ok_or(BackendError::MissingField { field })?;
            in_range(field, value, SCORE_RANGE)
        };

        Ok(NewRating {
            rater,
            scores: Scores {
                communication: score("communication", self.communication)?,
                teamwork: score("teamwork", self.teamwork)?,
                technical: score("technical", self.technical)?,
            },
        })
    }
}

use serde::Serialize;
use warp::reject;

use crate::errors::BackendError;
use crate::timestamp::ceil_unix_timestamp;

#[derive(Debug)]
pub struct Rejection {
    pub(crate) context: Context,
    pub(crate) error: BackendError,
}

impl Rejection {
    pub fn new(context: Context, error: BackendError) -> Self {
        Rejection { context, error }
    }

    pub fn flatten(&self) -> FlattenedRejection {
        let next_eligible_time = match self.error {
            BackendError::CoolDownActive { next_eligible_time } => {
                Some(ceil_unix_timestamp(next_eligible_time))
            }
            _ => None,
        };

        FlattenedRejection {
            context: self.context.clone(),
            message: format!("{}", self.error),
            field: self.error.field(),
            next_eligible_time,
        }
    }
}

impl reject::Reject for Rejection {}

#[derive(Debug, Serialize)]
pub struct FlattenedRejection {
    #[serde(flatten)]
    pub(crate) context: Context,
    pub(crate) message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) field: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) next_eligible_time: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Context {
    Branches,
    Count,
    CreateGroup { name: Option<String> },
    CreateProject,
    DeleteGroup { id: String },
    DeleteProject { id: String },
    Eligibility { name: Option<String> },
    Group { id: String },
    Groups,
    JoinGroup { id: String },
    LeaveGroup { id: String, name: Option<String> },
    Project { id: String },
    Projects,
    Rate { id: String },
    Recent { hours: Option<String> },
    RemoveRating { id: String, rater: Option<String> },
    Submission { id: String },
    Submissions,
    Submit { name: Option<String> },
    UpdateProject { id: String },
}

impl Context {
    pub fn branches() -> Context {
        Context::Branches
    }

    pub fn count() -> Context {
        Context::Count
    }

    pub fn create_group(name: Option<String>) -> Context {
        Context::CreateGroup { name }
    }

    pub fn create_project() -> Context {
        Context::CreateProject
    }

    pub fn delete_group(id: String) -> Context {
        Context::DeleteGroup { id }
    }

    pub fn delete_project(id: String) -> Context {
        Context::DeleteProject { id }
    }

    pub fn eligibility(name: Option<String>) -> Context {
        Context::Eligibility { name }
    }

    pub fn group(id: String) -> Context {
        Context::Group { id }
    }

    pub fn groups() -> Context {
        Context::Groups
    }

    pub fn join_group(id: String) -> Context {
        Context::JoinGroup { id }
    }

    pub fn leave_group(id: String, name: Option<String>) -> Context {
        Context::LeaveGroup { id, name }
    }

    pub fn project(id: String) -> Context {
        Context::Project { id }
    }

    pub fn projects() -> Context {
        Context::Projects
    }

    pub fn rate(id: String) -> Context {
        Context::Rate { id }
    }

    pub fn recent(hours: Option<String>) -> Context {
        Context::Recent { hours }
    }

    pub fn remove_rating(id: String, rater: Option<String>) -> Context {
        Context::RemoveRating { id, rater }
    }

    pub fn submission(id: String) -> Context {
        Context::Submission { id }
    }

    pub fn submissions() -> Context {
        Context::Submissions
    }

    pub fn submit(name: Option<String>) -> Context {
        Context::Submit { name }
    }

    pub fn update_project(id: String) -> Context {
        Context::UpdateProject { id }
    }
}

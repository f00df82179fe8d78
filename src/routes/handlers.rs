use std::time::{Duration as StdDuration, Instant};

use log::{debug, o, Logger};
use time::Duration;
use uuid::Uuid;
use warp::{
    http::StatusCode,
    reject,
    reply::{json, with_header, with_status, Reply},
};

use crate::environment::{Config, Environment};
use crate::errors::BackendError;
use crate::gate::Admission;
use crate::group::{rank, GroupForm, GroupRecord, GroupView, MemberForm, RatingForm};
use crate::identity::IdentityKey;
use crate::project::{ProjectForm, ProjectView};
use crate::routes::{
    query::{EligibilityQuery, MemberQuery, RaterQuery, RecentQuery},
    rejection::{Context, Rejection},
    response::SuccessResponse,
};
use crate::submission::SubmissionForm;
use crate::timestamp::ceil_unix_timestamp;

const SERVER_TIMING_HEADER: &str = "server-timing";
const BEARER_PREFIX: &str = "Bearer ";

/// Longest look-back accepted for the recent submissions listing.
const MAX_RECENT_HOURS: i64 = 24 * 366;

type RouteResult = Result<Box<dyn Reply>, reject::Rejection>;

macro_rules! timed {
    ($($expression:stmt);+) => {
        let start = Instant::now();

        // TODO when `try` blocks are stabilized, we can wrap the body
        // and return the headers even on errors
        let result = { $($expression)+ };

        Ok(Box::new(with_header(
            result,
            SERVER_TIMING_HEADER,
            format_server_timing(start.elapsed()),
        )) as Box<dyn Reply>)
    };
}

pub async fn submit(environment: Environment, form: SubmissionForm) -> RouteResult {
    timed! {
        let name = form.name.clone();
        let error_handler = |e: BackendError| Rejection::new(Context::submit(name.clone()), e);

        let submission = form
            .validate(environment.clock.now())
            .map_err(error_handler)?;
        let logger = environment
            .logger
            .new(o!("identity" => submission.identity().to_string()));

        debug!(logger, "Admitting submission...");
        let record = environment
            .gatekeeper
            .submit(&logger, environment.db.as_ref(), submission)
            .await
            .map_err(error_handler)?;

        debug!(logger, "Submission accepted"; "id" => record.id().to_string());
        with_header(
            with_status(json(&record), StatusCode::CREATED),
            "location",
            environment.urls.submission(record.id()).as_str(),
        )
    }
}

pub async fn submissions(environment: Environment, authorization: Option<String>) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::submissions(), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let records = environment
            .db
            .retrieve_submissions(None)
            .await
            .map_err(error_handler)?;

        json(&records)
    }
}

pub async fn recent(
    environment: Environment,
    query: RecentQuery,
    authorization: Option<String>,
) -> RouteResult {
    timed! {
        let RecentQuery { hours } = query;
        let error_handler = |e: BackendError| Rejection::new(Context::recent(hours.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let window = recent_window(hours.as_deref(), environment.config.recent_window).map_err(error_handler)?;
        let since = environment.clock.now() - window;
        debug!(environment.logger, "Retrieving recent submissions..."; "since" => %since);

        let records = environment
            .db
            .retrieve_submissions(Some(since))
            .await
            .map_err(error_handler)?;

        json(&records)
    }
}

pub async fn submission(
    environment: Environment,
    id: String,
    authorization: Option<String>,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::submission(id.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let id = parse_id(&id).map_err(error_handler)?;
        let record = environment
            .db
            .retrieve_submission(&id)
            .await
            .map_err(error_handler)?
            .ok_or_else(|| error_handler(BackendError::NonExistentId(id)))?;

        json(&record)
    }
}

pub async fn count(environment: Environment) -> RouteResult {
    timed! {
        let count = environment
            .db
            .count_submissions()
            .await
            .map_err(|e: BackendError| Rejection::new(Context::count(), e))?;

        json(&SuccessResponse::Count(count))
    }
}

pub async fn branches(environment: Environment) -> RouteResult {
    timed! {
        let counts = environment
            .db
            .count_branches()
            .await
            .map_err(|e: BackendError| Rejection::new(Context::branches(), e))?;

        json(&counts)
    }
}

pub async fn eligibility(environment: Environment, query: EligibilityQuery) -> RouteResult {
    timed! {
        let EligibilityQuery { name } = query;
        let error_handler = |e: BackendError| Rejection::new(Context::eligibility(name.clone()), e);

        let identity = IdentityKey::from_name(name.clone().unwrap_or_default()).map_err(error_handler)?;

        let admission = environment
            .gatekeeper
            .eligibility(&identity, environment.clock.now(), environment.db.as_ref())
            .await
            .map_err(error_handler)?;

        let response = match admission {
            Admission::Accepted => SuccessResponse::Eligibility {
                eligible: true,
                next_eligible_time: None,
            },
            Admission::Rejected { next_eligible_time } => SuccessResponse::Eligibility {
                eligible: false,
                next_eligible_time: Some(ceil_unix_timestamp(next_eligible_time)),
            },
        };

        json(&response)
    }
}

pub async fn projects(environment: Environment) -> RouteResult {
    timed! {
        let projects = environment
            .db
            .retrieve_projects()
            .await
            .map_err(|e: BackendError| Rejection::new(Context::projects(), e))?;

        let now = environment.clock.now();
        let views: Vec<ProjectView> = projects.into_iter().map(|p| ProjectView::new(p, now)).collect();

        json(&views)
    }
}

pub async fn create_project(
    environment: Environment,
    authorization: Option<String>,
    form: ProjectForm,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::create_project(), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let details = form.validate().map_err(error_handler)?;
        let now = environment.clock.now();

        let project = environment
            .db
            .create_project(details, now)
            .await
            .map_err(error_handler)?;
        debug!(environment.logger, "Created project"; "id" => project.id().to_string());

        let location = environment.urls.project(project.id());

        with_header(
            with_status(json(&ProjectView::new(project, now)), StatusCode::CREATED),
            "location",
            location.as_str(),
        )
    }
}

pub async fn project(environment: Environment, id: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::project(id.clone()), e);

        let id = parse_id(&id).map_err(error_handler)?;
        let project = environment
            .db
            .retrieve_project(&id)
            .await
            .map_err(error_handler)?
            .ok_or_else(|| error_handler(BackendError::NonExistentId(id)))?;

        json(&ProjectView::new(project, environment.clock.now()))
    }
}

pub async fn update_project(
    environment: Environment,
    id: String,
    authorization: Option<String>,
    form: ProjectForm,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::update_project(id.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let id = parse_id(&id).map_err(error_handler)?;
        let details = form.validate().map_err(error_handler)?;
        debug!(environment.logger, "Updating project..."; "id" => id.to_string());

        let project = environment
            .db
            .update_project(&id, details)
            .await
            .map_err(error_handler)?
            .ok_or_else(|| error_handler(BackendError::NonExistentId(id)))?;

        json(&ProjectView::new(project, environment.clock.now()))
    }
}

pub async fn delete_project(
    environment: Environment,
    id: String,
    authorization: Option<String>,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::delete_project(id.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let id = parse_id(&id).map_err(error_handler)?;
        debug!(environment.logger, "Deleting project..."; "id" => id.to_string());

        environment.db.delete_project(&id).await.map_err(error_handler)?;

        StatusCode::NO_CONTENT
    }
}

pub async fn groups(environment: Environment) -> RouteResult {
    timed! {
        let groups = environment
            .db
            .retrieve_groups()
            .await
            .map_err(|e: BackendError| Rejection::new(Context::groups(), e))?;

        let mut views: Vec<GroupView> = groups.into_iter().map(GroupView::new).collect();
        rank(&mut views);

        json(&views)
    }
}

pub async fn create_group(
    environment: Environment,
    authorization: Option<String>,
    form: GroupForm,
) -> RouteResult {
    timed! {
        let requested = form.name.clone();
        let error_handler = |e: BackendError| Rejection::new(Context::create_group(requested.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let name = form.validate().map_err(error_handler)?;
        let group = environment
            .db
            .create_group(name, environment.clock.now())
            .await
            .map_err(error_handler)?;
        debug!(environment.logger, "Created group"; "id" => group.id().to_string());

        let location = environment.urls.group(group.id());

        with_header(
            with_status(json(&GroupView::new(GroupRecord::empty(group))), StatusCode::CREATED),
            "location",
            location.as_str(),
        )
    }
}

pub async fn group(environment: Environment, id: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::group(id.clone()), e);

        let id = parse_id(&id).map_err(error_handler)?;
        let view = retrieve_group_view(&environment, id).await.map_err(error_handler)?;

        json(&view)
    }
}

pub async fn delete_group(
    environment: Environment,
    id: String,
    authorization: Option<String>,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::delete_group(id.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let id = parse_id(&id).map_err(error_handler)?;
        debug!(environment.logger, "Deleting group..."; "id" => id.to_string());

        environment.db.delete_group(&id).await.map_err(error_handler)?;

        StatusCode::NO_CONTENT
    }
}

pub async fn join_group(environment: Environment, id: String, form: MemberForm) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::join_group(id.clone()), e);

        let id = parse_id(&id).map_err(error_handler)?;
        let member = form.validate().map_err(error_handler)?;
        debug!(environment.logger, "Joining group..."; "id" => id.to_string(), "member" => member.to_string());

        environment
            .db
            .join_group(&id, &member, environment.clock.now())
            .await
            .map_err(error_handler)?;

        let view = retrieve_group_view(&environment, id).await.map_err(error_handler)?;

        json(&view)
    }
}

pub async fn leave_group(environment: Environment, id: String, query: MemberQuery) -> RouteResult {
    timed! {
        let MemberQuery { name } = query;
        let error_handler = |e: BackendError| Rejection::new(Context::leave_group(id.clone(), name.clone()), e);

        let id = parse_id(&id).map_err(error_handler)?;
        let member = IdentityKey::from_name(name.clone().unwrap_or_default()).map_err(error_handler)?;
        debug!(environment.logger, "Leaving group..."; "id" => id.to_string(), "member" => member.to_string());

        environment
            .db
            .leave_group(&id, &member)
            .await
            .map_err(error_handler)?;

        StatusCode::NO_CONTENT
    }
}

pub async fn rate(environment: Environment, id: String, form: RatingForm) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::rate(id.clone()), e);

        let id = parse_id(&id).map_err(error_handler)?;
        let rating = form.validate().map_err(error_handler)?;
        let logger: Logger = environment
            .logger
            .new(o!("id" => id.to_string(), "rater" => rating.rater.to_string()));

        debug!(logger, "Rating group...");
        environment
            .db
            .rate_group(&id, rating, environment.clock.now())
            .await
            .map_err(error_handler)?;

        let view = retrieve_group_view(&environment, id).await.map_err(error_handler)?;

        json(&view)
    }
}

pub async fn remove_rating(
    environment: Environment,
    id: String,
    query: RaterQuery,
    authorization: Option<String>,
) -> RouteResult {
    timed! {
        let RaterQuery { rater } = query;
        let error_handler = |e: BackendError| Rejection::new(Context::remove_rating(id.clone(), rater.clone()), e);

        authorize(&environment.config, authorization.as_deref()).map_err(error_handler)?;

        let id = parse_id(&id).map_err(error_handler)?;
        let rater = IdentityKey::from_name(rater.clone().unwrap_or_default())
            .map_err(|_| error_handler(BackendError::MissingField { field: "rater" }))?;

        environment
            .db
            .remove_rating(&id, &rater)
            .await
            .map_err(error_handler)?;

        StatusCode::NO_CONTENT
    }
}

async fn retrieve_group_view(environment: &Environment, id: Uuid) -> Result<GroupView, BackendError> {
    let record = environment
        .db
        .retrieve_group(&id)
        .await?
        .ok_or(BackendError::NonExistentId(id))?;

    Ok(GroupView::new(record))
}

/// Accepts the request only if it carries `Authorization: Bearer
/// <admin token>`.
fn authorize(config: &Config, authorization: Option<&str>) -> Result<(), BackendError> {
    match authorization.and_then(|value| value.strip_prefix(BEARER_PREFIX)) {
        Some(token) if !config.admin_token.is_empty() && token.trim() == config.admin_token => {
            Ok(())
        }
        _ => Err(BackendError::Unauthorized),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, BackendError> {
    Uuid::parse_str(raw).map_err(|_| BackendError::InvalidId(raw.to_owned()))
}

fn recent_window(hours: Option<&str>, default: Duration) -> Result<Duration, BackendError> {
    let raw = match hours {
        None => return Ok(default),
        Some(raw) => raw,
    };

    let hours: i64 = raw
        .trim()
        .parse()
        .map_err(|_| BackendError::invalid("hours", format!("{:?} is not a whole number", raw)))?;

    if (1..=MAX_RECENT_HOURS).contains(&hours) {
        Ok(Duration::hours(hours))
    } else {
        Err(BackendError::invalid(
            "hours",
            format!("{} is outside 1..={}", hours, MAX_RECENT_HOURS),
        ))
    }
}

fn format_server_timing(seconds: StdDuration) -> String {
    format!("handler;dur={}", seconds.as_secs_f64() * 1000.0)
}

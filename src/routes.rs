use std::sync::Arc;

use log::{error, warn, Logger};
use warp::http::StatusCode;
use warp::reject;
use warp::reply::{json, with_header, with_status, Reply};
use warp::Filter;

use crate::environment::Environment;
use crate::errors::BackendError;
use crate::timestamp;

pub mod admin;
mod handlers;
mod query;
mod rejection;
mod response;

pub use internal::*;

/// The maximum JSON body size to accept. Forms are a few short fields.
const MAX_CONTENT_LENGTH: u64 = 64 * 1024;

const RETRY_AFTER_HEADER: &str = "retry-after";

/// Every public route. Each renders its own handler's rejections as
/// JSON, so a later route matching the same path cannot replace them.
pub fn make_api(
    environment: Environment,
) -> impl Filter<Extract = (impl Reply,), Error = reject::Rejection> + Clone {
    make_submit_route(environment.clone())
        .or(make_submissions_route(environment.clone()))
        .or(make_recent_route(environment.clone()))
        .or(make_count_route(environment.clone()))
        .or(make_branches_route(environment.clone()))
        .or(make_eligibility_route(environment.clone()))
        .or(make_submission_route(environment.clone()))
        .or(make_projects_route(environment.clone()))
        .or(make_create_project_route(environment.clone()))
        .or(make_project_route(environment.clone()))
        .or(make_update_project_route(environment.clone()))
        .or(make_delete_project_route(environment.clone()))
        .or(make_groups_route(environment.clone()))
        .or(make_create_group_route(environment.clone()))
        .or(make_group_route(environment.clone()))
        .or(make_delete_group_route(environment.clone()))
        .or(make_join_group_route(environment.clone()))
        .or(make_leave_group_route(environment.clone()))
        .or(make_rate_route(environment.clone()))
        .or(make_remove_rating_route(environment))
}

pub async fn format_rejection(
    logger: Arc<Logger>,
    rej: reject::Rejection,
) -> Result<Box<dyn Reply>, reject::Rejection> {
    if let Some(r) = rej.find::<rejection::Rejection>() {
        let e = &r.error;
        let status = status_code_for(e);

        if status.is_server_error() {
            error!(logger, "Backend error"; "context" => ?r.context, "error" => ?r.error, "status" => %status, "message" => %r.error);
        } else {
            warn!(logger, "Request rejected"; "context" => ?r.context, "status" => %status, "message" => %r.error);
        }

        let reply = with_status(json(&r.flatten()), status);

        return Ok(match e {
            BackendError::CoolDownActive { next_eligible_time } => Box::new(with_header(
                reply,
                RETRY_AFTER_HEADER,
                timestamp::http_date(*next_eligible_time),
            )) as Box<dyn Reply>,
            _ => Box::new(reply) as Box<dyn Reply>,
        });
    }

    Err(rej)
}

fn status_code_for(e: &BackendError) -> StatusCode {
    use BackendError::*;

    match e {
        MissingField { .. } | InvalidField { .. } | InvalidId(..) => StatusCode::BAD_REQUEST,
        CoolDownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
        Unauthorized => StatusCode::UNAUTHORIZED,
        NonExistentId(..) => StatusCode::NOT_FOUND,
        GroupNameAlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

mod internal {
    use serde::de::DeserializeOwned;
    use warp::filters::BoxedFilter;
    use warp::path::end;
    use warp::Filter;
    use warp::Reply;
    use warp::{delete, get as g, path as p, path::param as par, post, put, query};

    use super::{format_rejection, handlers, query as q, MAX_CONTENT_LENGTH};
    use crate::environment::Environment;
    use crate::group::{GroupForm, MemberForm, RatingForm};
    use crate::project::ProjectForm;
    use crate::submission::SubmissionForm;

    type Route = BoxedFilter<(Box<dyn Reply>,)>;

    fn json_body<T: DeserializeOwned + Send>(
    ) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
        warp::body::content_length_limit(MAX_CONTENT_LENGTH).and(warp::body::json())
    }

    fn auth() -> impl Filter<Extract = (Option<String>,), Error = warp::Rejection> + Clone {
        warp::header::optional::<String>("authorization")
    }

    macro_rules! route_filter {
    ($route_variable:ident; $first:expr) => (let $route_variable = $route_variable.and($first););
    ($route_variable:ident; $first:expr, $($rest:expr),+) => (
        let $route_variable = $route_variable.and($first);
        route_filter!($route_variable; $($rest),+);
    )
}

    macro_rules! route {
    ($name:ident => $handler:ident, $route_variable:ident; $($filters:expr),+) => (
        pub fn $name(environment: Environment) -> Route {
            let r = environment.urls.api_path.clone();
            let logger = environment.logger.clone();

            let $route_variable = warp::any()
                .map(move || environment.clone())
                .and(p(r));

            route_filter!($route_variable; $($filters),+);

            $route_variable.and_then(handlers::$handler)
                .recover(move |rejection| format_rejection(logger.clone(), rejection))
                .unify()
                .boxed()
        }
    );
}

    route!(make_submit_route => submit, rt; p("submissions"), end(), post(), json_body::<SubmissionForm>());
    route!(make_submissions_route => submissions, rt; p("submissions"), end(), g(), auth());
    route!(make_recent_route => recent, rt; p("submissions"), p("recent"), end(), g(), query::<q::RecentQuery>(), auth());
    route!(make_count_route => count, rt; p("submissions"), p("count"), end(), g());
    route!(make_branches_route => branches, rt; p("submissions"), p("branches"), end(), g());
    route!(make_eligibility_route => eligibility, rt; p("submissions"), p("eligibility"), end(), g(), query::<q::EligibilityQuery>());
    route!(make_submission_route => submission, rt; p("submissions"), par::<String>(), end(), g(), auth());
    route!(make_projects_route => projects, rt; p("projects"), end(), g());
    route!(make_create_project_route => create_project, rt; p("projects"), end(), post(), auth(), json_body::<ProjectForm>());
    route!(make_project_route => project, rt; p("projects"), par::<String>(), end(), g());
    route!(make_update_project_route => update_project, rt; p("projects"), par::<String>(), end(), put(), auth(), json_body::<ProjectForm>());
    route!(make_delete_project_route => delete_project, rt; p("projects"), par::<String>(), end(), delete(), auth());
    route!(make_groups_route => groups, rt; p("groups"), end(), g());
    route!(make_create_group_route => create_group, rt; p("groups"), end(), post(), auth(), json_body::<GroupForm>());
    route!(make_group_route => group, rt; p("groups"), par::<String>(), end(), g());
    route!(make_delete_group_route => delete_group, rt; p("groups"), par::<String>(), end(), delete(), auth());
    route!(make_join_group_route => join_group, rt; p("groups"), par::<String>(), p("members"), end(), post(), json_body::<MemberForm>());
    route!(make_leave_group_route => leave_group, rt; p("groups"), par::<String>(), p("members"), end(), delete(), query::<q::MemberQuery>());
    route!(make_rate_route => rate, rt; p("groups"), par::<String>(), p("ratings"), end(), post(), json_body::<RatingForm>());
    route!(make_remove_rating_route => remove_rating, rt; p("groups"), par::<String>(), p("ratings"), end(), delete(), query::<q::RaterQuery>(), auth());
}

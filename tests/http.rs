use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use warp::http::{Response, StatusCode};
use warp::hyper::body::Bytes;

use intern_tracker::clock::MockClock;
use intern_tracker::db::memory::MemoryDb;
use intern_tracker::environment::{Config, Environment};
use intern_tracker::routes::{self, admin};
use intern_tracker::submission::SubmissionForm;
use intern_tracker::urls::Urls;

/// 2024-01-01T00:00:00Z
const T0: i64 = 1_704_067_200;
const COOL_DOWN_HOURS: i64 = 12;
const ADMIN_TOKEN: &str = "secret";
const BASE_URL: &str = "http://www.example.com/";
const API_PATH: &str = "api";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordResponse {
    id: String,
    identity: String,
    name: String,
    branch: String,
    activities: String,
    date: i64,
    created_at: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EligibilityResponse {
    eligible: bool,
    next_eligible_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectResponse {
    id: String,
    name: String,
    description: String,
    deadline: i64,
    progress: i16,
    links: Vec<LinkResponse>,
    created_at: i64,
    days_remaining: i64,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct LinkResponse {
    title: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupResponse {
    id: String,
    name: String,
    created_at: i64,
    members: Vec<String>,
    ratings: usize,
    total: i64,
    average: f64,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct BranchResponse {
    branch: String,
    interns: i64,
    submissions: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HealthzResponse {
    revision: Option<String>,
    timestamp: Option<String>,
    version: String,
}

struct Fixture {
    db: Arc<MemoryDb>,
    clock: MockClock,
    environment: Environment,
}

fn fixture() -> Fixture {
    let db = Arc::new(MemoryDb::default());
    let clock = MockClock::new(OffsetDateTime::from_unix_timestamp(T0));

    let config = Config::new(
        Duration::hours(COOL_DOWN_HOURS),
        Duration::hours(24),
        ADMIN_TOKEN,
    );

    let environment = Environment::new(
        Arc::new(log::null_logger()),
        db.clone(),
        Arc::new(Urls::new(BASE_URL, API_PATH)),
        Arc::new(clock.clone()),
        config,
    );

    Fixture {
        db,
        clock,
        environment,
    }
}

fn form(name: &str, date: &str) -> Value {
    json!({
        "name": name,
        "branch": "Mechanical",
        "activities": "Calibrated the torque rig",
        "date": date,
    })
}

fn submit(body: &Value) -> warp::test::RequestBuilder {
    warp::test::request()
        .method("POST")
        .path("/api/submissions")
        .json(body)
}

fn admin_get(path: &str) -> warp::test::RequestBuilder {
    warp::test::request()
        .path(path)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
}

fn admin_request(method: &str, path: &str) -> warp::test::RequestBuilder {
    admin_get(path).method(method)
}

fn parse<T: DeserializeOwned>(response: &Response<Bytes>) -> T {
    serde_json::from_slice(response.body()).unwrap_or_else(|e| {
        panic!(
            "parse {:?} ({})",
            String::from_utf8_lossy(response.body()),
            e
        )
    })
}

fn header<'a>(response: &'a Response<Bytes>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {} header", name))
        .to_str()
        .expect("header is ASCII")
}

#[tokio::test]
async fn accepted_submissions_are_stored_and_located() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let response = submit(&form("  Asha Rao ", "2023-12-31T09:00:00.000Z"))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(header(&response, "server-timing").starts_with("handler;dur="));

    let record: RecordResponse = parse(&response);
    assert_eq!(record.identity, "asha rao");
    assert_eq!(record.name, "Asha Rao");
    assert_eq!(record.branch, "Mechanical");
    assert_eq!(record.activities, "Calibrated the torque rig");
    assert_eq!(record.created_at, T0);
    assert_eq!(record.date, T0 - 15 * 60 * 60);

    let location = header(&response, "location");
    assert_eq!(
        location,
        format!("{}{}/submissions/{}", BASE_URL, API_PATH, record.id)
    );

    let retrieved = admin_get(&format!("/api/submissions/{}", record.id))
        .reply(&api)
        .await;
    assert_eq!(retrieved.status(), StatusCode::OK);
    assert_eq!(parse::<RecordResponse>(&retrieved).id, record.id);
}

#[tokio::test]
async fn resubmitting_inside_the_window_is_rejected_until_it_ends() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let first = submit(&form("Asha", "2024-01-01T00:00:00Z")).reply(&api).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    f.clock.advance(Duration::hours(COOL_DOWN_HOURS) - Duration::seconds(1));

    // same identity, different spelling
    let early = submit(&form("ASHA ", "2024-01-01T00:00:00Z")).reply(&api).await;
    assert_eq!(early.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&early, "retry-after"), "Mon, 01 Jan 2024 12:00:00 GMT");

    let body: Value = parse(&early);
    assert_eq!(body["next_eligible_time"], T0 + COOL_DOWN_HOURS * 60 * 60);

    f.clock.advance(Duration::seconds(1));

    let on_time = submit(&form("asha", "2024-01-01T12:00:00Z")).reply(&api).await;
    assert_eq!(on_time.status(), StatusCode::CREATED);

    assert_eq!(f.db.submission_count(), 2);
}

#[tokio::test]
async fn other_identities_are_unaffected() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    for name in &["Asha", "Bilal", "Chen"] {
        let response = submit(&form(name, "2024-01-01T00:00:00Z")).reply(&api).await;
        assert_eq!(response.status(), StatusCode::CREATED, "{}", name);
    }

    let count = warp::test::request()
        .path("/api/submissions/count")
        .reply(&api)
        .await;
    assert_eq!(count.status(), StatusCode::OK);
    assert_eq!(parse::<i64>(&count), 3);
}

#[tokio::test]
async fn invalid_forms_name_the_field_and_store_nothing() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let cases = vec![
        ("name", json!({"name": "   ", "branch": "ECE", "activities": "x", "date": "2024-01-01T00:00:00Z"})),
        ("branch", json!({"name": "Asha", "activities": "x", "date": "2024-01-01T00:00:00Z"})),
        ("activities", json!({"name": "Asha", "branch": "ECE", "activities": "", "date": "2024-01-01T00:00:00Z"})),
        ("date", json!({"name": "Asha", "branch": "ECE", "activities": "x", "date": "last tuesday"})),
    ];

    for (field, body) in cases {
        let response = submit(&body).reply(&api).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", field);
        assert_eq!(parse::<Value>(&response)["field"], field);
    }

    assert_eq!(f.db.submission_count(), 0);
}

#[tokio::test]
async fn concurrent_submissions_admit_exactly_one() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let first = form("Asha", "2024-01-01T00:00:00Z");
    let second = form("asha", "2024-01-01T00:00:00Z");

    let (a, b) = tokio::join!(submit(&first).reply(&api), submit(&second).reply(&api));

    let mut statuses = vec![a.status(), b.status()];
    statuses.sort();

    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::TOO_MANY_REQUESTS]);
    assert_eq!(f.db.submission_count(), 1);
}

#[tokio::test]
async fn listings_require_the_admin_token() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let anonymous = warp::test::request().path("/api/submissions").reply(&api).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = warp::test::request()
        .path("/api/submissions")
        .header("authorization", "Bearer guess")
        .reply(&api)
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let admin = admin_get("/api/submissions").reply(&api).await;
    assert_eq!(admin.status(), StatusCode::OK);
    assert!(parse::<Vec<RecordResponse>>(&admin).is_empty());
}

#[tokio::test]
async fn recent_listing_is_windowed_and_newest_first() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    // inserted out of order on purpose
    for (name, date) in &[
        ("a", "2023-12-31T12:00:00Z"),
        ("b", "2023-12-29T00:00:00Z"),
        ("c", "2023-12-30T00:00:00Z"),
        ("d", "2024-01-01T00:00:00Z"),
    ] {
        let response = submit(&form(name, date)).reply(&api).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = admin_get("/api/submissions/recent?hours=48").reply(&api).await;
    assert_eq!(response.status(), StatusCode::OK);

    let records: Vec<RecordResponse> = parse(&response);
    let names: Vec<&str> = records.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(names, vec!["d", "a", "c"]);

    let all = admin_get("/api/submissions").reply(&api).await;
    let names: Vec<String> = parse::<Vec<RecordResponse>>(&all)
        .into_iter()
        .map(|r| r.identity)
        .collect();
    assert_eq!(names, vec!["d", "a", "c", "b"]);

    let invalid = admin_get("/api/submissions/recent?hours=0").reply(&api).await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&invalid)["field"], "hours");

    let malformed = admin_get("/api/submissions/recent?hours=abc").reply(&api).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    let body: Value = parse(&malformed);
    assert_eq!(body["field"], "hours");
    assert_eq!(body["hours"], "abc");

    let anonymous = warp::test::request()
        .path("/api/submissions/recent?hours=48")
        .reply(&api)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(parse::<Value>(&anonymous)["hours"], "48");
}

#[tokio::test]
async fn eligibility_reports_the_next_eligible_time() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let before = warp::test::request()
        .path("/api/submissions/eligibility?name=Asha")
        .reply(&api)
        .await;
    let before: EligibilityResponse = parse(&before);
    assert!(before.eligible);
    assert_eq!(before.next_eligible_time, None);

    submit(&form("Asha", "2024-01-01T00:00:00Z")).reply(&api).await;
    f.clock.advance(Duration::hours(1));

    let after = warp::test::request()
        .path("/api/submissions/eligibility?name=%20asha")
        .reply(&api)
        .await;
    let after: EligibilityResponse = parse(&after);
    assert!(!after.eligible);
    assert_eq!(after.next_eligible_time, Some(T0 + COOL_DOWN_HOURS * 60 * 60));

    let nameless = warp::test::request()
        .path("/api/submissions/eligibility?name=")
        .reply(&api)
        .await;
    assert_eq!(nameless.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&nameless)["field"], "name");
}

#[tokio::test]
async fn a_submission_stored_elsewhere_first_sets_the_retry_time() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    // lands between this request's admission check and its write
    let competing = SubmissionForm {
        name: Some("Asha".to_owned()),
        branch: Some("Mechanical".to_owned()),
        activities: Some("Bench tests".to_owned()),
        date: Some("2024-01-01T00:00:00Z".to_owned()),
    }
    .validate(OffsetDateTime::from_unix_timestamp(T0 - 60))
    .expect("validate competing submission");
    f.db.interleave_before_next_insert(competing);

    let response = submit(&form("asha", "2024-01-01T00:00:00Z")).reply(&api).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "retry-after"), "Mon, 01 Jan 2024 11:59:00 GMT");
    assert_eq!(
        parse::<Value>(&response)["next_eligible_time"],
        T0 - 60 + COOL_DOWN_HOURS * 60 * 60
    );
    assert_eq!(f.db.submission_count(), 1);
}

#[tokio::test]
async fn branches_are_counted_by_submissions_and_interns() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    for (name, branch) in &[("Asha", "Mechanical"), ("Bilal", "CSE"), ("Chen", "Mechanical")] {
        let mut body = form(name, "2024-01-01T00:00:00Z");
        body["branch"] = json!(branch);
        assert_eq!(submit(&body).reply(&api).await.status(), StatusCode::CREATED);
    }

    f.clock.advance(Duration::hours(COOL_DOWN_HOURS));
    assert_eq!(
        submit(&form("Asha", "2024-01-01T12:00:00Z")).reply(&api).await.status(),
        StatusCode::CREATED
    );

    let response = warp::test::request()
        .path("/api/submissions/branches")
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let branches: Vec<BranchResponse> = parse(&response);
    assert_eq!(
        branches,
        vec![
            BranchResponse {
                branch: "CSE".to_owned(),
                interns: 1,
                submissions: 1,
            },
            BranchResponse {
                branch: "Mechanical".to_owned(),
                interns: 2,
                submissions: 3,
            },
        ]
    );
}

#[tokio::test]
async fn storage_outages_admit_nothing_and_can_be_retried() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    f.db.set_unavailable(true);

    let failed = submit(&form("Asha", "2024-01-01T00:00:00Z")).reply(&api).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parse::<Value>(&failed)["message"], "storage unavailable");

    f.db.set_unavailable(false);
    assert_eq!(f.db.submission_count(), 0);

    let retried = submit(&form("Asha", "2024-01-01T00:00:00Z")).reply(&api).await;
    assert_eq!(retried.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn projects_can_be_managed() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let body = json!({
        "name": "Attendance dashboard",
        "deadline": "2024-01-10T12:00:00Z",
        "progress": 25,
        "links": [
            {"title": "Repository", "url": "github.com/example/attendance"},
            {"title": "", "url": "https://ignored.example.com"},
        ],
    });

    let anonymous = warp::test::request()
        .method("POST")
        .path("/api/projects")
        .json(&body)
        .reply(&api)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let created = admin_request("POST", "/api/projects").json(&body).reply(&api).await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let project: ProjectResponse = parse(&created);
    assert_eq!(project.name, "Attendance dashboard");
    assert_eq!(project.description, "");
    assert_eq!(project.progress, 25);
    assert_eq!(project.deadline, T0 + 9 * 24 * 60 * 60 + 12 * 60 * 60);
    assert_eq!(project.created_at, T0);
    assert_eq!(project.days_remaining, 10);
    assert_eq!(
        project.links,
        vec![LinkResponse {
            title: "Repository".to_owned(),
            url: "https://github.com/example/attendance".to_owned(),
        }]
    );
    assert_eq!(
        header(&created, "location"),
        format!("{}{}/projects/{}", BASE_URL, API_PATH, project.id)
    );

    let path = format!("/api/projects/{}", project.id);

    let overdone = admin_request("PUT", &path)
        .json(&json!({"name": "Attendance dashboard", "deadline": "2024-01-10T12:00:00Z", "progress": 150}))
        .reply(&api)
        .await;
    assert_eq!(overdone.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&overdone)["field"], "progress");

    let updated = admin_request("PUT", &path)
        .json(&json!({"name": "Attendance dashboard v2", "deadline": "2024-01-10T12:00:00Z", "progress": 100}))
        .reply(&api)
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: ProjectResponse = parse(&updated);
    assert_eq!(updated.progress, 100);
    assert_eq!(updated.created_at, T0);
    assert!(updated.links.is_empty());

    let listed = warp::test::request().path("/api/projects").reply(&api).await;
    let listed: Vec<ProjectResponse> = parse(&listed);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Attendance dashboard v2");

    let deleted = admin_request("DELETE", &path).reply(&api).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = warp::test::request().path(&path).reply(&api).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let again = admin_request("DELETE", &path).reply(&api).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let malformed = warp::test::request()
        .path("/api/projects/not-a-uuid")
        .reply(&api)
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn groups_are_rated_and_ranked() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let create = |name: &str| admin_request("POST", "/api/groups").json(&json!({ "name": name }));

    let rovers = create("Rovers").reply(&api).await;
    assert_eq!(rovers.status(), StatusCode::CREATED);
    let rovers: GroupResponse = parse(&rovers);
    assert_eq!(rovers.ratings, 0);
    assert_eq!(rovers.average, 0.0);

    let duplicate = create("Rovers").reply(&api).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let aces: GroupResponse = parse(&create("Aces").reply(&api).await);

    let rate = |id: &str, rater: &str, scores: (i64, i64, i64)| {
        warp::test::request()
            .method("POST")
            .path(&format!("/api/groups/{}/ratings", id))
            .json(&json!({
                "rater": rater,
                "communication": scores.0,
                "teamwork": scores.1,
                "technical": scores.2,
            }))
    };

    rate(&rovers.id, "Asha", (5, 5, 5)).reply(&api).await;

    // a second rating by the same rater replaces the first
    let replaced = rate(&rovers.id, "asha", (1, 2, 3)).reply(&api).await;
    assert_eq!(replaced.status(), StatusCode::OK);
    let replaced: GroupResponse = parse(&replaced);
    assert_eq!(replaced.ratings, 1);
    assert_eq!(replaced.total, 6);

    let summed: GroupResponse = parse(&rate(&rovers.id, "Bilal", (4, 4, 4)).reply(&api).await);
    assert_eq!(summed.ratings, 2);
    assert_eq!(summed.total, 18);
    assert_eq!(summed.average, 9.0);

    rate(&aces.id, "Asha", (5, 5, 4)).reply(&api).await;

    let out_of_range = rate(&aces.id, "Chen", (6, 5, 5)).reply(&api).await;
    assert_eq!(out_of_range.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&out_of_range)["field"], "communication");

    let unknown = rate("00000000-0000-0000-0000-000000000000", "Chen", (3, 3, 3))
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let listed: Vec<GroupResponse> = parse(&warp::test::request().path("/api/groups").reply(&api).await);
    let names: Vec<&str> = listed.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["Aces", "Rovers"]);

    let removed = admin_request("DELETE", &format!("/api/groups/{}/ratings?rater=ASHA", rovers.id))
        .reply(&api)
        .await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let remaining: GroupResponse = parse(
        &warp::test::request()
            .path(&format!("/api/groups/{}", rovers.id))
            .reply(&api)
            .await,
    );
    assert_eq!(remaining.ratings, 1);
    assert_eq!(remaining.total, 12);
    assert_eq!(remaining.created_at, T0);

    let deleted = admin_request("DELETE", &format!("/api/groups/{}", rovers.id))
        .reply(&api)
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = warp::test::request()
        .path(&format!("/api/groups/{}", rovers.id))
        .reply(&api)
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn interns_join_and_leave_groups() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let group: GroupResponse = parse(
        &admin_request("POST", "/api/groups")
            .json(&json!({"name": "Rovers"}))
            .reply(&api)
            .await,
    );
    assert!(group.members.is_empty());

    let members = format!("/api/groups/{}/members", group.id);
    let join = |name: &str| {
        warp::test::request()
            .method("POST")
            .path(&members)
            .json(&json!({ "name": name }))
    };

    join("Bilal").reply(&api).await;
    join(" Asha ").reply(&api).await;
    let joined = join("ASHA").reply(&api).await;
    assert_eq!(joined.status(), StatusCode::OK);
    assert_eq!(parse::<GroupResponse>(&joined).members, vec!["asha", "bilal"]);

    let nameless = join("  ").reply(&api).await;
    assert_eq!(nameless.status(), StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&nameless)["field"], "name");

    let unknown = warp::test::request()
        .method("POST")
        .path("/api/groups/00000000-0000-0000-0000-000000000000/members")
        .json(&json!({"name": "Asha"}))
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let left = warp::test::request()
        .method("DELETE")
        .path(&format!("{}?name=asha", members))
        .reply(&api)
        .await;
    assert_eq!(left.status(), StatusCode::NO_CONTENT);

    let again = warp::test::request()
        .method("DELETE")
        .path(&format!("{}?name=asha", members))
        .reply(&api)
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let listed: Vec<GroupResponse> = parse(&warp::test::request().path("/api/groups").reply(&api).await);
    assert_eq!(listed[0].members, vec!["bilal"]);
}

#[tokio::test]
async fn healthz_reports_the_build() {
    let f = fixture();
    let healthz = admin::make_healthz_route(f.environment.clone());

    let response = warp::test::request().path("/healthz").reply(&healthz).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthzResponse = parse(&response);
    assert_eq!(body.version, info::VERSION);
    assert_eq!(body.revision.as_deref(), info::REVISION);
    assert_eq!(body.timestamp.as_deref(), info::BUILD_TIMESTAMP);
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let f = fixture();
    let api = routes::make_api(f.environment.clone());

    let response = warp::test::request().path("/api/nothing").reply(&api).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

use futures::future::BoxFuture;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::errors::BackendError;
use crate::gate::PriorSubmissions;
use crate::group::{Group, GroupRecord, NewRating};
use crate::identity::IdentityKey;
use crate::project::{Project, ProjectDetails};
use crate::submission::{ActivityRecord, BranchCount, NewSubmission};

pub mod memory;

/// The outcome of a conditional submission insert.
#[derive(Clone, Debug)]
pub enum Insertion {
    Inserted(ActivityRecord),

    /// Nothing was written: `latest` is the identity's most recent
    /// submission, which falls inside the cool-down window.
    Declined { latest: OffsetDateTime },
}

pub trait Db: PriorSubmissions {
    fn count_submissions(&self) -> BoxFuture<Result<i64, BackendError>>;

    /// Submission and intern counts per branch, ordered by branch.
    fn count_branches(&self) -> BoxFuture<Result<Vec<BranchCount>, BackendError>>;

    /// Stores the submission unless the identity already has one created
    /// within `cool_down` of it. The check and the write are atomic with
    /// respect to every other writer of the same store.
    fn insert_submission(
        &self,
        submission: NewSubmission,
        cool_down: Duration,
    ) -> BoxFuture<Result<Insertion, BackendError>>;

    /// Submissions dated at or after `since` (all of them if `None`),
    /// newest first.
    fn retrieve_submissions(
        &self,
        since: Option<OffsetDateTime>,
    ) -> BoxFuture<Result<Vec<ActivityRecord>, BackendError>>;

    fn retrieve_submission(&self, id: &Uuid) -> BoxFuture<Result<Option<ActivityRecord>, BackendError>>;

    fn create_project(
        &self,
        details: ProjectDetails,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<Project, BackendError>>;

    /// All projects, earliest deadline first.
    fn retrieve_projects(&self) -> BoxFuture<Result<Vec<Project>, BackendError>>;

    fn retrieve_project(&self, id: &Uuid) -> BoxFuture<Result<Option<Project>, BackendError>>;

    fn update_project(
        &self,
        id: &Uuid,
        details: ProjectDetails,
    ) -> BoxFuture<Result<Option<Project>, BackendError>>;

    fn delete_project(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>>;

    fn create_group(
        &self,
        name: String,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<Group, BackendError>>;

    /// Every group together with its ratings and members.
    fn retrieve_groups(&self) -> BoxFuture<Result<Vec<GroupRecord>, BackendError>>;

    fn retrieve_group(&self, id: &Uuid) -> BoxFuture<Result<Option<GroupRecord>, BackendError>>;

    /// Deletes the group, its ratings and its memberships.
    fn delete_group(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>>;

    /// Adds the member to the group; joining twice is a no-op.
    fn join_group(
        &self,
        id: &Uuid,
        member: &IdentityKey,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<(), BackendError>>;

    fn leave_group(&self, id: &Uuid, member: &IdentityKey) -> BoxFuture<Result<(), BackendError>>;

    /// Records the rating, replacing any earlier one by the same rater.
    fn rate_group(
        &self,
        id: &Uuid,
        rating: NewRating,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<(), BackendError>>;

    fn remove_rating(&self, id: &Uuid, rater: &IdentityKey) -> BoxFuture<Result<(), BackendError>>;
}

pub use self::postgres::*;

mod postgres {
    use std::collections::HashMap;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::{
        self,
        postgres::{PgPool, PgRow},
        types::Json,
    };
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    use super::Insertion;
    use crate::errors::BackendError;
    use crate::gate::PriorSubmissions;
    use crate::group::{Group, GroupRecord, NewRating, Scores};
    use crate::identity::IdentityKey;
    use crate::project::{Project, ProjectDetails, ProjectLink};
    use crate::submission::{ActivityRecord, BranchCount, NewSubmission};

    const GROUPS_NAME_CONSTRAINT: &str = "groups_name";
    const GROUP_RATINGS_GROUP_CONSTRAINT: &str = "group_ratings_group";
    const GROUP_MEMBERS_GROUP_CONSTRAINT: &str = "group_members_group";

    pub struct PgDb {
        pool: PgPool,
    }

    impl PgDb {
        pub fn new(pool: PgPool) -> Self {
            PgDb { pool }
        }
    }

    impl PriorSubmissions for PgDb {
        fn latest_submission(
            &self,
            identity: &IdentityKey,
        ) -> BoxFuture<Result<Option<OffsetDateTime>, BackendError>> {
            let identity = identity.clone();

            async move {
                let query = sqlx::query_as(include_str!("queries/latest_submission.sql"));

                let (latest,): (Option<OffsetDateTime>,) = query
                    .bind(identity.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(latest)
            }
            .boxed()
        }
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::Db for PgDb {
        fn count_submissions(&self) -> BoxFuture<Result<i64, BackendError>> {
            async move {
                let query = sqlx::query_as::<_, (i64,)>(include_str!("queries/count_submissions.sql"));

                let (count,) = query.fetch_one(&self.pool).await.map_err(map_sqlx_error)?;

                Ok(count)
            }
            .boxed()
        }

        fn count_branches(&self) -> BoxFuture<Result<Vec<BranchCount>, BackendError>> {
            async move {
                let query = sqlx::query(include_str!("queries/count_branches.sql"));

                let counts = query
                    .try_map(|row: PgRow| {
                        Ok(BranchCount::new(
                            try_get(&row, "branch")?,
                            try_get(&row, "interns")?,
                            try_get(&row, "submissions")?,
                        ))
                    })
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(counts)
            }
            .boxed()
        }

        fn insert_submission(
            &self,
            submission: NewSubmission,
            cool_down: Duration,
        ) -> BoxFuture<Result<Insertion, BackendError>> {
            async move {
                let threshold = submission.submitted_at - cool_down;

                let mut transaction = self.pool.begin().await.map_err(map_sqlx_error)?;

                // serializes writers for this identity across processes until commit
                sqlx::query(include_str!("queries/lock_identity.sql"))
                    .bind(submission.identity.as_str())
                    .execute(&mut transaction)
                    .await
                    .map_err(map_sqlx_error)?;

                let (latest,): (Option<OffsetDateTime>,) =
                    sqlx::query_as(include_str!("queries/latest_submission.sql"))
                        .bind(submission.identity.as_str())
                        .fetch_one(&mut transaction)
                        .await
                        .map_err(map_sqlx_error)?;

                if let Some(latest) = latest.filter(|latest| *latest > threshold) {
                    transaction.rollback().await.map_err(map_sqlx_error)?;

                    return Ok(Insertion::Declined { latest });
                }

                let query = sqlx::query_as(include_str!("queries/insert_submission.sql"));

                let (id,): (Uuid,) = query
                    .bind(submission.identity.as_str())
                    .bind(&submission.name)
                    .bind(&submission.branch)
                    .bind(&submission.activities)
                    .bind(submission.date)
                    .bind(submission.submitted_at)
                    .fetch_one(&mut transaction)
                    .await
                    .map_err(map_sqlx_error)?;

                transaction.commit().await.map_err(map_sqlx_error)?;

                Ok(Insertion::Inserted(ActivityRecord::new(id, submission)))
            }
            .boxed()
        }

        fn retrieve_submissions(
            &self,
            since: Option<OffsetDateTime>,
        ) -> BoxFuture<Result<Vec<ActivityRecord>, BackendError>> {
            async move {
                let query = sqlx::query(include_str!("queries/retrieve_submissions.sql"));

                let records = query
                    .bind(since)
                    .try_map(|row: PgRow| record_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(records)
            }
            .boxed()
        }

        fn retrieve_submission(&self, id: &Uuid) -> BoxFuture<Result<Option<ActivityRecord>, BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_submission.sql"));

                let record = query
                    .bind(id)
                    .try_map(|row: PgRow| record_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(record)
            }
            .boxed()
        }

        fn create_project(
            &self,
            details: ProjectDetails,
            created_at: OffsetDateTime,
        ) -> BoxFuture<Result<Project, BackendError>> {
            async move {
                let query = sqlx::query_as(include_str!("queries/create_project.sql"));

                let (id,): (Uuid,) = query
                    .bind(&details.name)
                    .bind(&details.description)
                    .bind(details.deadline)
                    .bind(details.progress)
                    .bind(Json(&details.links))
                    .bind(created_at)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(Project::new(id, details, created_at))
            }
            .boxed()
        }

        fn retrieve_projects(&self) -> BoxFuture<Result<Vec<Project>, BackendError>> {
            async move {
                let query = sqlx::query(include_str!("queries/retrieve_projects.sql"));

                let projects = query
                    .try_map(|row: PgRow| project_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(projects)
            }
            .boxed()
        }

        fn retrieve_project(&self, id: &Uuid) -> BoxFuture<Result<Option<Project>, BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_project.sql"));

                let project = query
                    .bind(id)
                    .try_map(|row: PgRow| project_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(project)
            }
            .boxed()
        }

        fn update_project(
            &self,
            id: &Uuid,
            details: ProjectDetails,
        ) -> BoxFuture<Result<Option<Project>, BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query_as(include_str!("queries/update_project.sql"));

                let updated: Option<(OffsetDateTime,)> = query
                    .bind(id)
                    .bind(&details.name)
                    .bind(&details.description)
                    .bind(details.deadline)
                    .bind(details.progress)
                    .bind(Json(&details.links))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(updated.map(|(created_at,)| Project::new(id, details, created_at)))
            }
            .boxed()
        }

        fn delete_project(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/delete_project.sql"));

                let count = query
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn create_group(
            &self,
            name: String,
            created_at: OffsetDateTime,
        ) -> BoxFuture<Result<Group, BackendError>> {
            async move {
                let query = sqlx::query_as(include_str!("queries/create_group.sql"));

                let (id,): (Uuid,) = query
                    .bind(&name)
                    .bind(created_at)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(Group::new(id, name, created_at))
            }
            .boxed()
        }

        fn retrieve_groups(&self) -> BoxFuture<Result<Vec<GroupRecord>, BackendError>> {
            async move {
                let groups = sqlx::query(include_str!("queries/retrieve_groups.sql"))
                    .try_map(|row: PgRow| group_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                let ratings: Vec<(Uuid, Scores)> =
                    sqlx::query(include_str!("queries/retrieve_all_ratings.sql"))
                        .try_map(|row: PgRow| Ok((try_get(&row, "group_id")?, scores_from_row(&row)?)))
                        .fetch_all(&self.pool)
                        .await
                        .map_err(map_sqlx_error)?;

                let members: Vec<(Uuid, String)> =
                    sqlx::query_as(include_str!("queries/retrieve_all_members.sql"))
                        .fetch_all(&self.pool)
                        .await
                        .map_err(map_sqlx_error)?;

                let mut scores_by_group: HashMap<Uuid, Vec<Scores>> = HashMap::new();
                for (group_id, scores) in ratings {
                    scores_by_group.entry(group_id).or_default().push(scores);
                }

                let mut members_by_group: HashMap<Uuid, Vec<IdentityKey>> = HashMap::new();
                for (group_id, member) in members {
                    members_by_group
                        .entry(group_id)
                        .or_default()
                        .push(IdentityKey::from_stored(member));
                }

                Ok(groups
                    .into_iter()
                    .map(|group| {
                        let scores = scores_by_group.remove(group.id()).unwrap_or_default();
                        let members = members_by_group.remove(group.id()).unwrap_or_default();
                        GroupRecord::new(group, scores, members)
                    })
                    .collect())
            }
            .boxed()
        }

        fn retrieve_group(&self, id: &Uuid) -> BoxFuture<Result<Option<GroupRecord>, BackendError>> {
            let id = *id;

            async move {
                let group = sqlx::query(include_str!("queries/retrieve_group.sql"))
                    .bind(id)
                    .try_map(|row: PgRow| group_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                let group = match group {
                    Some(group) => group,
                    None => return Ok(None),
                };

                let scores = sqlx::query(include_str!("queries/retrieve_group_ratings.sql"))
                    .bind(id)
                    .try_map(|row: PgRow| scores_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                let members: Vec<(String,)> = sqlx::query_as(include_str!("queries/retrieve_group_members.sql"))
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                let members = members
                    .into_iter()
                    .map(|(member,)| IdentityKey::from_stored(member))
                    .collect();

                Ok(Some(GroupRecord::new(group, scores, members)))
            }
            .boxed()
        }

        fn delete_group(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/delete_group.sql"));

                let count = query
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn rate_group(
            &self,
            id: &Uuid,
            rating: NewRating,
            created_at: OffsetDateTime,
        ) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/upsert_rating.sql"));

                query
                    .bind(id)
                    .bind(rating.rater.as_str())
                    .bind(rating.scores.communication)
                    .bind(rating.scores.teamwork)
                    .bind(rating.scores.technical)
                    .bind(created_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|error| match error {
                        sqlx::Error::Database(ref e)
                            if e.constraint() == Some(GROUP_RATINGS_GROUP_CONSTRAINT) =>
                        {
                            BackendError::NonExistentId(id)
                        }
                        error => map_sqlx_error(error),
                    })?;

                Ok(())
            }
            .boxed()
        }

        fn remove_rating(&self, id: &Uuid, rater: &IdentityKey) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;
            let rater = rater.clone();

            async move {
                let query = sqlx::query(include_str!("queries/delete_rating.sql"));

                let count = query
                    .bind(id)
                    .bind(rater.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn join_group(
            &self,
            id: &Uuid,
            member: &IdentityKey,
            created_at: OffsetDateTime,
        ) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;
            let member = member.clone();

            async move {
                sqlx::query(include_str!("queries/join_group.sql"))
                    .bind(id)
                    .bind(member.as_str())
                    .bind(created_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|error| match error {
                        sqlx::Error::Database(ref e)
                            if e.constraint() == Some(GROUP_MEMBERS_GROUP_CONSTRAINT) =>
                        {
                            BackendError::NonExistentId(id)
                        }
                        error => map_sqlx_error(error),
                    })?;

                Ok(())
            }
            .boxed()
        }

        fn leave_group(&self, id: &Uuid, member: &IdentityKey) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;
            let member = member.clone();

            async move {
                let count = sqlx::query(include_str!("queries/leave_group.sql"))
                    .bind(id)
                    .bind(member.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    fn record_from_row(row: &PgRow) -> Result<ActivityRecord, sqlx::Error> {
        Ok(ActivityRecord::from_parts(
            try_get(row, "id")?,
            IdentityKey::from_stored(try_get(row, "identity")?),
            try_get(row, "name")?,
            try_get(row, "branch")?,
            try_get(row, "activities")?,
            try_get(row, "date")?,
            try_get(row, "created_at")?,
        ))
    }

    fn project_from_row(row: &PgRow) -> Result<Project, sqlx::Error> {
        let Json(links): Json<Vec<ProjectLink>> = try_get(row, "links")?;

        let details = ProjectDetails {
            name: try_get(row, "name")?,
            description: try_get(row, "description")?,
            deadline: try_get(row, "deadline")?,
            progress: try_get(row, "progress")?,
            links,
        };

        Ok(Project::new(try_get(row, "id")?, details, try_get(row, "created_at")?))
    }

    fn group_from_row(row: &PgRow) -> Result<Group, sqlx::Error> {
        Ok(Group::new(
            try_get(row, "id")?,
            try_get(row, "name")?,
            try_get(row, "created_at")?,
        ))
    }

    fn scores_from_row(row: &PgRow) -> Result<Scores, sqlx::Error> {
        Ok(Scores::new(
            try_get(row, "communication")?,
            try_get(row, "teamwork")?,
            try_get(row, "technical")?,
        ))
    }

    fn try_get<'a, T: sqlx::Type<sqlx::Postgres> + sqlx::decode::Decode<'a, sqlx::Postgres>>(
        row: &'a PgRow,
        column: &str,
    ) -> Result<T, sqlx::Error> {
        use sqlx::prelude::*;

        row.try_get(column)
    }

    fn map_sqlx_error(error: sqlx::Error) -> BackendError {
        use sqlx::Error;

        match error {
            Error::Database(ref e) if e.constraint() == Some(GROUPS_NAME_CONSTRAINT) => {
                BackendError::GroupNameAlreadyExists
            }
            _ => BackendError::Sqlx { source: error },
        }
    }
}

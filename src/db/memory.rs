//! A [`Db`] kept entirely in memory, for tests and local runs without
//! PostgreSQL.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{self, BoxFuture, FutureExt};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{Db, Insertion};
use crate::errors::BackendError;
use crate::gate::PriorSubmissions;
use crate::group::{Group, GroupRecord, NewRating, Scores};
use crate::identity::IdentityKey;
use crate::project::{Project, ProjectDetails};
use crate::submission::{ActivityRecord, BranchCount, NewSubmission};

#[derive(Default)]
struct State {
    submissions: Vec<ActivityRecord>,
    projects: Vec<Project>,
    groups: Vec<Group>,
    ratings: Vec<(Uuid, IdentityKey, Scores)>,
    members: Vec<(Uuid, IdentityKey)>,
    interleaved: Vec<NewSubmission>,
}

#[derive(Default)]
pub struct MemoryDb {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl MemoryDb {
    /// While set, every operation fails as if the storage backend were
    /// unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stores `submission` unconditionally at the start of the next
    /// conditional insert, the way a writer in another process would
    /// between an admission check and its write.
    pub fn interleave_before_next_insert(&self, submission: NewSubmission) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .interleaved
            .push(submission);
    }

    pub fn submission_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).submissions.len()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, BackendError> {
        self.check_available()?;

        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, BackendError> {
        self.check_available()?;

        Ok(self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Sqlx {
                source: sqlx::Error::PoolTimedOut,
            })
        } else {
            Ok(())
        }
    }

    fn latest(&self, identity: &IdentityKey) -> Result<Option<OffsetDateTime>, BackendError> {
        Ok(latest_for(&*self.read()?, identity))
    }

    fn insert(
        &self,
        submission: NewSubmission,
        cool_down: Duration,
    ) -> Result<Insertion, BackendError> {
        let mut state = self.write()?;
        let threshold = submission.submitted_at - cool_down;

        for other in std::mem::take(&mut state.interleaved) {
            state.submissions.push(ActivityRecord::new(Uuid::new_v4(), other));
        }

        match latest_for(&state, &submission.identity) {
            Some(latest) if latest > threshold => Ok(Insertion::Declined { latest }),
            _ => {
                let record = ActivityRecord::new(Uuid::new_v4(), submission);
                state.submissions.push(record.clone());

                Ok(Insertion::Inserted(record))
            }
        }
    }

    fn branches(&self) -> Result<Vec<BranchCount>, BackendError> {
        let state = self.read()?;
        let mut by_branch: BTreeMap<&str, (Vec<&IdentityKey>, i64)> = BTreeMap::new();

        for record in &state.submissions {
            let (interns, submissions) = by_branch.entry(record.branch()).or_default();

            if !interns.contains(&record.identity()) {
                interns.push(record.identity());
            }
            *submissions += 1;
        }

        Ok(by_branch
            .into_iter()
            .map(|(branch, (interns, submissions))| {
                BranchCount::new(branch.to_owned(), interns.len() as i64, submissions)
            })
            .collect())
    }

    fn submissions(&self, since: Option<OffsetDateTime>) -> Result<Vec<ActivityRecord>, BackendError> {
        let mut records: Vec<ActivityRecord> = self
            .read()?
            .submissions
            .iter()
            .filter(|r| since.map_or(true, |since| r.date() >= since))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            b.date()
                .cmp(&a.date())
                .then_with(|| b.created_at().cmp(&a.created_at()))
        });

        Ok(records)
    }

    fn submission(&self, id: &Uuid) -> Result<Option<ActivityRecord>, BackendError> {
        Ok(self.read()?.submissions.iter().find(|r| r.id() == id).cloned())
    }

    fn projects(&self) -> Result<Vec<Project>, BackendError> {
        let mut projects = self.read()?.projects.clone();

        projects.sort_by_key(|p| p.details().deadline());

        Ok(projects)
    }

    fn project(&self, id: &Uuid) -> Result<Option<Project>, BackendError> {
        Ok(self.read()?.projects.iter().find(|p| p.id() == id).cloned())
    }

    fn replace_project(&self, id: &Uuid, details: ProjectDetails) -> Result<Option<Project>, BackendError> {
        let mut state = self.write()?;

        Ok(state.projects.iter_mut().find(|p| p.id() == id).map(|project| {
            project.replace_details(details);
            project.clone()
        }))
    }

    fn remove_project(&self, id: &Uuid) -> Result<(), BackendError> {
        let mut state = self.write()?;
        let before = state.projects.len();

        state.projects.retain(|p| p.id() != id);

        if state.projects.len() == before {
            Err(BackendError::NonExistentId(*id))
        } else {
            Ok(())
        }
    }

    fn add_group(&self, name: String, created_at: OffsetDateTime) -> Result<Group, BackendError> {
        let mut state = self.write()?;

        if state.groups.iter().any(|g| g.name() == name) {
            return Err(BackendError::GroupNameAlreadyExists);
        }

        let group = Group::new(Uuid::new_v4(), name, created_at);
        state.groups.push(group.clone());

        Ok(group)
    }

    fn groups(&self) -> Result<Vec<GroupRecord>, BackendError> {
        let state = self.read()?;

        Ok(state.groups.iter().map(|g| record_for(&state, g)).collect())
    }

    fn group(&self, id: &Uuid) -> Result<Option<GroupRecord>, BackendError> {
        let state = self.read()?;

        Ok(state
            .groups
            .iter()
            .find(|g| g.id() == id)
            .map(|g| record_for(&state, g)))
    }

    fn remove_group(&self, id: &Uuid) -> Result<(), BackendError> {
        let mut state = self.write()?;
        let before = state.groups.len();

        state.groups.retain(|g| g.id() != id);

        if state.groups.len() == before {
            return Err(BackendError::NonExistentId(*id));
        }

        state.ratings.retain(|(group_id, _, _)| group_id != id);
        state.members.retain(|(group_id, _)| group_id != id);

        Ok(())
    }

    fn join(&self, id: &Uuid, member: &IdentityKey) -> Result<(), BackendError> {
        let mut state = self.write()?;

        if !state.groups.iter().any(|g| g.id() == id) {
            return Err(BackendError::NonExistentId(*id));
        }

        if !state
            .members
            .iter()
            .any(|(group_id, existing)| group_id == id && existing == member)
        {
            state.members.push((*id, member.clone()));
        }

        Ok(())
    }

    fn leave(&self, id: &Uuid, member: &IdentityKey) -> Result<(), BackendError> {
        let mut state = self.write()?;
        let before = state.members.len();

        state
            .members
            .retain(|(group_id, existing)| !(group_id == id && existing == member));

        if state.members.len() == before {
            Err(BackendError::NonExistentId(*id))
        } else {
            Ok(())
        }
    }

    fn rate(&self, id: &Uuid, rating: NewRating) -> Result<(), BackendError> {
        let mut state = self.write()?;

        if !state.groups.iter().any(|g| g.id() == id) {
            return Err(BackendError::NonExistentId(*id));
        }

        let NewRating { rater, scores } = rating;

        match state
            .ratings
            .iter_mut()
            .find(|(group_id, existing, _)| group_id == id && *existing == rater)
        {
            Some(entry) => entry.2 = scores,
            None => state.ratings.push((*id, rater, scores)),
        }

        Ok(())
    }

    fn unrate(&self, id: &Uuid, rater: &IdentityKey) -> Result<(), BackendError> {
        let mut state = self.write()?;
        let before = state.ratings.len();

        state
            .ratings
            .retain(|(group_id, existing, _)| !(group_id == id && existing == rater));

        if state.ratings.len() == before {
            Err(BackendError::NonExistentId(*id))
        } else {
            Ok(())
        }
    }
}

fn latest_for(state: &State, identity: &IdentityKey) -> Option<OffsetDateTime> {
    state
        .submissions
        .iter()
        .filter(|r| r.identity() == identity)
        .map(ActivityRecord::created_at)
        .max()
}

fn record_for(state: &State, group: &Group) -> GroupRecord {
    let id = group.id();

    let scores = state
        .ratings
        .iter()
        .filter(|(group_id, _, _)| group_id == id)
        .map(|(_, _, scores)| *scores)
        .collect();

    let mut members: Vec<IdentityKey> = state
        .members
        .iter()
        .filter(|(group_id, _)| group_id == id)
        .map(|(_, member)| member.clone())
        .collect();
    members.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    GroupRecord::new(group.clone(), scores, members)
}

impl PriorSubmissions for MemoryDb {
    fn latest_submission(
        &self,
        identity: &IdentityKey,
    ) -> BoxFuture<Result<Option<OffsetDateTime>, BackendError>> {
        future::ready(self.latest(identity)).boxed()
    }
}

impl Db for MemoryDb {
    fn count_submissions(&self) -> BoxFuture<Result<i64, BackendError>> {
        let count = self.read().map(|state| state.submissions.len() as i64);

        future::ready(count).boxed()
    }

    fn count_branches(&self) -> BoxFuture<Result<Vec<BranchCount>, BackendError>> {
        future::ready(self.branches()).boxed()
    }

    fn insert_submission(
        &self,
        submission: NewSubmission,
        cool_down: Duration,
    ) -> BoxFuture<Result<Insertion, BackendError>> {
        future::ready(self.insert(submission, cool_down)).boxed()
    }

    fn retrieve_submissions(
        &self,
        since: Option<OffsetDateTime>,
    ) -> BoxFuture<Result<Vec<ActivityRecord>, BackendError>> {
        future::ready(self.submissions(since)).boxed()
    }

    fn retrieve_submission(&self, id: &Uuid) -> BoxFuture<Result<Option<ActivityRecord>, BackendError>> {
        future::ready(self.submission(id)).boxed()
    }

    fn create_project(
        &self,
        details: ProjectDetails,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<Project, BackendError>> {
        let project = self.write().map(|mut state| {
            let project = Project::new(Uuid::new_v4(), details, created_at);
            state.projects.push(project.clone());
            project
        });

        future::ready(project).boxed()
    }

    fn retrieve_projects(&self) -> BoxFuture<Result<Vec<Project>, BackendError>> {
        future::ready(self.projects()).boxed()
    }

    fn retrieve_project(&self, id: &Uuid) -> BoxFuture<Result<Option<Project>, BackendError>> {
        future::ready(self.project(id)).boxed()
    }

    fn update_project(
        &self,
        id: &Uuid,
        details: ProjectDetails,
    ) -> BoxFuture<Result<Option<Project>, BackendError>> {
        future::ready(self.replace_project(id, details)).boxed()
    }

    fn delete_project(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.remove_project(id)).boxed()
    }

    fn create_group(
        &self,
        name: String,
        created_at: OffsetDateTime,
    ) -> BoxFuture<Result<Group, BackendError>> {
        future::ready(self.add_group(name, created_at)).boxed()
    }

    fn retrieve_groups(&self) -> BoxFuture<Result<Vec<GroupRecord>, BackendError>> {
        future::ready(self.groups()).boxed()
    }

    fn retrieve_group(&self, id: &Uuid) -> BoxFuture<Result<Option<GroupRecord>, BackendError>> {
        future::ready(self.group(id)).boxed()
    }

    fn delete_group(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.remove_group(id)).boxed()
    }

    fn rate_group(
        &self,
        id: &Uuid,
        rating: NewRating,
        _created_at: OffsetDateTime,
    ) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.rate(id, rating)).boxed()
    }

    fn remove_rating(&self, id: &Uuid, rater: &IdentityKey) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.unrate(id, rater)).boxed()
    }

    fn join_group(
        &self,
        id: &Uuid,
        member: &IdentityKey,
        _created_at: OffsetDateTime,
    ) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.join(id, member)).boxed()
    }

    fn leave_group(&self, id: &Uuid, member: &IdentityKey) -> BoxFuture<Result<(), BackendError>> {
        future::ready(self.leave(id, member)).boxed()
    }
}

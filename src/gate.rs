//! Admission control for activity submissions.
//!
//! An identity may have at most one accepted submission per cool-down
//! window. [`try_admit`] makes the decision from the most recent prior
//! submission; [`Gatekeeper::submit`] wraps it together with the write
//! so that concurrent submissions for one identity cannot both pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use log::{debug, o, warn, Logger};
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::{Db, Insertion};
use crate::errors::BackendError;
use crate::identity::IdentityKey;
use crate::submission::{ActivityRecord, NewSubmission};
use crate::timestamp;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Accepted,
    Rejected { next_eligible_time: OffsetDateTime },
}

/// Looks up when an identity last had a submission accepted.
pub trait PriorSubmissions {
    /// Returns the latest `created_at` recorded for the identity.
    fn latest_submission(
        &self,
        identity: &IdentityKey,
    ) -> BoxFuture<Result<Option<OffsetDateTime>, BackendError>>;
}

/// Decides admission given the latest prior submission time.
///
/// ```
/// use intern_tracker::gate::{decide, Admission};
/// use time::{Duration, OffsetDateTime};
///
/// let prior = OffsetDateTime::from_unix_timestamp(0);
/// let at = prior + Duration::hours(11);
///
/// assert_eq!(
///     decide(Some(prior), at, Duration::hours(12)),
///     Admission::Rejected { next_eligible_time: prior + Duration::hours(12) }
/// );
/// assert_eq!(decide(None, at, Duration::hours(12)), Admission::Accepted);
/// ```
pub fn decide(
    prior: Option<OffsetDateTime>,
    submitted_at: OffsetDateTime,
    cool_down: Duration,
) -> Admission {
    match prior {
        None => Admission::Accepted,
        Some(prior) => {
            let next_eligible_time = prior + cool_down;

            if submitted_at >= next_eligible_time {
                Admission::Accepted
            } else {
                Admission::Rejected { next_eligible_time }
            }
        }
    }
}

/// Fetches the latest prior submission for `identity` and decides
/// whether a submission at `submitted_at` is admitted. Has no side
/// effects.
pub async fn try_admit<L: PriorSubmissions + ?Sized>(
    identity: &IdentityKey,
    submitted_at: OffsetDateTime,
    cool_down: Duration,
    lookup: &L,
) -> Result<Admission, BackendError> {
    let prior = lookup.latest_submission(identity).await?;

    Ok(decide(prior, submitted_at, cool_down))
}

/// One async mutex per identity key. Entries nobody holds or waits on
/// are pruned whenever a new lock is taken.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<IdentityKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, identity: &IdentityKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

            locks.retain(|_, lock| Arc::strong_count(lock) > 1);

            locks
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        lock.lock_owned().await
    }

    /// The number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Admits and persists submissions, one identity at a time.
pub struct Gatekeeper {
    cool_down: Duration,
    locks: KeyedLocks,
}

impl Gatekeeper {
    pub fn new(cool_down: Duration) -> Self {
        Gatekeeper {
            cool_down,
            locks: KeyedLocks::default(),
        }
    }

    pub fn cool_down(&self) -> Duration {
        self.cool_down
    }

    /// Whether a submission by `identity` at `at` would be admitted.
    pub async fn eligibility<L: PriorSubmissions + ?Sized>(
        &self,
        identity: &IdentityKey,
        at: OffsetDateTime,
        lookup: &L,
    ) -> Result<Admission, BackendError> {
        try_admit(identity, at, self.cool_down, lookup).await
    }

    /// Admits the submission and stores it, or fails with
    /// `CoolDownActive`. The per-identity lock is held from the check
    /// until the write completes; the store's conditional insert covers
    /// writers in other processes, and when it declines, the window is
    /// measured from the submission that got there first.
    pub async fn submit(
        &self,
        logger: &Logger,
        db: &(dyn Db + Send + Sync),
        submission: NewSubmission,
    ) -> Result<ActivityRecord, BackendError> {
        let identity = submission.identity().clone();
        let submitted_at = submission.submitted_at();
        let logger = logger.new(o!("identity" => identity.to_string()));

        let _guard = self.locks.lock(&identity).await;

        debug!(logger, "Checking cool-down...");
        if let Admission::Rejected { next_eligible_time } =
            try_admit(&identity, submitted_at, self.cool_down, db).await?
        {
            return Err(BackendError::CoolDownActive { next_eligible_time });
        }

        debug!(logger, "Writing submission...");
        match db.insert_submission(submission, self.cool_down).await? {
            Insertion::Inserted(record) => Ok(record),
            Insertion::Declined { latest } => {
                warn!(logger, "Conditional insert declined an admitted submission"; "latest" => timestamp::format(latest));

                Err(BackendError::CoolDownActive {
                    next_eligible_time: latest + self.cool_down,
                })
            }
        }
    }
}

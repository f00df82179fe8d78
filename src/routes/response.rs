use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SuccessResponse<'a> {
    Count(i64),
    Eligibility {
        eligible: bool,
        /// Unix seconds, rounded up; absent when eligible.
        next_eligible_time: Option<i64>,
    },
    Healthz {
        revision: Option<&'a str>,
        timestamp: Option<&'a str>,
        version: &'a str,
    },
}

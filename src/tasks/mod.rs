use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub mod backup;
pub mod job;
pub mod lifecycle;
pub mod policy;
pub mod restore;
pub mod retention;
pub mod schedule;

/// Backup source PVC, mounted read-only in backup Jobs.
pub const DATA_PATH: &str = "/data";
/// Shared storage PVC as seen by backup Jobs.
pub const BACKUP_OUTPUT_PATH: &str = "/backup-output";
/// Shared storage PVC as seen by restore Jobs, read-only.
pub const BACKUP_SOURCE_PATH: &str = "/backup-source";
/// Restore destination PVC.
pub const RESTORE_TARGET_PATH: &str = "/restore-target";

/// Longest name a Job can carry; it becomes the `job-name` label on its pods.
pub const MAX_JOB_NAME_LENGTH: usize = 63;

pub fn job_name(owner: &str) -> String {
    format!("{owner}-job")
}

/// Rejects owners whose Job name the API server would refuse.
pub fn check_job_name(owner: &str) -> Result<(), String> {
    let job = job_name(owner);
    if job.len() > MAX_JOB_NAME_LENGTH {
        return Err(format!(
            "Job name {job} is {} characters long, the limit is {MAX_JOB_NAME_LENGTH}",
            job.len()
        ));
    }
    Ok(())
}

/// Name of the Backup a policy creates for the interval starting at `slot`.
pub fn backup_name(policy: &str, slot: DateTime<Utc>) -> String {
    format!("{policy}-{}", slot.format("%Y%m%d-%H%M%S"))
}

pub fn archive_file(backup: &str) -> String {
    format!("{backup}.tar.gz")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

/// Read-only view over the conditions already stored on an object.
pub struct Conditions<'a>(&'a [Condition]);

impl<'a> Conditions<'a> {
    pub fn new(conditions: &'a [Condition]) -> Self {
        Self(conditions)
    }

    pub fn get(&self, type_: &str) -> Option<&'a Condition> {
        self.0.iter().find(|x| x.type_ == type_)
    }
}

pub struct PartialCondition {
    pub status: ConditionStatus,
    pub reason: &'static str,
    pub message: String,
}

impl PartialCondition {
    pub fn new(status: ConditionStatus, reason: &'static str, message: impl Into<String>) -> Self {
        Self { status, reason, message: message.into() }
    }

    /// Build the full condition. `lastTransitionTime` is carried over from `prev` when the
    /// condition's type and status haven't changed.
    pub fn into_condition(
        self, type_: &str, generation: Option<i64>, prev: &Conditions<'_>, now: DateTime<Utc>,
    ) -> Condition {
        let status = self.status.as_str();
        let last_transition_time = prev
            .get(type_)
            .filter(|x| x.status == status)
            .map_or_else(|| Time(now), |x| x.last_transition_time.clone());

        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: self.reason.to_string(),
            message: self.message,
            last_transition_time,
            observed_generation: generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn names_follow_conventions() {
        let slot = Utc.with_ymd_and_hms(2026, 3, 7, 2, 0, 0).unwrap();
        assert_eq!(backup_name("nightly", slot), "nightly-20260307-020000");
        assert_eq!(job_name("nightly-20260307-020000"), "nightly-20260307-020000-job");
        assert_eq!(archive_file("nightly-20260307-020000"), "nightly-20260307-020000.tar.gz");
    }

    #[test]
    fn job_names_stay_within_label_limit() {
        assert!(check_job_name(&"a".repeat(59)).is_ok());
        let err = check_job_name(&"a".repeat(60)).unwrap_err();
        assert!(err.ends_with("is 64 characters long, the limit is 63"), "{err}");

        let slot = Utc.with_ymd_and_hms(2026, 3, 7, 2, 0, 0).unwrap();
        assert!(check_job_name(&backup_name(&"p".repeat(43), slot)).is_ok());
        assert!(check_job_name(&backup_name(&"p".repeat(44), slot)).is_err());
    }

    #[test]
    fn transition_time_survives_identical_status() {
        let then = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let first = PartialCondition::new(ConditionStatus::True, "Scheduled", "Next at 02:00")
            .into_condition("Ready", Some(1), &Conditions::new(&[]), then);
        assert_eq!(first.last_transition_time, Time(then));

        let stored = [first];
        let prev = Conditions::new(&stored);
        let same = PartialCondition::new(ConditionStatus::True, "BackupCreated", "Created")
            .into_condition("Ready", Some(1), &prev, now);
        assert_eq!(same.last_transition_time, Time(then));
        assert_eq!(same.reason, "BackupCreated");

        let flipped = PartialCondition::new(ConditionStatus::False, "InvalidSchedule", "bad")
            .into_condition("Ready", Some(2), &prev, now);
        assert_eq!(flipped.last_transition_time, Time(now));
        assert_eq!(flipped.observed_generation, Some(2));
    }
}

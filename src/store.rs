//! Data-access boundary for the indicator engine.
//!
//! Each method maps to one read-only query against the learning platform's
//! tables. Aggregation that the platform leaves to application code (per-user
//! submission tallies, zero-filling, row numbering) happens in the engine.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CourseActivity, ResourceVisualization, SubmissionRow, TimeWindow, UserRow};

/// Components counted as "resources" when tallying views.
pub const RESOURCE_COMPONENTS: [&str; 5] = [
    "mod_resource",
    "mod_book",
    "mod_url",
    "mod_folder",
    "mod_page",
];

pub const VIEWED_ACTION: &str = "viewed";
pub const SUBMITTED_STATUS: &str = "submitted";
pub const MODULE_COMPONENT_PATTERN: &str = "mod_%";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("{0:?} is not a valid table identifier")]
    InvalidIdentifier(String),
    #[error("failed to read snapshot: {0}")]
    SnapshotIo(#[from] std::io::Error),
    #[error("failed to parse snapshot: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

#[async_trait]
pub trait IndicatorStore: Send + Sync {
    async fn course_exists(&self, course_id: i64) -> Result<bool, StoreError>;

    /// Every user on the site, ordered by id.
    async fn all_users(&self) -> Result<Vec<UserRow>, StoreError>;

    /// Users whose id is in `ids`, ordered by id. Unknown ids are skipped.
    async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>, StoreError>;

    /// Messages in conversations `user_id` belongs to, sent by someone else.
    async fn incoming_message_count(&self, user_id: i64) -> Result<i64, StoreError>;

    async fn outgoing_message_count(&self, user_id: i64) -> Result<i64, StoreError>;

    /// Users with a last-access record for the course, optionally restricted
    /// to accesses inside `window`.
    async fn last_access_user_ids(
        &self,
        course_id: i64,
        window: Option<TimeWindow>,
    ) -> Result<Vec<i64>, StoreError>;

    async fn course_activities(&self, course_id: i64) -> Result<Vec<CourseActivity>, StoreError>;

    /// Distinct interacting users per context instance, for `mod_*` log
    /// events in the course. Contexts without events are absent.
    async fn activity_interaction_counts(
        &self,
        course_id: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError>;

    /// `viewed` events per (user, context) for the given components, ordered
    /// by context instance then user. Row ids are not meaningful.
    async fn resource_visualizations(
        &self,
        course_id: i64,
        components: &[&str],
    ) -> Result<Vec<ResourceVisualization>, StoreError>;

    /// Submissions with status `submitted` on the course's assignments,
    /// ordered by submission id.
    async fn submitted_assignments(&self, course_id: i64) -> Result<Vec<SubmissionRow>, StoreError>;
}

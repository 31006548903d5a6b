use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMessageSummary {
    pub id: i64,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub incoming_messages: i64,
    pub outgoing_messages: i64,
}

/// One entry of a course's activity list, as the platform enumerates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseActivity {
    pub context_instance_id: i64,
    pub module_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityInteraction {
    pub id: i64,
    pub context_instance_id: i64,
    pub module_type: String,
    pub name: String,
    pub interaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ResourceVisualization {
    pub id: i64,
    pub context_instance_id: i64,
    pub component: String,
    pub user_id: i64,
    pub visualization_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedActivities {
    pub id: i64,
    pub user_id: i64,
    pub completed_count: i64,
}

/// A submitted assignment attempt, before per-user aggregation.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: i64,
    pub user_id: i64,
}

/// Inclusive range of unix timestamps used to filter last-access records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    /// A window only exists when both bounds are given; a lone bound is ignored.
    pub fn from_bounds(start: Option<i64>, end: Option<i64>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(Self { start, end }),
            _ => None,
        }
    }

    pub fn trailing_week(now: DateTime<Utc>) -> Self {
        Self {
            start: (now - Duration::weeks(1)).timestamp(),
            end: now.timestamp(),
        }
    }

    /// The week before [`TimeWindow::trailing_week`].
    pub fn previous_week(now: DateTime<Utc>) -> Self {
        Self::trailing_week(now - Duration::weeks(1))
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Rows whose `id` is a positional row number rather than a database key.
pub trait Reindex {
    fn set_row_id(&mut self, id: i64);
}

impl Reindex for UserRow {
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Reindex for ActivityInteraction {
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Reindex for ResourceVisualization {
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Reindex for CompletedActivities {
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
}

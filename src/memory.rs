//! In-process store over a JSON snapshot of the platform tables.
//!
//! Mirrors the SQL issued by [`crate::db::PgStore`] so reports can be produced
//! offline and engine behaviour can be tested without a database.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{CourseActivity, ResourceVisualization, SubmissionRow, TimeWindow, UserRow};
use crate::store::{IndicatorStore, StoreError, SUBMITTED_STATUS, VIEWED_ACTION};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRecord {
    pub conversation_id: i64,
    pub from_user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MembershipRecord {
    pub user_id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub course_id: i64,
    pub context_instance_id: i64,
    pub component: String,
    pub action: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    pub course_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub user_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LastAccessRecord {
    pub user_id: i64,
    pub course_id: i64,
    pub time_access: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivityRecord {
    pub course_id: i64,
    #[serde(flatten)]
    pub activity: CourseActivity,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryStore {
    pub courses: Vec<i64>,
    pub users: Vec<UserRow>,
    pub messages: Vec<MessageRecord>,
    pub memberships: Vec<MembershipRecord>,
    pub logs: Vec<LogRecord>,
    pub assignments: Vec<AssignmentRecord>,
    pub submissions: Vec<SubmissionRecord>,
    pub last_access: Vec<LastAccessRecord>,
    pub activities: Vec<ActivityRecord>,
}

impl MemoryStore {
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// `LIKE 'mod_%'`: "mod" followed by at least one more character.
fn is_module_component(component: &str) -> bool {
    component.starts_with("mod") && component.chars().count() > 3
}

#[async_trait]
impl IndicatorStore for MemoryStore {
    async fn course_exists(&self, course_id: i64) -> Result<bool, StoreError> {
        Ok(self.courses.contains(&course_id))
    }

    async fn all_users(&self) -> Result<Vec<UserRow>, StoreError> {
        let mut users = self.users.clone();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>, StoreError> {
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        let mut users: Vec<UserRow> = self
            .users
            .iter()
            .filter(|user| wanted.contains(&user.id))
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn incoming_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
        let count = self
            .memberships
            .iter()
            .filter(|member| member.user_id == user_id)
            .flat_map(|member| {
                self.messages
                    .iter()
                    .filter(move |message| message.conversation_id == member.conversation_id)
            })
            .filter(|message| message.from_user_id != user_id)
            .count();
        Ok(count as i64)
    }

    async fn outgoing_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
        let count = self
            .messages
            .iter()
            .filter(|message| message.from_user_id == user_id)
            .count();
        Ok(count as i64)
    }

    async fn last_access_user_ids(
        &self,
        course_id: i64,
        window: Option<TimeWindow>,
    ) -> Result<Vec<i64>, StoreError> {
        let ids: BTreeSet<i64> = self
            .last_access
            .iter()
            .filter(|record| record.course_id == course_id)
            .filter(|record| window.map_or(true, |w| w.contains(record.time_access)))
            .map(|record| record.user_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn course_activities(&self, course_id: i64) -> Result<Vec<CourseActivity>, StoreError> {
        Ok(self
            .activities
            .iter()
            .filter(|record| record.course_id == course_id)
            .map(|record| record.activity.clone())
            .collect())
    }

    async fn activity_interaction_counts(
        &self,
        course_id: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        let unique: BTreeSet<(i64, i64)> = self
            .logs
            .iter()
            .filter(|log| log.course_id == course_id && is_module_component(&log.component))
            .map(|log| (log.context_instance_id, log.user_id))
            .collect();

        let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
        for (context_instance_id, _) in unique {
            *counts.entry(context_instance_id).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn resource_visualizations(
        &self,
        course_id: i64,
        components: &[&str],
    ) -> Result<Vec<ResourceVisualization>, StoreError> {
        let mut groups: BTreeMap<(i64, i64, String), (i64, i64)> = BTreeMap::new();

        for log in self.logs.iter().filter(|log| {
            log.course_id == course_id
                && log.action == VIEWED_ACTION
                && components.contains(&log.component.as_str())
        }) {
            let entry = groups
                .entry((log.context_instance_id, log.user_id, log.component.clone()))
                .or_insert((log.id, 0));
            entry.0 = entry.0.min(log.id);
            entry.1 += 1;
        }

        Ok(groups
            .into_iter()
            .map(
                |((context_instance_id, user_id, component), (id, visualization_count))| {
                    ResourceVisualization {
                        id,
                        context_instance_id,
                        component,
                        user_id,
                        visualization_count,
                    }
                },
            )
            .collect())
    }

    async fn submitted_assignments(
        &self,
        course_id: i64,
    ) -> Result<Vec<SubmissionRow>, StoreError> {
        let course_assignments: HashSet<i64> = self
            .assignments
            .iter()
            .filter(|assignment| assignment.course_id == course_id)
            .map(|assignment| assignment.id)
            .collect();

        let mut rows: Vec<SubmissionRow> = self
            .submissions
            .iter()
            .filter(|submission| {
                submission.status == SUBMITTED_STATUS
                    && course_assignments.contains(&submission.assignment_id)
            })
            .map(|submission| SubmissionRow {
                id: submission.id,
                user_id: submission.user_id,
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }
}

/// Wraps a [`MemoryStore`] and injects one failure mode, for error-path tests.
#[cfg(test)]
pub mod faults {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Fault {
        /// `course_activities` returns an error.
        FailActivities,
        /// `all_users` never finishes in practice.
        StallUsers,
    }

    pub struct FaultyStore {
        pub inner: MemoryStore,
        pub fault: Fault,
    }

    #[async_trait]
    impl IndicatorStore for FaultyStore {
        async fn course_exists(&self, course_id: i64) -> Result<bool, StoreError> {
            self.inner.course_exists(course_id).await
        }

        async fn all_users(&self) -> Result<Vec<UserRow>, StoreError> {
            if self.fault == Fault::StallUsers {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            self.inner.all_users().await
        }

        async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>, StoreError> {
            self.inner.users_by_ids(ids).await
        }

        async fn incoming_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
            self.inner.incoming_message_count(user_id).await
        }

        async fn outgoing_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
            self.inner.outgoing_message_count(user_id).await
        }

        async fn last_access_user_ids(
            &self,
            course_id: i64,
            window: Option<TimeWindow>,
        ) -> Result<Vec<i64>, StoreError> {
            self.inner.last_access_user_ids(course_id, window).await
        }

        async fn course_activities(
            &self,
            course_id: i64,
        ) -> Result<Vec<CourseActivity>, StoreError> {
            if self.fault == Fault::FailActivities {
                return Err(StoreError::InvalidIdentifier("mod-broken".to_string()));
            }
            self.inner.course_activities(course_id).await
        }

        async fn activity_interaction_counts(
            &self,
            course_id: i64,
        ) -> Result<Vec<(i64, i64)>, StoreError> {
            self.inner.activity_interaction_counts(course_id).await
        }

        async fn resource_visualizations(
            &self,
            course_id: i64,
            components: &[&str],
        ) -> Result<Vec<ResourceVisualization>, StoreError> {
            self.inner.resource_visualizations(course_id, components).await
        }

        async fn submitted_assignments(
            &self,
            course_id: i64,
        ) -> Result<Vec<SubmissionRow>, StoreError> {
            self.inner.submitted_assignments(course_id).await
        }
    }
}

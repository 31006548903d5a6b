use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{
    ActivityInteraction, CompletedActivities, Reindex, ResourceVisualization, TimeWindow,
    UserMessageSummary, UserRow,
};
use crate::store::{IndicatorStore, StoreError, RESOURCE_COMPONENTS};

/// Overwrites each row's `id` with its position. Run after sorting and filtering.
pub fn reindex<T: Reindex>(mut rows: Vec<T>) -> Vec<T> {
    for (position, row) in rows.iter_mut().enumerate() {
        row.set_row_id(position as i64);
    }
    rows
}

/// Every indicator table for one course, in page order.
#[derive(Debug, Clone, Serialize)]
pub struct CourseReport {
    pub course_id: i64,
    pub generated_at: DateTime<Utc>,
    pub user_messages: Vec<UserMessageSummary>,
    pub students_with_access: Vec<UserRow>,
    pub active_last_week: Vec<UserRow>,
    pub active_previous_week: Vec<UserRow>,
    pub activity_interactions: Vec<ActivityInteraction>,
    pub resource_visualizations: Vec<ResourceVisualization>,
    pub completed_activities: Vec<CompletedActivities>,
}

pub struct IndicatorEngine<S> {
    store: S,
}

impl<S: IndicatorStore> IndicatorEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn list_all_users(&self) -> Result<Vec<UserRow>, StoreError> {
        self.store.all_users().await
    }

    pub async fn count_incoming_messages(&self, user_id: i64) -> Result<i64, StoreError> {
        self.store.incoming_message_count(user_id).await
    }

    pub async fn count_outgoing_messages(&self, user_id: i64) -> Result<i64, StoreError> {
        self.store.outgoing_message_count(user_id).await
    }

    /// Two count queries per user, in input order.
    pub async fn build_user_message_summary(
        &self,
        users: &[UserRow],
    ) -> Result<Vec<UserMessageSummary>, StoreError> {
        let mut summaries = Vec::with_capacity(users.len());

        for user in users {
            summaries.push(UserMessageSummary {
                id: user.id,
                username: user.username.clone(),
                firstname: user.firstname.clone(),
                lastname: user.lastname.clone(),
                incoming_messages: self.count_incoming_messages(user.id).await?,
                outgoing_messages: self.count_outgoing_messages(user.id).await?,
            });
        }

        Ok(summaries)
    }

    pub async fn list_students_with_last_access(
        &self,
        course_id: i64,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<UserRow>, StoreError> {
        let window = TimeWindow::from_bounds(start_time, end_time);
        let ids = self.store.last_access_user_ids(course_id, window).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = self.store.users_by_ids(&ids).await?;
        Ok(reindex(users))
    }

    pub async fn list_active_users_by_course(
        &self,
        course_id: i64,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<UserRow>, StoreError> {
        self.list_active_users_by_course_at(course_id, start_time, end_time, Utc::now())
            .await
    }

    /// Without bounds, the window is the week ending at `now`.
    pub async fn list_active_users_by_course_at(
        &self,
        course_id: i64,
        start_time: Option<i64>,
        end_time: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserRow>, StoreError> {
        let (start_time, end_time) = match (start_time, end_time) {
            (None, None) => {
                let week = TimeWindow::trailing_week(now);
                (Some(week.start), Some(week.end))
            }
            bounds => bounds,
        };

        self.list_students_with_last_access(course_id, start_time, end_time)
            .await
    }

    pub async fn count_activity_interactions(
        &self,
        course_id: i64,
    ) -> Result<Vec<ActivityInteraction>, StoreError> {
        let activities = self.store.course_activities(course_id).await?;
        let counts: HashMap<i64, i64> = self
            .store
            .activity_interaction_counts(course_id)
            .await?
            .into_iter()
            .collect();

        let rows = activities
            .into_iter()
            .map(|activity| ActivityInteraction {
                id: activity.context_instance_id,
                interaction_count: counts
                    .get(&activity.context_instance_id)
                    .copied()
                    .unwrap_or(0),
                context_instance_id: activity.context_instance_id,
                module_type: activity.module_type,
                name: activity.name,
            })
            .collect();

        Ok(reindex(rows))
    }

    pub async fn count_resource_visualizations(
        &self,
        course_id: i64,
    ) -> Result<Vec<ResourceVisualization>, StoreError> {
        let rows = self
            .store
            .resource_visualizations(course_id, &RESOURCE_COMPONENTS)
            .await?;
        Ok(reindex(rows))
    }

    /// Users without a submitted assignment do not appear.
    pub async fn count_completed_activities(
        &self,
        course_id: i64,
    ) -> Result<Vec<CompletedActivities>, StoreError> {
        let submissions = self.store.submitted_assignments(course_id).await?;

        let mut rows: Vec<CompletedActivities> = Vec::new();
        let mut positions: HashMap<i64, usize> = HashMap::new();

        for submission in submissions {
            match positions.get(&submission.user_id) {
                Some(&position) => rows[position].completed_count += 1,
                None => {
                    positions.insert(submission.user_id, rows.len());
                    rows.push(CompletedActivities {
                        id: submission.id,
                        user_id: submission.user_id,
                        completed_count: 1,
                    });
                }
            }
        }

        Ok(reindex(rows))
    }

    pub async fn build_report(&self, course_id: i64) -> Result<CourseReport, StoreError> {
        self.build_report_at(course_id, Utc::now()).await
    }

    pub async fn build_report_at(
        &self,
        course_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CourseReport, StoreError> {
        info!(course_id, "building course indicators");

        let users = self.list_all_users().await?;
        let user_messages = self.build_user_message_summary(&users).await?;
        debug!(rows = user_messages.len(), "user message summary");

        let students_with_access = self
            .list_students_with_last_access(course_id, None, None)
            .await?;
        debug!(rows = students_with_access.len(), "students with last access");

        let active_last_week = self
            .list_active_users_by_course_at(course_id, None, None, now)
            .await?;
        let previous = TimeWindow::previous_week(now);
        let active_previous_week = self
            .list_active_users_by_course_at(
                course_id,
                Some(previous.start),
                Some(previous.end),
                now,
            )
            .await?;
        debug!(
            last_week = active_last_week.len(),
            previous_week = active_previous_week.len(),
            "active users"
        );

        let activity_interactions = self.count_activity_interactions(course_id).await?;
        debug!(rows = activity_interactions.len(), "activity interactions");

        let resource_visualizations = self.count_resource_visualizations(course_id).await?;
        debug!(rows = resource_visualizations.len(), "resource visualizations");

        let completed_activities = self.count_completed_activities(course_id).await?;
        debug!(rows = completed_activities.len(), "completed activities");

        info!(course_id, users = users.len(), "course indicators ready");

        Ok(CourseReport {
            course_id,
            generated_at: now,
            user_messages,
            students_with_access,
            active_last_week,
            active_previous_week,
            activity_interactions,
            resource_visualizations,
            completed_activities,
        })
    }
}

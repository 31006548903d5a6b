use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::models::{CourseActivity, ResourceVisualization, SubmissionRow, TimeWindow, UserRow};
use crate::store::{
    IndicatorStore, StoreError, MODULE_COMPONENT_PATTERN, SUBMITTED_STATUS, VIEWED_ACTION,
};

/// Postgres-backed store reading the platform's tables under a name prefix.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    prefix: String,
}

impl PgStore {
    pub async fn connect(database_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool, prefix)
    }

    pub fn with_pool(pool: PgPool, prefix: &str) -> Result<Self, StoreError> {
        // An empty prefix would leave reserved words such as `user` as bare table names.
        if prefix.is_empty() || !is_identifier_fragment(prefix) {
            return Err(StoreError::InvalidIdentifier(prefix.to_string()));
        }
        Ok(Self {
            pool,
            prefix: prefix.to_string(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn instance_names(
        &self,
        module: &str,
        instances: &[i64],
    ) -> Result<HashMap<i64, String>, StoreError> {
        if !is_identifier_fragment(module) || module.is_empty() {
            return Err(StoreError::InvalidIdentifier(module.to_string()));
        }

        let query = format!(
            "SELECT id, name FROM {} WHERE id = ANY($1)",
            self.table(module)
        );
        let rows = sqlx::query(&query)
            .bind(instances)
            .fetch_all(&self.pool)
            .await?;

        let mut names = HashMap::new();
        for row in rows {
            names.insert(row.get::<i64, _>("id"), row.get::<String, _>("name"));
        }
        Ok(names)
    }
}

/// Table names cannot be bound as parameters, so anything spliced into SQL
/// must stay within lowercase ASCII, digits and underscores.
fn is_identifier_fragment(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[async_trait]
impl IndicatorStore for PgStore {
    async fn course_exists(&self, course_id: i64) -> Result<bool, StoreError> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            self.table("course")
        );
        let exists = sqlx::query_scalar::<_, bool>(&query)
            .bind(course_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn all_users(&self) -> Result<Vec<UserRow>, StoreError> {
        let query = format!(
            "SELECT id, username, firstname, lastname FROM {} ORDER BY id ASC",
            self.table("user")
        );
        let users = sqlx::query_as::<_, UserRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>, StoreError> {
        let query = format!(
            "SELECT id, username, firstname, lastname FROM {} WHERE id = ANY($1) ORDER BY id ASC",
            self.table("user")
        );
        let users = sqlx::query_as::<_, UserRow>(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn incoming_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
        let query = format!(
            "SELECT COUNT(*) FROM {} mcm \
             INNER JOIN {} m ON mcm.conversationid = m.conversationid \
             WHERE mcm.userid = $1 AND m.useridfrom <> $1",
            self.table("message_conversation_members"),
            self.table("messages")
        );
        let count = sqlx::query_scalar::<_, i64>(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn outgoing_message_count(&self, user_id: i64) -> Result<i64, StoreError> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE useridfrom = $1",
            self.table("messages")
        );
        let count = sqlx::query_scalar::<_, i64>(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn last_access_user_ids(
        &self,
        course_id: i64,
        window: Option<TimeWindow>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut query = format!(
            "SELECT DISTINCT userid FROM {} WHERE courseid = $1",
            self.table("user_lastaccess")
        );

        if window.is_some() {
            query.push_str(" AND timeaccess >= $2 AND timeaccess <= $3");
        }
        query.push_str(" ORDER BY userid ASC");

        let mut rows = sqlx::query_scalar::<_, i64>(&query).bind(course_id);

        if let Some(window) = window {
            rows = rows.bind(window.start).bind(window.end);
        }

        let ids = rows.fetch_all(&self.pool).await?;
        Ok(ids)
    }

    async fn course_activities(&self, course_id: i64) -> Result<Vec<CourseActivity>, StoreError> {
        let query = format!(
            "SELECT cm.id AS cm, m.name AS module, cm.instance \
             FROM {} cm \
             INNER JOIN {} m ON m.id = cm.module \
             WHERE cm.course = $1 AND cm.deletioninprogress = 0 \
             ORDER BY cm.section ASC, cm.id ASC",
            self.table("course_modules"),
            self.table("modules")
        );
        let records = sqlx::query(&query)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?;

        let mut modules: Vec<(i64, String, i64)> = Vec::new();
        let mut instances_by_module: HashMap<String, Vec<i64>> = HashMap::new();

        for row in records {
            let cm: i64 = row.get("cm");
            let module: String = row.get("module");
            let instance: i64 = row.get("instance");
            instances_by_module
                .entry(module.clone())
                .or_default()
                .push(instance);
            modules.push((cm, module, instance));
        }

        let mut names: HashMap<(String, i64), String> = HashMap::new();
        for (module, instances) in &instances_by_module {
            for (instance, name) in self.instance_names(module, instances).await? {
                names.insert((module.clone(), instance), name);
            }
        }

        let activities: Vec<CourseActivity> = modules
            .into_iter()
            .map(|(cm, module, instance)| CourseActivity {
                context_instance_id: cm,
                name: names.remove(&(module.clone(), instance)).unwrap_or_default(),
                module_type: module,
            })
            .collect();

        debug!(course_id, count = activities.len(), "loaded course activities");
        Ok(activities)
    }

    async fn activity_interaction_counts(
        &self,
        course_id: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        let query = format!(
            "SELECT contextinstanceid, COUNT(*) AS interactions \
             FROM ( \
                 SELECT DISTINCT userid, contextinstanceid \
                 FROM {} \
                 WHERE courseid = $1 AND component LIKE $2 \
             ) AS unique_users \
             GROUP BY contextinstanceid \
             ORDER BY contextinstanceid ASC",
            self.table("logstore_standard_log")
        );
        let rows = sqlx::query(&query)
            .bind(course_id)
            .bind(MODULE_COMPONENT_PATTERN)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<i64, _>("contextinstanceid"),
                    row.get::<i64, _>("interactions"),
                )
            })
            .collect())
    }

    async fn resource_visualizations(
        &self,
        course_id: i64,
        components: &[&str],
    ) -> Result<Vec<ResourceVisualization>, StoreError> {
        let query = format!(
            "SELECT MIN(id) AS id, contextinstanceid AS context_instance_id, component, \
                    userid AS user_id, COUNT(*) AS visualization_count \
             FROM {} \
             WHERE courseid = $1 AND component = ANY($2) AND action = $3 \
             GROUP BY userid, contextinstanceid, component \
             ORDER BY contextinstanceid ASC, userid ASC",
            self.table("logstore_standard_log")
        );
        let components: Vec<String> = components.iter().map(|c| c.to_string()).collect();
        let rows = sqlx::query_as::<_, ResourceVisualization>(&query)
            .bind(course_id)
            .bind(components)
            .bind(VIEWED_ACTION)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn submitted_assignments(
        &self,
        course_id: i64,
    ) -> Result<Vec<SubmissionRow>, StoreError> {
        let query = format!(
            "SELECT s.id, s.userid AS user_id FROM {} s \
             INNER JOIN {} a ON s.assignment = a.id \
             WHERE a.course = $1 AND s.status = $2 \
             ORDER BY s.id ASC",
            self.table("assign_submission"),
            self.table("assign")
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&query)
            .bind(course_id)
            .bind(SUBMITTED_STATUS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_fragments_reject_sql_metacharacters() {
        assert!(is_identifier_fragment("mdl_"));
        assert!(is_identifier_fragment("assign"));
        assert!(is_identifier_fragment(""));
        assert!(!is_identifier_fragment("mdl_; DROP TABLE"));
        assert!(!is_identifier_fragment("Course"));
        assert!(!is_identifier_fragment("mod-page"));
    }

    #[tokio::test]
    async fn empty_prefix_is_rejected() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/moodle")
            .expect("lazy pool");

        let err = PgStore::with_pool(pool.clone(), "").unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
        assert!(PgStore::with_pool(pool, "mdl_").is_ok());
    }
}

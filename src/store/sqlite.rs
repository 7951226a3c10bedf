use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::info;

use super::{apply_order_and_page, TaskStore};
use crate::task::{Priority, Task, TaskFilter, TaskStatus};
use crate::{RatchetError, Result};

/// SQLite-backed task store. `rusqlite::Connection` is not `Sync`, so all
/// access goes through a single mutex, the store's one serialized writer.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!(path, "opened sqlite task store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id             TEXT PRIMARY KEY,
                title          TEXT NOT NULL,
                description    TEXT NOT NULL,
                status         TEXT NOT NULL,
                priority       INTEGER NOT NULL,
                assignee_id    TEXT,
                team_id        TEXT,
                parent_id      TEXT,
                prerequisites  TEXT NOT NULL,
                labels         TEXT NOT NULL,
                metadata       TEXT NOT NULL,
                result         TEXT,
                error          TEXT,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL,
                started_at     INTEGER,
                completed_at   INTEGER
            )",
        )?;
        Ok(())
    }

    fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
        let status: String = row.get("status")?;
        let priority: i64 = row.get("priority")?;
        let prerequisites: String = row.get("prerequisites")?;
        let labels: String = row.get("labels")?;
        let metadata: String = row.get("metadata")?;
        let created_at: i64 = row.get("created_at")?;
        let updated_at: i64 = row.get("updated_at")?;
        let started_at: Option<i64> = row.get("started_at")?;
        let completed_at: Option<i64> = row.get("completed_at")?;

        Ok(Task {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            status: decode_status(&status),
            priority: decode_priority(priority),
            assignee_id: row.get("assignee_id")?,
            team_id: row.get("team_id")?,
            parent_id: row.get("parent_id")?,
            prerequisites: serde_json::from_str(&prerequisites).unwrap_or_default(),
            labels: serde_json::from_str(&labels).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: nanos_to_datetime(created_at),
            updated_at: nanos_to_datetime(updated_at),
            started_at: started_at.map(nanos_to_datetime),
            completed_at: completed_at.map(nanos_to_datetime),
        })
    }
}

fn encode_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Assigned => "assigned",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Canceled => "canceled",
    }
}

fn decode_status(s: &str) -> TaskStatus {
    match s {
        "pending" => TaskStatus::Pending,
        "assigned" => TaskStatus::Assigned,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "canceled" => TaskStatus::Canceled,
        other => unreachable!("unknown task status in store: {other}"),
    }
}

fn decode_priority(p: i64) -> Priority {
    match p {
        0 => Priority::Low,
        2 => Priority::High,
        3 => Priority::Critical,
        _ => Priority::Normal,
    }
}

fn datetime_to_nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

#[async_trait::async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: Task) -> Result<String> {
        let conn = self.conn.lock().await;
        let prerequisites = serde_json::to_string(&task.prerequisites)?;
        let labels = serde_json::to_string(&task.labels)?;
        let metadata = serde_json::to_string(&task.metadata)?;
        conn.execute(
            "INSERT INTO tasks (
                id, title, description, status, priority, assignee_id, team_id,
                parent_id, prerequisites, labels, metadata, result, error,
                created_at, updated_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                task.id,
                task.title,
                task.description,
                encode_status(task.status),
                task.priority as i64,
                task.assignee_id,
                task.team_id,
                task.parent_id,
                prerequisites,
                labels,
                metadata,
                task.result,
                task.error,
                datetime_to_nanos(task.created_at),
                datetime_to_nanos(task.updated_at),
                task.started_at.map(datetime_to_nanos),
                task.completed_at.map(datetime_to_nanos),
            ],
        )?;
        Ok(task.id)
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], |row| {
                Self::row_to_task(row)
            })
            .optional()?;
        task.ok_or_else(|| RatchetError::NotFound(format!("task {id}")))
    }

    async fn update(&self, task: Task) -> Result<()> {
        let conn = self.conn.lock().await;
        let prerequisites = serde_json::to_string(&task.prerequisites)?;
        let labels = serde_json::to_string(&task.labels)?;
        let metadata = serde_json::to_string(&task.metadata)?;
        let rows = conn.execute(
            "UPDATE tasks SET
                title = ?2, description = ?3, status = ?4, priority = ?5,
                assignee_id = ?6, team_id = ?7, parent_id = ?8, prerequisites = ?9,
                labels = ?10, metadata = ?11, result = ?12, error = ?13,
                updated_at = ?14, started_at = ?15, completed_at = ?16
            WHERE id = ?1",
            params![
                task.id,
                task.title,
                task.description,
                encode_status(task.status),
                task.priority as i64,
                task.assignee_id,
                task.team_id,
                task.parent_id,
                prerequisites,
                labels,
                metadata,
                task.result,
                task.error,
                datetime_to_nanos(task.updated_at),
                task.started_at.map(datetime_to_nanos),
                task.completed_at.map(datetime_to_nanos),
            ],
        )?;
        if rows == 0 {
            return Err(RatchetError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bound.push(Box::new(encode_status(status).to_string()));
        }
        if let Some(assignee) = &filter.assignee_id {
            sql.push_str(" AND assignee_id = ?");
            bound.push(Box::new(assignee.clone()));
        }
        if let Some(team) = &filter.team_id {
            sql.push_str(" AND team_id = ?");
            bound.push(Box::new(team.clone()));
        }
        if let Some(parent) = &filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            bound.push(Box::new(parent.clone()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), Self::row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }

        // The `label` filter has no dedicated column (labels are stored as a
        // JSON array), so it is applied in-process alongside ordering/paging.
        if let Some(label) = &filter.label {
            tasks.retain(|t| t.labels.iter().any(|l| l == label));
        }

        Ok(apply_order_and_page(tasks, &filter))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(RatchetError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    #[tokio::test]
    async fn create_then_get_round_trips_through_sql() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut task = Task::new("t", "d");
        task.labels = vec!["a".into(), "b".into()];
        task.metadata.insert("k".into(), "v".into());
        let id = store.create(task.clone()).await.unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.title, "t");
        assert_eq!(fetched.labels, vec!["a", "b"]);
        assert_eq!(fetched.metadata.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn update_on_missing_row_is_not_found() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = Task::new("t", "d");
        assert!(matches!(
            store.update(task).await,
            Err(RatchetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_orders_by_priority_then_created_at() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut low = Task::new("low", "d").with_priority(Priority::Low);
        let mut crit = Task::new("crit", "d").with_priority(Priority::Critical);
        low.transition(TaskStatus::Assigned).unwrap();
        crit.transition(TaskStatus::Assigned).unwrap();
        let done = Task::new("done", "d");

        store.create(low).await.unwrap();
        store.create(crit).await.unwrap();
        store.create(done).await.unwrap();

        let filter = TaskFilter {
            status: Some(TaskStatus::Assigned),
            ..Default::default()
        };
        let results = store.list(filter).await.unwrap();
        let titles: Vec<&str> = results.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["crit", "low"]);
    }

    #[tokio::test]
    async fn list_by_label_filters_on_json_encoded_column() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut tagged = Task::new("tagged", "d");
        tagged.labels = vec!["urgent".into()];
        let untagged = Task::new("untagged", "d");

        store.create(tagged).await.unwrap();
        store.create(untagged).await.unwrap();

        let filter = TaskFilter {
            label: Some("urgent".into()),
            ..Default::default()
        };
        let results = store.list(filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "tagged");
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        assert!(matches!(
            store.delete("missing").await,
            Err(RatchetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn started_and_completed_at_round_trip_as_null_until_set() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = Task::new("t", "d");
        let id = store.create(task).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert!(fetched.started_at.is_none());
        assert!(fetched.completed_at.is_none());

        let mut in_progress = fetched;
        in_progress.transition(TaskStatus::InProgress).unwrap();
        store.update(in_progress.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert!(fetched.started_at.is_some());
        assert!(fetched.completed_at.is_none());
    }
}

use mongodb::bson::{Bson, DateTime};
use serde::{Deserialize, Serialize};

use super::project::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Completed,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Bug,
    Feature,
    Improvement,
    Documentation,
    Testing,
    Other,
}

impl Default for TaskCategory {
    fn default() -> Self {
        TaskCategory::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Blocks,
    BlockedBy,
    Related,
}

impl Default for DependencyKind {
    fn default() -> Self {
        DependencyKind::Related
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomFieldKind {
    Text,
    Number,
    Date,
    Boolean,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: i64,
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub user: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_edited: bool,
    pub edited_at: Option<DateTime>,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime>,
    pub created_at: DateTime,
}

/// Dependency on another task. No cycle detection is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub task: String,
    #[serde(rename = "type", default)]
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub value: Bson,
    #[serde(rename = "type")]
    pub kind: CustomFieldKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeEntry {
    pub user: String,
    pub start_time: Option<DateTime>,
    pub end_time: Option<DateTime>,
    /// Minutes.
    #[serde(default)]
    pub duration: i64,
    pub description: Option<String>,
    pub date: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub project: String,
    pub assigned_to: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: TaskCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub due_date: Option<DateTime>,
    #[serde(default)]
    pub estimated_hours: f64,
    #[serde(default)]
    pub actual_hours: f64,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub watchers: Vec<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub time_tracking: Vec<TimeEntry>,
    #[serde(default)]
    pub is_archived: bool,
    pub completed_at: Option<DateTime>,
    #[serde(default)]
    pub position: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Task {
    /// Due date in the past and not completed.
    pub fn is_overdue(&self, now: DateTime) -> bool {
        match self.due_date {
            Some(due) => due < now && self.status != TaskStatus::Completed,
            None => false,
        }
    }

    /// Percentage of subtasks with the completion flag set, 0 when there are
    /// no subtasks. Rounded half-up.
    pub fn subtask_progress(&self) -> i32 {
        if self.subtasks.is_empty() {
            return 0;
        }
        let completed = self.subtasks.iter().filter(|s| s.is_completed).count();
        ((completed as f64 / self.subtasks.len() as f64) * 100.0).round() as i32
    }

    /// Total tracked minutes across all time entries.
    pub fn total_time_spent(&self) -> i64 {
        self.time_tracking.iter().map(|e| e.duration).sum()
    }

    /// Recompute `progress` from subtasks and let it drive status forward.
    pub fn update_progress(&mut self, now: DateTime) {
        if !self.subtasks.is_empty() {
            self.progress = self.subtask_progress();
        }
        self.derive_status_from_progress(now);
    }

    /// Progress-driven status derivation. Progress 100 forces completed
    /// (with a `completed_at` stamp); progress strictly between 0 and 100
    /// advances `todo` to `in-progress`. Status never moves backward through
    /// this path, and `review`/`cancelled` are never entered here.
    pub fn derive_status_from_progress(&mut self, now: DateTime) {
        if self.progress == 100 && self.status != TaskStatus::Completed {
            self.status = TaskStatus::Completed;
            self.completed_at = Some(now);
        } else if self.progress > 0 && self.progress < 100 && self.status == TaskStatus::Todo {
            self.status = TaskStatus::InProgress;
        }
    }

    /// Explicit status change. Setting completed wins over derived progress:
    /// progress is forced to 100 and `completed_at` stamped regardless of
    /// subtask state. `completed_at` is not cleared when the status later
    /// leaves completed; the stamp records the most recent completion.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime) {
        if status == TaskStatus::Completed {
            self.progress = 100;
            self.completed_at = Some(now);
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(done: bool) -> Subtask {
        Subtask {
            title: "step".to_string(),
            is_completed: done,
            assigned_to: None,
            due_date: None,
            created_at: DateTime::from_millis(0),
        }
    }

    fn task() -> Task {
        Task {
            task_id: "t1".to_string(),
            title: "Ship it".to_string(),
            description: String::new(),
            project: "p1".to_string(),
            assigned_to: None,
            created_by: "u1".to_string(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            category: TaskCategory::Other,
            tags: vec![],
            due_date: None,
            estimated_hours: 0.0,
            actual_hours: 0.0,
            progress: 0,
            attachments: vec![],
            comments: vec![],
            subtasks: vec![],
            dependencies: vec![],
            watchers: vec![],
            labels: vec![],
            custom_fields: vec![],
            time_tracking: vec![],
            is_archived: false,
            completed_at: None,
            position: 0,
            created_at: DateTime::from_millis(0),
            updated_at: DateTime::from_millis(0),
        }
    }

    #[test]
    fn subtask_progress_rounds_half_up() {
        let mut t = task();
        t.subtasks = vec![subtask(true), subtask(false), subtask(false)];
        assert_eq!(t.subtask_progress(), 33);
        t.subtasks[1].is_completed = true;
        assert_eq!(t.subtask_progress(), 67);
    }

    #[test]
    fn no_subtasks_means_zero() {
        assert_eq!(task().subtask_progress(), 0);
    }

    #[test]
    fn partial_progress_advances_todo_to_in_progress() {
        let mut t = task();
        t.subtasks = vec![subtask(true), subtask(false), subtask(false)];
        t.update_progress(DateTime::from_millis(1_000));
        assert_eq!(t.progress, 33);
        assert_eq!(t.status, TaskStatus::InProgress);
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn full_progress_forces_completed_and_stamps() {
        let mut t = task();
        t.subtasks = vec![subtask(true), subtask(true)];
        let now = DateTime::from_millis(5_000);
        t.update_progress(now);
        assert_eq!(t.progress, 100);
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn progress_never_moves_status_backward() {
        let mut t = task();
        t.status = TaskStatus::Review;
        t.subtasks = vec![subtask(true), subtask(false)];
        t.update_progress(DateTime::from_millis(0));
        // 50% would mean in-progress for a todo task, but review stays put.
        assert_eq!(t.status, TaskStatus::Review);
    }

    #[test]
    fn direct_progress_set_to_full_completes_the_task() {
        let mut t = task();
        t.progress = 100;
        let now = DateTime::from_millis(3_000);
        t.derive_status_from_progress(now);
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn direct_completion_wins_over_subtasks() {
        let mut t = task();
        t.subtasks = vec![subtask(false), subtask(false)];
        let now = DateTime::from_millis(9_000);
        t.set_status(TaskStatus::Completed, now);
        assert_eq!(t.progress, 100);
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn completed_at_is_not_cleared_on_reopen() {
        let mut t = task();
        let now = DateTime::from_millis(9_000);
        t.set_status(TaskStatus::Completed, now);
        t.set_status(TaskStatus::InProgress, DateTime::from_millis(10_000));
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn overdue_requires_past_due_and_open_status() {
        let mut t = task();
        let now = DateTime::from_millis(100_000);
        assert!(!t.is_overdue(now));
        t.due_date = Some(DateTime::from_millis(50_000));
        assert!(t.is_overdue(now));
        t.set_status(TaskStatus::Completed, now);
        assert!(!t.is_overdue(now));
    }

    #[test]
    fn time_spent_sums_entry_minutes() {
        let mut t = task();
        t.time_tracking = vec![
            TimeEntry {
                user: "u1".to_string(),
                start_time: None,
                end_time: None,
                duration: 90,
                description: None,
                date: DateTime::from_millis(0),
            },
            TimeEntry {
                user: "u2".to_string(),
                start_time: None,
                end_time: None,
                duration: 30,
                description: None,
                date: DateTime::from_millis(0),
            },
        ];
        assert_eq!(t.total_time_spent(), 120);
    }

    #[test]
    fn status_wire_format_is_kebab_case() {
        let s = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(s, "\"in-progress\"");
    }
}

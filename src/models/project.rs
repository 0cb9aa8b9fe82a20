use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use super::user::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        ProjectStatus::Planning
    }
}

/// Shared by projects and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    /// Numeric weight used by workload scoring.
    pub fn weight(&self) -> i32 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }
}

/// Membership entry. The role here is project-local and independent of the
/// user's global role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub user: String,
    #[serde(default)]
    pub role: Role,
    pub joined_at: DateTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Budget {
    pub allocated: f64,
    pub spent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub is_public: bool,
    pub allow_comments: bool,
    pub auto_assign: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        ProjectSettings {
            is_public: false,
            allow_comments: true,
            auto_assign: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner: String,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
    pub start_date: Option<DateTime>,
    pub end_date: Option<DateTime>,
    pub deadline: Option<DateTime>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub settings: ProjectSettings,
    /// Derived from child tasks, recomputed on demand. Not authoritative.
    #[serde(default)]
    pub progress: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

pub fn default_color() -> String {
    "#3B82F6".to_string()
}

/// Project progress from task counts: round(100 * completed / total), 0 when
/// the project has no tasks.
pub fn progress_from_counts(completed: u64, total: u64) -> i32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_half_up() {
        assert_eq!(progress_from_counts(0, 0), 0);
        assert_eq!(progress_from_counts(2, 4), 50);
        assert_eq!(progress_from_counts(1, 3), 33);
        assert_eq!(progress_from_counts(2, 3), 67);
        assert_eq!(progress_from_counts(1, 8), 13);
    }

    #[test]
    fn priority_weights() {
        assert_eq!(Priority::Low.weight(), 1);
        assert_eq!(Priority::Medium.weight(), 2);
        assert_eq!(Priority::High.weight(), 3);
        assert_eq!(Priority::Urgent.weight(), 4);
    }

    #[test]
    fn status_wire_format_is_kebab_case() {
        let s = serde_json::to_string(&ProjectStatus::OnHold).unwrap();
        assert_eq!(s, "\"on-hold\"");
    }
}

use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::Database;

use crate::models::project::Project;
use crate::models::task::Task;
use crate::models::user::Role;

/// The authenticated principal, inserted into request extensions by the
/// Authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_manager_or_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }
}

/// The set of projects a principal may see: everything for admins, otherwise
/// the concrete ids where the principal is owner or member.
#[derive(Debug, Clone)]
pub enum ProjectScope {
    All,
    Ids(Vec<String>),
}

impl ProjectScope {
    /// Filter for task queries. An empty id set produces an `$in` over
    /// nothing, which matches zero documents: default deny.
    pub fn task_filter(&self) -> Document {
        match self {
            ProjectScope::All => doc! {},
            ProjectScope::Ids(ids) => doc! { "project": { "$in": ids.clone() } },
        }
    }
}

/// Filter selecting the projects a principal may see, evaluated against the
/// projects collection itself.
pub fn project_filter(user: &AuthUser) -> Document {
    if user.is_admin() {
        doc! {}
    } else {
        doc! { "$or": [
            { "owner": &user.id },
            { "members.user": &user.id }
        ] }
    }
}

/// Materialize the principal's project-id set with an id-only projection.
pub async fn resolve_scope(db: &Database, user: &AuthUser) -> mongodb::error::Result<ProjectScope> {
    if user.is_admin() {
        return Ok(ProjectScope::All);
    }

    let projects = db.collection::<Document>("projects");
    let docs: Vec<Document> = projects
        .find(project_filter(user))
        .projection(doc! { "project_id": 1 })
        .await?
        .try_collect()
        .await?;

    let ids = docs
        .iter()
        .filter_map(|d| d.get_str("project_id").ok().map(String::from))
        .collect();
    Ok(ProjectScope::Ids(ids))
}

/// Read access to a single project: admin, owner, or listed member. The
/// owner is authorized even if absent from the members list.
pub fn can_access_project(project: &Project, user: &AuthUser) -> bool {
    user.is_admin()
        || project.owner == user.id
        || project.members.iter().any(|m| m.user == user.id)
}

/// Owner-level operations: update, delete, archive, membership changes.
pub fn can_manage_project(project: &Project, user: &AuthUser) -> bool {
    user.is_admin() || project.owner == user.id
}

/// Task edits are additionally granted to the task's assignee even when that
/// user is not a project member.
pub fn can_edit_task(task: &Task, project: &Project, user: &AuthUser) -> bool {
    can_access_project(project, user) || task.assigned_to.as_deref() == Some(user.id.as_str())
}

/// Task deletion: admin, project owner, or the task's creator.
pub fn can_delete_task(task: &Task, project: &Project, user: &AuthUser) -> bool {
    user.is_admin() || project.owner == user.id || task.created_by == user.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{Budget, Priority, ProjectSettings, ProjectStatus, ProjectMember};
    use crate::models::task::{TaskCategory, TaskStatus};
    use mongodb::bson::DateTime;

    fn principal(id: &str, role: Role) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            role,
        }
    }

    fn project(owner: &str, members: &[&str]) -> Project {
        Project {
            project_id: "p1".to_string(),
            name: "Apollo".to_string(),
            description: String::new(),
            owner: owner.to_string(),
            members: members
                .iter()
                .map(|m| ProjectMember {
                    user: m.to_string(),
                    role: Role::Member,
                    joined_at: DateTime::from_millis(0),
                })
                .collect(),
            status: ProjectStatus::Active,
            priority: Priority::Medium,
            start_date: None,
            end_date: None,
            deadline: None,
            budget: Budget::default(),
            tags: vec![],
            color: "#3B82F6".to_string(),
            is_archived: false,
            settings: ProjectSettings::default(),
            progress: 0,
            created_at: DateTime::from_millis(0),
            updated_at: DateTime::from_millis(0),
        }
    }

    fn task(assigned_to: Option<&str>, created_by: &str) -> Task {
        Task {
            task_id: "t1".to_string(),
            title: "Fix the build".to_string(),
            description: String::new(),
            project: "p1".to_string(),
            assigned_to: assigned_to.map(String::from),
            created_by: created_by.to_string(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            category: TaskCategory::Bug,
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
    fn admin_sees_everything() {
        let p = project("owner", &[]);
        assert!(can_access_project(&p, &principal("someone-else", Role::Admin)));
        assert!(can_manage_project(&p, &principal("someone-else", Role::Admin)));
    }

    #[test]
    fn owner_is_authorized_without_membership_entry() {
        let p = project("alice", &["bob"]);
        assert!(can_access_project(&p, &principal("alice", Role::Member)));
        assert!(can_manage_project(&p, &principal("alice", Role::Member)));
    }

    #[test]
    fn member_can_read_but_not_manage() {
        let p = project("alice", &["bob"]);
        let bob = principal("bob", Role::Member);
        assert!(can_access_project(&p, &bob));
        assert!(!can_manage_project(&p, &bob));
    }

    #[test]
    fn outsider_is_denied() {
        let p = project("alice", &["bob"]);
        assert!(!can_access_project(&p, &principal("mallory", Role::Member)));
    }

    #[test]
    fn assignee_can_edit_without_membership() {
        let p = project("alice", &["bob"]);
        let t = task(Some("carol"), "alice");
        assert!(can_edit_task(&t, &p, &principal("carol", Role::Member)));
        assert!(!can_edit_task(&t, &p, &principal("mallory", Role::Member)));
    }

    #[test]
    fn creator_can_delete_own_task() {
        let p = project("alice", &["bob"]);
        let t = task(None, "bob");
        assert!(can_delete_task(&t, &p, &principal("bob", Role::Member)));
        assert!(!can_delete_task(&t, &p, &principal("carol", Role::Member)));
    }

    #[test]
    fn empty_scope_filter_matches_nothing_shape() {
        let scope = ProjectScope::Ids(vec![]);
        let filter = scope.task_filter();
        let ids = filter
            .get_document("project")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn admin_scope_is_unrestricted() {
        assert!(ProjectScope::All.task_filter().is_empty());
        assert!(project_filter(&principal("root", Role::Admin)).is_empty());
    }
}

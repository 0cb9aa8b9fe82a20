use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::{error, info};
use mongodb::bson::{doc, to_bson, Bson, DateTime as BsonDateTime, Document};
use mongodb::Database;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics;
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::models::project::{
    default_color, progress_from_counts, Budget, Priority, Project, ProjectMember,
    ProjectSettings, ProjectStatus,
};
use crate::models::user::Role;
use crate::scope::{can_access_project, can_manage_project, project_filter};
use crate::validate::{check_length, validation_failed, FieldError};

pub fn bson_date(dt: &DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

fn enum_bson<T: Serialize>(value: &T) -> Bson {
    to_bson(value).unwrap_or(Bson::Null)
}

fn server_error(msg: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({ "message": msg }))
}

fn access_denied() -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({ "message": "Access denied" }))
}

fn not_found(msg: &str) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "message": msg }))
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({ "message": "Unauthorized" }))
}

/// Fetch a project or bail with 404. Existence is checked before access,
/// uniformly across handlers.
pub async fn find_project(db: &Database, project_id: &str) -> Result<Option<Project>, mongodb::error::Error> {
    db.collection::<Project>("projects")
        .find_one(doc! { "project_id": project_id })
        .await
}

/// Derived project progress: round(100 * completed / total) over child
/// tasks, 0 when there are none.
pub async fn calculate_progress(db: &Database, project_id: &str) -> Result<i32, mongodb::error::Error> {
    let tasks = db.collection::<Document>("tasks");
    let (total, completed) = futures::try_join!(
        async { tasks.count_documents(doc! { "project": project_id }).await },
        async {
            tasks
                .count_documents(doc! { "project": project_id, "status": "completed" })
                .await
        },
    )?;
    Ok(progress_from_counts(completed, total))
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub page: Option<u64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

/// GET /api/projects
pub async fn list_projects(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ListProjectsQuery>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);

    let mut filter = project_filter(&current);
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.insert(
            "$and",
            vec![doc! { "$or": [
                { "name": { "$regex": search, "$options": "i" } },
                { "description": { "$regex": search, "$options": "i" } },
                { "tags": { "$regex": search, "$options": "i" } }
            ] }],
        );
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("status", status);
    }
    if let Some(priority) = query.priority.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("priority", priority);
    }
    filter.insert("is_archived", false);

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    let mut projects: Vec<Project> = match projects_coll
        .find(filter.clone())
        .sort(doc! { "created_at": -1 })
        .skip((page - 1) * limit as u64)
        .limit(limit)
        .await
    {
        Ok(cursor) => match cursor.try_collect().await {
            Ok(p) => p,
            Err(e) => {
                error!("Cursor error listing projects: {}", e);
                return server_error("Server error fetching projects");
            }
        },
        Err(e) => {
            error!("Error listing projects: {}", e);
            return server_error("Server error fetching projects");
        }
    };

    // Derived progress, recomputed per project.
    let progress = futures::future::try_join_all(
        projects
            .iter()
            .map(|p| calculate_progress(&data.mongodb.db, &p.project_id)),
    )
    .await;
    match progress {
        Ok(values) => {
            for (project, value) in projects.iter_mut().zip(values) {
                project.progress = value;
            }
        }
        Err(e) => {
            error!("Error computing project progress: {}", e);
            return server_error("Server error fetching projects");
        }
    }

    let total = match projects_coll.count_documents(filter).await {
        Ok(t) => t,
        Err(e) => {
            error!("Error counting projects: {}", e);
            return server_error("Server error fetching projects");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "projects": projects,
        "totalPages": (total as f64 / limit as f64).ceil() as u64,
        "currentPage": page,
        "total": total,
    }))
}

/// GET /api/projects/{id}
pub async fn get_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();

    let mut project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error fetching project");
        }
    };

    if !can_access_project(&project, &current) {
        return access_denied();
    }

    project.progress = match calculate_progress(&data.mongodb.db, &project_id).await {
        Ok(p) => p,
        Err(e) => {
            error!("Error computing project progress: {}", e);
            return server_error("Server error fetching project");
        }
    };

    let analytics = match analytics::project_summary(&data.mongodb.db, &project_id).await {
        Ok(a) => a,
        Err(e) => {
            error!("Error computing project analytics: {}", e);
            return server_error("Server error fetching project");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "project": project,
        "analytics": analytics,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    pub priority: Option<Priority>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub budget: Option<Budget>,
}

/// POST /api/projects
pub async fn create_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateProjectRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_manager_or_admin() {
        return access_denied();
    }

    let mut errors = Vec::new();
    check_length(&mut errors, "name", &payload.name, 2, 100);
    if let Some(description) = &payload.description {
        if description.chars().count() > 1000 {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 1000 characters",
            ));
        }
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let now = BsonDateTime::now();
    let new_project = Project {
        project_id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        description: payload.description.clone().unwrap_or_default(),
        owner: current.id.clone(),
        members: payload
            .members
            .iter()
            .map(|user_id| ProjectMember {
                user: user_id.clone(),
                role: Role::Member,
                joined_at: now,
            })
            .collect(),
        status: ProjectStatus::Planning,
        priority: payload.priority.unwrap_or_default(),
        start_date: Some(payload.start_date.map(|d| bson_date(&d)).unwrap_or(now)),
        end_date: payload.end_date.map(|d| bson_date(&d)),
        deadline: payload.deadline.map(|d| bson_date(&d)),
        budget: payload.budget.unwrap_or_default(),
        tags: payload.tags.clone(),
        color: payload.color.clone().unwrap_or_else(default_color),
        is_archived: false,
        settings: ProjectSettings::default(),
        progress: 0,
        created_at: now,
        updated_at: now,
    };

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll.insert_one(&new_project).await {
        error!("Error creating project: {}", e);
        return server_error("Server error creating project");
    }
    info!("Project created: {}", new_project.project_id);

    HttpResponse::Created().json(serde_json::json!({
        "project": new_project,
        "message": "Project created successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<Priority>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub color: Option<String>,
    pub budget: Option<Budget>,
    pub settings: Option<ProjectSettings>,
}

/// PUT /api/projects/{id}
pub async fn update_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateProjectRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();

    let project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error updating project");
        }
    };
    if !can_manage_project(&project, &current) {
        return access_denied();
    }

    let mut errors = Vec::new();
    if let Some(name) = &payload.name {
        check_length(&mut errors, "name", name, 2, 100);
    }
    if let Some(description) = &payload.description {
        if description.chars().count() > 1000 {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 1000 characters",
            ));
        }
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let mut set_doc = doc! {};
    if let Some(name) = &payload.name {
        set_doc.insert("name", name.trim());
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description);
    }
    if let Some(status) = &payload.status {
        set_doc.insert("status", enum_bson(status));
    }
    if let Some(priority) = &payload.priority {
        set_doc.insert("priority", enum_bson(priority));
    }
    if let Some(start_date) = &payload.start_date {
        set_doc.insert("start_date", bson_date(start_date));
    }
    if let Some(end_date) = &payload.end_date {
        set_doc.insert("end_date", bson_date(end_date));
    }
    if let Some(deadline) = &payload.deadline {
        set_doc.insert("deadline", bson_date(deadline));
    }
    if let Some(tags) = &payload.tags {
        set_doc.insert("tags", tags.clone());
    }
    if let Some(color) = &payload.color {
        set_doc.insert("color", color);
    }
    if let Some(budget) = &payload.budget {
        set_doc.insert("budget", enum_bson(budget));
    }
    if let Some(settings) = &payload.settings {
        set_doc.insert("settings", enum_bson(settings));
    }
    if set_doc.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "message": "No fields to update" }));
    }
    set_doc.insert("updated_at", BsonDateTime::now());

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll
        .update_one(doc! { "project_id": &project_id }, doc! { "$set": set_doc })
        .await
    {
        error!("Error updating project: {}", e);
        return server_error("Server error updating project");
    }

    match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "project": updated,
            "message": "Project updated successfully",
        })),
        Ok(None) => not_found("Project not found"),
        Err(e) => {
            error!("Error re-fetching project: {}", e);
            server_error("Server error updating project")
        }
    }
}

/// DELETE /api/projects/{id}
///
/// Hard delete; cascades to every child task.
pub async fn delete_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();

    let project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error deleting project");
        }
    };
    if !can_manage_project(&project, &current) {
        return access_denied();
    }

    let tasks_coll = data.mongodb.db.collection::<Document>("tasks");
    if let Err(e) = tasks_coll.delete_many(doc! { "project": &project_id }).await {
        error!("Error deleting project tasks: {}", e);
        return server_error("Server error deleting project");
    }

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll
        .delete_one(doc! { "project_id": &project_id })
        .await
    {
        error!("Error deleting project: {}", e);
        return server_error("Server error deleting project");
    }
    info!("Project deleted: {}", project_id);

    HttpResponse::Ok().json(serde_json::json!({
        "message": "Project and associated tasks deleted successfully"
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: Option<Role>,
}

/// POST /api/projects/{id}/members
pub async fn add_member(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddMemberRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();

    let project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error adding member");
        }
    };
    if !can_manage_project(&project, &current) {
        return access_denied();
    }

    if project.members.iter().any(|m| m.user == payload.user_id) {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "message": "User is already a member of this project"
        }));
    }

    let member = ProjectMember {
        user: payload.user_id.clone(),
        role: payload.role.unwrap_or_default(),
        joined_at: BsonDateTime::now(),
    };
    let member_bson = match to_bson(&member) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing member: {}", e);
            return server_error("Server error adding member");
        }
    };

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll
        .update_one(
            doc! { "project_id": &project_id },
            doc! { "$push": { "members": member_bson }, "$set": { "updated_at": BsonDateTime::now() } },
        )
        .await
    {
        error!("Error adding member: {}", e);
        return server_error("Server error adding member");
    }
    info!("Added {} to project {}", payload.user_id, project_id);

    match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "project": updated,
            "message": "Member added successfully",
        })),
        Ok(None) => not_found("Project not found"),
        Err(e) => {
            error!("Error re-fetching project: {}", e);
            server_error("Server error adding member")
        }
    }
}

/// DELETE /api/projects/{id}/members/{user_id}
pub async fn remove_member(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let (project_id, user_id) = path.into_inner();

    let project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error removing member");
        }
    };
    if !can_manage_project(&project, &current) {
        return access_denied();
    }

    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll
        .update_one(
            doc! { "project_id": &project_id },
            doc! { "$pull": { "members": { "user": &user_id } }, "$set": { "updated_at": BsonDateTime::now() } },
        )
        .await
    {
        error!("Error removing member: {}", e);
        return server_error("Server error removing member");
    }

    match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "project": updated,
            "message": "Member removed successfully",
        })),
        Ok(None) => not_found("Project not found"),
        Err(e) => {
            error!("Error re-fetching project: {}", e);
            server_error("Server error removing member")
        }
    }
}

/// PUT /api/projects/{id}/archive
///
/// Toggles the archived flag; archival is the soft-delete path.
pub async fn archive_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();

    let project = match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error archiving project");
        }
    };
    if !can_manage_project(&project, &current) {
        return access_denied();
    }

    let archived = !project.is_archived;
    let projects_coll = data.mongodb.db.collection::<Project>("projects");
    if let Err(e) = projects_coll
        .update_one(
            doc! { "project_id": &project_id },
            doc! { "$set": { "is_archived": archived, "updated_at": BsonDateTime::now() } },
        )
        .await
    {
        error!("Error archiving project: {}", e);
        return server_error("Server error archiving project");
    }

    match find_project(&data.mongodb.db, &project_id).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "project": updated,
            "message": if archived { "Project archived successfully" } else { "Project unarchived successfully" },
        })),
        Ok(None) => not_found("Project not found"),
        Err(e) => {
            error!("Error re-fetching project: {}", e);
            server_error("Server error archiving project")
        }
    }
}

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::stream::TryStreamExt;
use log::{error, info};
use mongodb::bson::{doc, to_document, DateTime as BsonDateTime, Document};
use mongodb::Database;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::models::project::{Priority, Project};
use crate::models::task::{
    Comment, Label, Subtask, Task, TaskCategory, TaskStatus, TimeEntry,
};
use crate::notifier::{project_room, Publish};
use crate::projects::{bson_date, find_project};
use crate::scope::{can_access_project, can_delete_task, can_edit_task, resolve_scope, ProjectScope};
use crate::validate::{check_length, validation_failed, FieldError};

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

async fn find_task(db: &Database, task_id: &str) -> Result<Option<Task>, mongodb::error::Error> {
    db.collection::<Task>("tasks")
        .find_one(doc! { "task_id": task_id })
        .await
}

/// Load a task together with its project, mapping a missing task to 404.
/// The project is required for every access decision.
async fn find_task_with_project(
    db: &Database,
    task_id: &str,
) -> Result<Option<(Task, Project)>, mongodb::error::Error> {
    let task = match find_task(db, task_id).await? {
        Some(t) => t,
        None => return Ok(None),
    };
    let project = match find_project(db, &task.project).await? {
        Some(p) => p,
        None => return Ok(None),
    };
    Ok(Some((task, project)))
}

/// Single-document write-back of a mutated task. Last writer wins; there is
/// no version check.
async fn save_task(db: &Database, task: &Task) -> Result<(), mongodb::error::Error> {
    let doc = to_document(task)?;
    db.collection::<Document>("tasks")
        .replace_one(doc! { "task_id": &task.task_id }, doc)
        .await?;
    Ok(())
}

fn sort_field(name: &str) -> &'static str {
    match name {
        "createdAt" => "created_at",
        "updatedAt" => "updated_at",
        "dueDate" => "due_date",
        "title" => "title",
        "status" => "status",
        "priority" => "priority",
        "progress" => "progress",
        "position" => "position",
        _ => "created_at",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub page: Option<u64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub project: Option<String>,
    pub due_date: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// GET /api/tasks
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ListTasksQuery>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);

    let scope = match resolve_scope(&data.mongodb.db, &current).await {
        Ok(s) => s,
        Err(e) => {
            error!("Error resolving project scope: {}", e);
            return server_error("Server error fetching tasks");
        }
    };

    let mut filter = scope.task_filter();
    filter.insert("is_archived", false);

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": search, "$options": "i" } },
                doc! { "description": { "$regex": search, "$options": "i" } },
                doc! { "tags": { "$regex": search, "$options": "i" } },
            ],
        );
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("status", status);
    }
    if let Some(priority) = query.priority.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("priority", priority);
    }
    if let Some(assigned_to) = query.assigned_to.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("assigned_to", assigned_to);
    }
    if let Some(project) = query.project.as_deref().filter(|s| !s.is_empty()) {
        // Narrowing to one project must stay inside the resolved scope.
        let allowed = match &scope {
            ProjectScope::All => true,
            ProjectScope::Ids(ids) => ids.iter().any(|id| id == project),
        };
        if !allowed {
            return access_denied();
        }
        filter.insert("project", project);
    }
    if let Some(due) = query.due_date.as_deref().filter(|s| !s.is_empty()) {
        match NaiveDate::parse_from_str(due, "%Y-%m-%d") {
            Ok(date) => {
                let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
                let end = start + Duration::days(1);
                filter.insert(
                    "due_date",
                    doc! { "$gte": bson_date(&start), "$lt": bson_date(&end) },
                );
            }
            Err(_) => {
                return validation_failed(vec![FieldError::new(
                    "dueDate",
                    "dueDate must be formatted as YYYY-MM-DD",
                )])
            }
        }
    }

    let order = if query.sort_order.as_deref() == Some("asc") { 1 } else { -1 };
    let mut sort = Document::new();
    sort.insert(sort_field(query.sort_by.as_deref().unwrap_or("createdAt")), order);

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    let tasks: Vec<Task> = match tasks_coll
        .find(filter.clone())
        .sort(sort)
        .skip((page - 1) * limit as u64)
        .limit(limit)
        .await
    {
        Ok(cursor) => match cursor.try_collect().await {
            Ok(t) => t,
            Err(e) => {
                error!("Cursor error listing tasks: {}", e);
                return server_error("Server error fetching tasks");
            }
        },
        Err(e) => {
            error!("Error listing tasks: {}", e);
            return server_error("Server error fetching tasks");
        }
    };

    let total = match tasks_coll.count_documents(filter).await {
        Ok(t) => t,
        Err(e) => {
            error!("Error counting tasks: {}", e);
            return server_error("Server error fetching tasks");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "tasks": tasks,
        "totalPages": (total as f64 / limit as f64).ceil() as u64,
        "currentPage": page,
        "total": total,
    }))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let (task, project) = match find_task_with_project(&data.mongodb.db, &path).await {
        Ok(Some(pair)) => pair,
        Ok(None) => return not_found("Task not found"),
        Err(e) => {
            error!("Error fetching task: {}", e);
            return server_error("Server error fetching task");
        }
    };

    if !can_access_project(&project, &current) {
        return access_denied();
    }

    HttpResponse::Ok().json(task)
}

#[derive(Debug, Deserialize)]
pub struct SubtaskInput {
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl SubtaskInput {
    fn into_subtask(self, now: BsonDateTime) -> Subtask {
        Subtask {
            title: self.title,
            is_completed: self.is_completed,
            assigned_to: self.assigned_to,
            due_date: self.due_date.map(|d| bson_date(&d)),
            created_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub project: String,
    pub assigned_to: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<TaskCategory>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskInput>,
}

/// POST /api/tasks
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let mut errors = Vec::new();
    check_length(&mut errors, "title", &payload.title, 2, 200);
    if let Some(description) = &payload.description {
        if description.chars().count() > 2000 {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 2000 characters",
            ));
        }
    }
    if payload.project.trim().is_empty() {
        errors.push(FieldError::new("project", "Valid project ID is required"));
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let project = match find_project(&data.mongodb.db, &payload.project).await {
        Ok(Some(p)) => p,
        Ok(None) => return not_found("Project not found"),
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error creating task");
        }
    };
    if !can_access_project(&project, &current) {
        return access_denied();
    }

    let payload = payload.into_inner();
    let now = BsonDateTime::now();
    let mut task = Task {
        task_id: Uuid::new_v4().to_string(),
        title: payload.title.trim().to_string(),
        description: payload.description.unwrap_or_default(),
        project: payload.project,
        assigned_to: payload.assigned_to,
        created_by: current.id.clone(),
        status: TaskStatus::Todo,
        priority: payload.priority.unwrap_or_default(),
        category: payload.category.unwrap_or_default(),
        tags: payload.tags,
        due_date: payload.due_date.map(|d| bson_date(&d)),
        estimated_hours: payload.estimated_hours.unwrap_or(0.0),
        actual_hours: 0.0,
        progress: 0,
        attachments: vec![],
        comments: vec![],
        subtasks: payload
            .subtasks
            .into_iter()
            .map(|s| s.into_subtask(now))
            .collect(),
        dependencies: vec![],
        // The creator automatically watches the task.
        watchers: vec![current.id.clone()],
        labels: vec![],
        custom_fields: vec![],
        time_tracking: vec![],
        is_archived: false,
        completed_at: None,
        position: 0,
        created_at: now,
        updated_at: now,
    };
    task.update_progress(now);

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll.insert_one(&task).await {
        error!("Error inserting task: {}", e);
        return server_error("Server error creating task");
    }
    info!("Task created: {}", task.task_id);

    data.notifier.do_send(Publish {
        room: project_room(&task.project),
        event: "task-created".to_string(),
        data: serde_json::json!({ "projectId": task.project, "task": task }),
        exclude: None,
    });

    HttpResponse::Created().json(serde_json::json!({
        "task": task,
        "message": "Task created successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category: Option<TaskCategory>,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub progress: Option<i32>,
    pub tags: Option<Vec<String>>,
    pub subtasks: Option<Vec<SubtaskInput>>,
    pub labels: Option<Vec<Label>>,
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let (mut task, project) = match find_task_with_project(&data.mongodb.db, &path).await {
        Ok(Some(pair)) => pair,
        Ok(None) => return not_found("Task not found"),
        Err(e) => {
            error!("Error fetching task: {}", e);
            return server_error("Server error updating task");
        }
    };
    if !can_edit_task(&task, &project, &current) {
        return access_denied();
    }

    let mut errors = Vec::new();
    if let Some(title) = &payload.title {
        check_length(&mut errors, "title", title, 2, 200);
    }
    if let Some(description) = &payload.description {
        if description.chars().count() > 2000 {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 2000 characters",
            ));
        }
    }
    if let Some(progress) = payload.progress {
        if !(0..=100).contains(&progress) {
            errors.push(FieldError::new("progress", "Progress must be between 0 and 100"));
        }
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let payload = payload.into_inner();
    let now = BsonDateTime::now();

    if let Some(title) = payload.title {
        task.title = title.trim().to_string();
    }
    if let Some(description) = payload.description {
        task.description = description;
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    if let Some(category) = payload.category {
        task.category = category;
    }
    if let Some(assigned_to) = payload.assigned_to {
        task.assigned_to = Some(assigned_to);
    }
    if let Some(due_date) = payload.due_date {
        task.due_date = Some(bson_date(&due_date));
    }
    if let Some(estimated_hours) = payload.estimated_hours {
        task.estimated_hours = estimated_hours;
    }
    if let Some(actual_hours) = payload.actual_hours {
        task.actual_hours = actual_hours;
    }
    if let Some(progress) = payload.progress {
        task.progress = progress;
    }
    if let Some(tags) = payload.tags {
        task.tags = tags;
    }
    if let Some(labels) = payload.labels {
        task.labels = labels;
    }

    // Explicit status wins first; a subtask mutation then re-derives
    // progress and may ratchet status forward.
    if let Some(status) = payload.status {
        task.set_status(status, now);
    }
    if let Some(subtasks) = payload.subtasks {
        task.subtasks = subtasks.into_iter().map(|s| s.into_subtask(now)).collect();
        task.update_progress(now);
    } else if payload.progress.is_some() {
        task.derive_status_from_progress(now);
    }
    task.updated_at = now;

    if let Err(e) = save_task(&data.mongodb.db, &task).await {
        error!("Error updating task: {}", e);
        return server_error("Server error updating task");
    }

    data.notifier.do_send(Publish {
        room: project_room(&task.project),
        event: "task-updated".to_string(),
        data: serde_json::json!({ "projectId": task.project, "task": task }),
        exclude: None,
    });

    HttpResponse::Ok().json(serde_json::json!({
        "task": task,
        "message": "Task updated successfully",
    }))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let (task, project) = match find_task_with_project(&data.mongodb.db, &path).await {
        Ok(Some(pair)) => pair,
        Ok(None) => return not_found("Task not found"),
        Err(e) => {
            error!("Error fetching task: {}", e);
            return server_error("Server error deleting task");
        }
    };
    if !can_delete_task(&task, &project, &current) {
        return access_denied();
    }

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll.delete_one(doc! { "task_id": &task.task_id }).await {
        error!("Error deleting task: {}", e);
        return server_error("Server error deleting task");
    }
    info!("Task deleted: {}", task.task_id);

    data.notifier.do_send(Publish {
        room: project_room(&task.project),
        event: "task-deleted".to_string(),
        data: serde_json::json!({ "projectId": task.project, "taskId": task.task_id }),
        exclude: None,
    });

    HttpResponse::Ok().json(serde_json::json!({ "message": "Task deleted successfully" }))
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

/// POST /api/tasks/{id}/comments
pub async fn add_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddCommentRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let mut errors = Vec::new();
    check_length(&mut errors, "content", &payload.content, 1, 1000);
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let (mut task, project) = match find_task_with_project(&data.mongodb.db, &path).await {
        Ok(Some(pair)) => pair,
        Ok(None) => return not_found("Task not found"),
        Err(e) => {
            error!("Error fetching task: {}", e);
            return server_error("Server error adding comment");
        }
    };
    if !can_access_project(&project, &current) {
        return access_denied();
    }

    let now = BsonDateTime::now();
    let comment = Comment {
        comment_id: Uuid::new_v4().to_string(),
        user: current.id.clone(),
        content: payload.content.trim().to_string(),
        attachments: vec![],
        is_edited: false,
        edited_at: None,
        created_at: now,
    };
    task.comments.push(comment.clone());
    task.updated_at = now;

    if let Err(e) = save_task(&data.mongodb.db, &task).await {
        error!("Error adding comment: {}", e);
        return server_error("Server error adding comment");
    }

    data.notifier.do_send(Publish {
        room: project_room(&task.project),
        event: "comment-added".to_string(),
        data: serde_json::json!({
            "projectId": task.project,
            "taskId": task.task_id,
            "comment": comment,
        }),
        exclude: None,
    });

    HttpResponse::Ok().json(serde_json::json!({
        "comments": task.comments,
        "message": "Comment added successfully",
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddTimeRequest {
    pub duration: i64,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// POST /api/tasks/{id}/time
///
/// Appends a time entry and re-derives `actual_hours` from the tracked
/// minutes.
pub async fn add_time_entry(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddTimeRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };

    let mut errors = Vec::new();
    if payload.duration <= 0 {
        errors.push(FieldError::new("duration", "Duration must be a positive number"));
    }
    if let Some(description) = &payload.description {
        if description.chars().count() > 500 {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 500 characters",
            ));
        }
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let (mut task, project) = match find_task_with_project(&data.mongodb.db, &path).await {
        Ok(Some(pair)) => pair,
        Ok(None) => return not_found("Task not found"),
        Err(e) => {
            error!("Error fetching task: {}", e);
            return server_error("Server error adding time entry");
        }
    };
    if !can_edit_task(&task, &project, &current) {
        return access_denied();
    }

    let now = BsonDateTime::now();
    task.time_tracking.push(TimeEntry {
        user: current.id.clone(),
        start_time: None,
        end_time: None,
        duration: payload.duration,
        description: payload.description.clone(),
        date: payload.date.map(|d| bson_date(&d)).unwrap_or(now),
    });
    task.actual_hours = task.total_time_spent() as f64 / 60.0;
    task.updated_at = now;

    if let Err(e) = save_task(&data.mongodb.db, &task).await {
        error!("Error adding time entry: {}", e);
        return server_error("Server error adding time entry");
    }

    HttpResponse::Ok().json(serde_json::json!({
        "timeTracking": task.time_tracking,
        "actualHours": task.actual_hours,
        "message": "Time entry added successfully",
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTasksQuery {
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub priority: Option<String>,
}

/// GET /api/tasks/project/{project_id}
pub async fn project_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ProjectTasksQuery>,
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
            return server_error("Server error fetching project tasks");
        }
    };
    if !can_access_project(&project, &current) {
        return access_denied();
    }

    let mut filter = doc! { "project": &project_id, "is_archived": false };
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("status", status);
    }
    if let Some(assigned_to) = query.assigned_to.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("assigned_to", assigned_to);
    }
    if let Some(priority) = query.priority.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("priority", priority);
    }

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    let tasks: Vec<Task> = match tasks_coll
        .find(filter)
        .sort(doc! { "position": 1, "created_at": -1 })
        .await
    {
        Ok(cursor) => match cursor.try_collect().await {
            Ok(t) => t,
            Err(e) => {
                error!("Cursor error fetching project tasks: {}", e);
                return server_error("Server error fetching project tasks");
            }
        },
        Err(e) => {
            error!("Error fetching project tasks: {}", e);
            return server_error("Server error fetching project tasks");
        }
    };

    HttpResponse::Ok().json(tasks)
}

#[derive(Debug, Deserialize)]
pub struct ReorderEntry {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub tasks: Vec<ReorderEntry>,
}

/// PUT /api/tasks/reorder
///
/// Positions are assigned from the order of the submitted list.
pub async fn reorder_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ReorderRequest>,
) -> impl Responder {
    if current_user(&req).is_none() {
        return unauthorized();
    }

    let tasks_coll = data.mongodb.db.collection::<Document>("tasks");
    let updates = payload.tasks.iter().enumerate().map(|(index, entry)| {
        let coll = tasks_coll.clone();
        let task_id = entry.task_id.clone();
        async move {
            coll.update_one(
                doc! { "task_id": task_id },
                doc! { "$set": { "position": index as i32 } },
            )
            .await
        }
    });

    if let Err(e) = futures::future::try_join_all(updates).await {
        error!("Error reordering tasks: {}", e);
        return server_error("Server error updating task positions");
    }

    HttpResponse::Ok().json(serde_json::json!({
        "message": "Task positions updated successfully"
    }))
}

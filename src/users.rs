use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures::stream::TryStreamExt;
use log::{error, info};
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use serde::Deserialize;

use crate::analytics::{distribution, group_count_pipeline, run_pipeline, CategoryCount};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::models::task::Task;
use crate::models::user::{PublicUser, Role, User};
use crate::validate::{check_length, is_valid_email, validation_failed, FieldError};

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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<u64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub department: Option<String>,
    pub is_active: Option<String>,
}

/// GET /api/users
pub async fn list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ListUsersQuery>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_manager_or_admin() {
        return access_denied();
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);

    let mut filter = doc! {};
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.insert(
            "$or",
            vec![
                doc! { "name": { "$regex": search, "$options": "i" } },
                doc! { "email": { "$regex": search, "$options": "i" } },
                doc! { "department": { "$regex": search, "$options": "i" } },
            ],
        );
    }
    if let Some(role) = query.role.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("role", role);
    }
    if let Some(department) = query.department.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("department", department);
    }
    if let Some(is_active) = query.is_active.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("is_active", is_active == "true");
    }

    let users_coll = data.mongodb.db.collection::<User>("users");
    let users: Vec<User> = match users_coll
        .find(filter.clone())
        .sort(doc! { "created_at": -1 })
        .skip((page - 1) * limit as u64)
        .limit(limit)
        .await
    {
        Ok(cursor) => match cursor.try_collect().await {
            Ok(u) => u,
            Err(e) => {
                error!("Cursor error listing users: {}", e);
                return server_error("Server error fetching users");
            }
        },
        Err(e) => {
            error!("Error listing users: {}", e);
            return server_error("Server error fetching users");
        }
    };

    let total = match users_coll.count_documents(filter).await {
        Ok(t) => t,
        Err(e) => {
            error!("Error counting users: {}", e);
            return server_error("Server error fetching users");
        }
    };

    let users: Vec<PublicUser> = users.into_iter().map(PublicUser::from).collect();
    HttpResponse::Ok().json(serde_json::json!({
        "users": users,
        "totalPages": (total as f64 / limit as f64).ceil() as u64,
        "currentPage": page,
        "total": total,
    }))
}

/// GET /api/users/{id}
pub async fn get_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    if current_user(&req).is_none() {
        return unauthorized();
    }
    let user_id = path.into_inner();

    let users_coll = data.mongodb.db.collection::<User>("users");
    let user = match users_coll.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(u)) => u,
        Ok(None) => return not_found("User not found"),
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Server error fetching user");
        }
    };

    let tasks = data.mongodb.db.collection::<Document>("tasks");
    let projects = data.mongodb.db.collection::<Document>("projects");
    let stats = futures::try_join!(
        run_pipeline::<CategoryCount>(
            &tasks,
            group_count_pipeline(doc! { "assigned_to": &user_id }, "status"),
        ),
        async {
            projects
                .count_documents(doc! { "$or": [
                    { "owner": &user_id },
                    { "members.user": &user_id }
                ] })
                .await
        },
    );
    let (task_stats, project_count) = match stats {
        Ok(s) => s,
        Err(e) => {
            error!("Error computing user stats: {}", e);
            return server_error("Server error fetching user");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "user": PublicUser::from(user),
        "stats": {
            "tasks": distribution(task_stats),
            "projects": project_count,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub is_active: Option<bool>,
}

/// PUT /api/users/{id}
pub async fn update_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserRequest>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_admin() {
        return access_denied();
    }
    let user_id = path.into_inner();

    let mut errors = Vec::new();
    if let Some(name) = &payload.name {
        check_length(&mut errors, "name", name, 2, 50);
    }
    if let Some(email) = &payload.email {
        if !is_valid_email(email) {
            errors.push(FieldError::new("email", "Please enter a valid email"));
        }
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let users_coll = data.mongodb.db.collection::<User>("users");
    let user = match users_coll.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(u)) => u,
        Ok(None) => return not_found("User not found"),
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Server error updating user");
        }
    };

    if let Some(email) = payload.email.as_deref() {
        let email = email.trim().to_lowercase();
        if email != user.email {
            match users_coll
                .find_one(doc! { "email": &email, "user_id": { "$ne": &user_id } })
                .await
            {
                Ok(Some(_)) => {
                    return HttpResponse::BadRequest()
                        .json(serde_json::json!({ "message": "Email already exists" }))
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error checking email uniqueness: {}", e);
                    return server_error("Server error updating user");
                }
            }
        }
    }

    let mut set_doc = doc! {};
    if let Some(name) = &payload.name {
        set_doc.insert("name", name.trim());
    }
    if let Some(email) = &payload.email {
        set_doc.insert("email", email.trim().to_lowercase());
    }
    if let Some(role) = &payload.role {
        set_doc.insert("role", role.as_str());
    }
    if let Some(department) = &payload.department {
        set_doc.insert("department", department);
    }
    if let Some(is_active) = payload.is_active {
        set_doc.insert("is_active", is_active);
    }
    if set_doc.is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "message": "No fields to update" }));
    }
    set_doc.insert("updated_at", BsonDateTime::now());

    if let Err(e) = users_coll
        .update_one(doc! { "user_id": &user_id }, doc! { "$set": set_doc })
        .await
    {
        error!("Error updating user: {}", e);
        return server_error("Server error updating user");
    }
    info!("User updated: {}", user_id);

    match users_coll.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "user": PublicUser::from(updated),
            "message": "User updated successfully",
        })),
        Ok(None) => not_found("User not found"),
        Err(e) => {
            error!("Error re-fetching user: {}", e);
            server_error("Server error updating user")
        }
    }
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_admin() {
        return access_denied();
    }
    let user_id = path.into_inner();

    let users_coll = data.mongodb.db.collection::<User>("users");
    match users_coll.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("User not found"),
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Server error deleting user");
        }
    }

    if user_id == current.id {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "message": "Cannot delete your own account" }));
    }

    if let Err(e) = users_coll.delete_one(doc! { "user_id": &user_id }).await {
        error!("Error deleting user: {}", e);
        return server_error("Server error deleting user");
    }
    info!("User deleted: {}", user_id);

    HttpResponse::Ok().json(serde_json::json!({ "message": "User deleted successfully" }))
}

/// GET /api/users/{id}/dashboard
pub async fn user_dashboard(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let user_id = path.into_inner();

    let users_coll = data.mongodb.db.collection::<User>("users");
    let user = match users_coll.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(u)) => u,
        Ok(None) => return not_found("User not found"),
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Server error fetching dashboard data");
        }
    };

    if user.user_id != current.id && !current.is_admin() {
        return access_denied();
    }

    let tasks = data.mongodb.db.collection::<Document>("tasks");
    let projects = data.mongodb.db.collection::<Document>("projects");
    let tasks_typed = data.mongodb.db.collection::<Task>("tasks");
    let week_ago = BsonDateTime::from_millis(BsonDateTime::now().timestamp_millis() - 7 * 24 * 60 * 60 * 1000);

    let member_filter = doc! { "$or": [
        { "owner": &user_id },
        { "members.user": &user_id }
    ] };

    let results = futures::try_join!(
        run_pipeline::<CategoryCount>(
            &tasks,
            group_count_pipeline(doc! { "assigned_to": &user_id }, "status"),
        ),
        async {
            tasks_typed
                .find(doc! { "assigned_to": &user_id })
                .sort(doc! { "updated_at": -1 })
                .limit(5)
                .await?
                .try_collect::<Vec<Task>>()
                .await
        },
        run_pipeline::<CategoryCount>(&projects, group_count_pipeline(member_filter, "status")),
        async {
            tasks_typed
                .find(doc! { "assigned_to": &user_id, "updated_at": { "$gte": week_ago } })
                .sort(doc! { "updated_at": -1 })
                .limit(10)
                .await?
                .try_collect::<Vec<Task>>()
                .await
        },
    );

    let (task_stats, recent_tasks, project_stats, recent_activity) = match results {
        Ok(r) => r,
        Err(e) => {
            error!("Error computing dashboard data: {}", e);
            return server_error("Server error fetching dashboard data");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "taskStats": distribution(task_stats),
        "recentTasks": recent_tasks,
        "projectStats": distribution(project_stats),
        "recentActivity": recent_activity,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersQuery {
    pub limit: Option<i64>,
}

/// GET /api/users/search/{query}
pub async fn search_users(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<SearchUsersQuery>,
) -> impl Responder {
    if current_user(&req).is_none() {
        return unauthorized();
    }
    let term = path.into_inner();
    let limit = query.limit.unwrap_or(10).max(1);

    let users_coll = data.mongodb.db.collection::<User>("users");
    let filter = doc! {
        "$or": [
            { "name": { "$regex": &term, "$options": "i" } },
            { "email": { "$regex": &term, "$options": "i" } },
            { "department": { "$regex": &term, "$options": "i" } }
        ],
        "is_active": true,
    };

    let users: Vec<User> = match users_coll.find(filter).limit(limit).await {
        Ok(cursor) => match cursor.try_collect().await {
            Ok(u) => u,
            Err(e) => {
                error!("Cursor error searching users: {}", e);
                return server_error("Server error searching users");
            }
        },
        Err(e) => {
            error!("Error searching users: {}", e);
            return server_error("Server error searching users");
        }
    };

    let users: Vec<serde_json::Value> = users
        .into_iter()
        .map(|u| {
            serde_json::json!({
                "user_id": u.user_id,
                "name": u.name,
                "email": u.email,
                "avatar": u.avatar,
                "role": u.role,
                "department": u.department,
            })
        })
        .collect();

    HttpResponse::Ok().json(users)
}

//! Aggregation engine: grouping and rollup pipelines over tasks, projects
//! and users. Every pipeline is built by a plain function returning the
//! stage list, so the query shape can be unit-tested without a live store,
//! and results deserialize into typed records.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::error;
use mongodb::bson::{doc, from_document, DateTime as BsonDateTime, Document};
use mongodb::{Collection, Database};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::models::task::Task;
use crate::projects::find_project;
use crate::scope::{can_access_project, project_filter, resolve_scope};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn days_ago(days: i64) -> BsonDateTime {
    BsonDateTime::from_millis(Utc::now().timestamp_millis() - days * DAY_MS)
}

// ---------------------------------------------------------------------------
// Typed aggregation results
// ---------------------------------------------------------------------------

/// One `{_id: <category>, count}` row from a single-field group.
#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryCount {
    #[serde(rename = "_id")]
    pub key: String,
    pub count: i64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct DayBucket {
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct WeekBucket {
    pub year: i32,
    pub month: i32,
    pub week: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DailyCount {
    #[serde(rename = "_id")]
    pub bucket: DayBucket,
    pub count: i64,
}

/// Daily created-vs-completed split.
#[derive(Debug, Serialize, Deserialize)]
pub struct DailyActivity {
    #[serde(rename = "_id")]
    pub bucket: DayBucket,
    pub created: i64,
    pub completed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WeeklyActivity {
    #[serde(rename = "_id")]
    pub bucket: WeekBucket,
    pub created: i64,
    pub completed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUserActivity {
    #[serde(rename = "_id")]
    pub bucket: DayBucket,
    pub tasks_updated: i64,
    pub tasks_completed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMinutes {
    #[serde(rename = "_id")]
    pub bucket: DayBucket,
    pub total_minutes: i64,
}

/// Display fields attached to grouped rows via `$lookup`. Fields are
/// optional because some groups preserve unassigned rows.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDisplay {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDisplay {
    pub project_id: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPerformance {
    pub user: UserDisplay,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
    #[serde(default)]
    pub average_progress: Option<f64>,
    #[serde(default)]
    pub total_time_spent: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStat {
    pub user: UserDisplay,
    pub task_count: i64,
    pub completed_tasks: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberContribution {
    pub user: UserDisplay,
    pub tasks_assigned: i64,
    pub tasks_completed: i64,
    /// Minutes, summed over every time entry on the member's tasks.
    pub total_time_spent: i64,
}

/// Null-key rollup over one project's tasks. A project with no tasks yields
/// an empty result set; callers fall back to this default row.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Burndown {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub estimated_hours: f64,
    pub actual_hours: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRollup {
    #[serde(rename = "_id")]
    pub status: String,
    pub count: i64,
    #[serde(default)]
    pub average_progress: Option<f64>,
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeByProject {
    pub project: ProjectDisplay,
    pub total_hours: f64,
    pub task_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamProductivity {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub role: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    #[serde(default)]
    pub average_progress: Option<f64>,
    pub total_time_spent: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationStat {
    pub project: ProjectDisplay,
    pub total_comments: i64,
    pub average_collaboration: f64,
    pub task_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntry {
    pub user: UserDisplay,
    pub active_tasks: i64,
    pub total_estimated_hours: f64,
    /// activeTasks x average numeric priority; the overload ranking key.
    pub workload_score: f64,
}

// ---------------------------------------------------------------------------
// Pipeline builders
// ---------------------------------------------------------------------------

/// Group by a single categorical field and count. Categories with zero
/// occurrences are omitted; callers zero-fill if they need a dense
/// histogram.
pub fn group_count_pipeline(filter: Document, field: &str) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": {
            "_id": format!("${}", field),
            "count": { "$sum": 1 },
        } },
    ]
}

fn day_key(date_field: &str) -> Document {
    doc! {
        "year": { "$year": format!("${}", date_field) },
        "month": { "$month": format!("${}", date_field) },
        "day": { "$dayOfMonth": format!("${}", date_field) },
    }
}

/// Completed-if-completed conditional counter.
fn completed_cond() -> Document {
    doc! { "$sum": { "$cond": [{ "$eq": ["$status", "completed"] }, 1, 0] } }
}

/// Count per (year, month, day) bucket of `date_field`, ascending. The
/// ascending bucket order is load-bearing for time-series rendering.
pub fn daily_count_pipeline(filter: Document, date_field: &str) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": {
            "_id": day_key(date_field),
            "count": { "$sum": 1 },
        } },
        doc! { "$sort": { "_id.year": 1, "_id.month": 1, "_id.day": 1 } },
    ]
}

/// Daily created count with a completed sub-count, ascending.
pub fn daily_activity_pipeline(filter: Document, date_field: &str) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": {
            "_id": day_key(date_field),
            "created": { "$sum": 1 },
            "completed": completed_cond(),
        } },
        doc! { "$sort": { "_id.year": 1, "_id.month": 1, "_id.day": 1 } },
    ]
}

/// Weekly creation/completion trend over a project's tasks.
pub fn weekly_activity_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": {
            "_id": {
                "year": { "$year": "$created_at" },
                "month": { "$month": "$created_at" },
                "week": { "$week": "$created_at" },
            },
            "created": { "$sum": 1 },
            "completed": completed_cond(),
        } },
        doc! { "$sort": { "_id.year": 1, "_id.month": 1, "_id.week": 1 } },
    ]
}

/// Per-assignee rollup with user display fields, ranked by completion rate,
/// top 10. The divisor cannot be zero: a group only exists once at least one
/// task matched.
pub fn user_performance_pipeline(mut task_filter: Document) -> Vec<Document> {
    task_filter.insert("assigned_to", doc! { "$exists": true, "$ne": null });
    vec![
        doc! { "$match": task_filter },
        doc! { "$group": {
            "_id": "$assigned_to",
            "totalTasks": { "$sum": 1 },
            "completedTasks": completed_cond(),
            "averageProgress": { "$avg": "$progress" },
            "totalTimeSpent": { "$sum": "$actual_hours" },
        } },
        doc! { "$lookup": {
            "from": "users",
            "localField": "_id",
            "foreignField": "user_id",
            "as": "user",
        } },
        doc! { "$unwind": "$user" },
        doc! { "$project": {
            "_id": 0,
            "user": {
                "userId": "$user.user_id",
                "name": "$user.name",
                "email": "$user.email",
                "avatar": "$user.avatar",
            },
            "totalTasks": 1,
            "completedTasks": 1,
            "completionRate": {
                "$multiply": [
                    { "$divide": ["$completedTasks", "$totalTasks"] },
                    100,
                ]
            },
            "averageProgress": { "$round": ["$averageProgress", 2] },
            "totalTimeSpent": { "$round": ["$totalTimeSpent", 2] },
        } },
        doc! { "$sort": { "completionRate": -1 } },
        doc! { "$limit": 10 },
    ]
}

/// Overdue open tasks grouped by priority.
pub fn overdue_pipeline(mut task_filter: Document, now: BsonDateTime) -> Vec<Document> {
    task_filter.insert("due_date", doc! { "$lt": now });
    task_filter.insert("status", doc! { "$ne": "completed" });
    group_count_pipeline(task_filter, "priority")
}

/// Per-member contribution rollup for one project, including unassigned
/// tasks as a null-member row.
pub fn member_contribution_pipeline(project_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "project": project_id } },
        doc! { "$group": {
            "_id": "$assigned_to",
            "tasksAssigned": { "$sum": 1 },
            "tasksCompleted": completed_cond(),
            "totalTimeSpent": { "$sum": {
                "$reduce": {
                    "input": { "$ifNull": ["$time_tracking", []] },
                    "initialValue": 0,
                    "in": { "$add": ["$$value", { "$ifNull": ["$$this.duration", 0] }] },
                }
            } },
        } },
        doc! { "$lookup": {
            "from": "users",
            "localField": "_id",
            "foreignField": "user_id",
            "as": "user",
        } },
        doc! { "$unwind": { "path": "$user", "preserveNullAndEmptyArrays": true } },
        doc! { "$project": {
            "_id": 0,
            "user": {
                "userId": "$user.user_id",
                "name": "$user.name",
                "email": "$user.email",
                "avatar": "$user.avatar",
            },
            "tasksAssigned": 1,
            "tasksCompleted": 1,
            "totalTimeSpent": 1,
        } },
    ]
}

/// Minutes tracked per day across a project's tasks, ascending.
pub fn time_tracking_pipeline(project_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "project": project_id } },
        doc! { "$unwind": "$time_tracking" },
        doc! { "$group": {
            "_id": day_key("time_tracking.date"),
            "totalMinutes": { "$sum": "$time_tracking.duration" },
        } },
        doc! { "$sort": { "_id.year": 1, "_id.month": 1, "_id.day": 1 } },
    ]
}

/// Single null-key rollup backing the burndown chart.
pub fn burndown_pipeline(project_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "project": project_id } },
        doc! { "$group": {
            "_id": null,
            "totalTasks": { "$sum": 1 },
            "completedTasks": completed_cond(),
            "estimatedHours": { "$sum": "$estimated_hours" },
            "actualHours": { "$sum": "$actual_hours" },
        } },
    ]
}

/// Per-status rollup of one user's assigned tasks.
pub fn user_task_stats_pipeline(user_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "assigned_to": user_id } },
        doc! { "$group": {
            "_id": "$status",
            "count": { "$sum": 1 },
            "averageProgress": { "$avg": "$progress" },
            "totalEstimatedHours": { "$sum": "$estimated_hours" },
            "totalActualHours": { "$sum": "$actual_hours" },
        } },
    ]
}

/// Daily update/completion activity for one user, ascending.
pub fn user_productivity_pipeline(user_id: &str, since: BsonDateTime) -> Vec<Document> {
    vec![
        doc! { "$match": {
            "assigned_to": user_id,
            "updated_at": { "$gte": since },
        } },
        doc! { "$group": {
            "_id": day_key("updated_at"),
            "tasksUpdated": { "$sum": 1 },
            "tasksCompleted": completed_cond(),
        } },
        doc! { "$sort": { "_id.year": 1, "_id.month": 1, "_id.day": 1 } },
    ]
}

/// Hours a user spent per project, with project display fields, descending.
pub fn time_by_project_pipeline(user_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "assigned_to": user_id } },
        doc! { "$group": {
            "_id": "$project",
            "totalHours": { "$sum": "$actual_hours" },
            "taskCount": { "$sum": 1 },
        } },
        doc! { "$lookup": {
            "from": "projects",
            "localField": "_id",
            "foreignField": "project_id",
            "as": "project",
        } },
        doc! { "$unwind": "$project" },
        doc! { "$project": {
            "_id": 0,
            "project": {
                "projectId": "$project.project_id",
                "name": "$project.name",
                "color": "$project.color",
            },
            "totalHours": { "$round": ["$totalHours", 2] },
            "taskCount": 1,
        } },
        doc! { "$sort": { "totalHours": -1 } },
    ]
}

/// Per-user productivity over the whole active roster. Joins each user to
/// the tasks touched in the window; users with zero tasks are kept, so the
/// completion rate carries an explicit zero-denominator guard.
pub fn team_productivity_pipeline(since: BsonDateTime) -> Vec<Document> {
    vec![
        doc! { "$match": { "is_active": true } },
        doc! { "$lookup": {
            "from": "tasks",
            "let": { "userId": "$user_id" },
            "pipeline": [
                { "$match": {
                    "$expr": { "$eq": ["$assigned_to", "$$userId"] },
                    "updated_at": { "$gte": since },
                } }
            ],
            "as": "tasks",
        } },
        doc! { "$project": {
            "_id": 0,
            "userId": "$user_id",
            "name": 1,
            "email": 1,
            "avatar": 1,
            "role": 1,
            "totalTasks": { "$size": "$tasks" },
            "completedTasks": { "$size": {
                "$filter": {
                    "input": "$tasks",
                    "cond": { "$eq": ["$$this.status", "completed"] },
                }
            } },
            "averageProgress": { "$avg": "$tasks.progress" },
            "totalTimeSpent": { "$sum": "$tasks.actual_hours" },
        } },
        doc! { "$addFields": {
            "completionRate": {
                "$cond": [
                    { "$eq": ["$totalTasks", 0] },
                    0,
                    { "$multiply": [
                        { "$divide": ["$completedTasks", "$totalTasks"] },
                        100,
                    ] },
                ]
            }
        } },
        doc! { "$sort": { "completionRate": -1 } },
    ]
}

/// Per-project collaboration rollup: tasks with at least one comment
/// touched inside the window, top 10 projects by comment volume.
pub fn collaboration_pipeline(since: BsonDateTime) -> Vec<Document> {
    vec![
        doc! { "$match": {
            "updated_at": { "$gte": since },
            "comments.0": { "$exists": true },
        } },
        doc! { "$project": {
            "project": 1,
            "commentCount": { "$size": "$comments" },
            "uniqueCommenters": { "$size": { "$setUnion": ["$comments.user", []] } },
        } },
        doc! { "$group": {
            "_id": "$project",
            "totalComments": { "$sum": "$commentCount" },
            "averageCollaboration": { "$avg": "$uniqueCommenters" },
            "taskCount": { "$sum": 1 },
        } },
        doc! { "$lookup": {
            "from": "projects",
            "localField": "_id",
            "foreignField": "project_id",
            "as": "project",
        } },
        doc! { "$unwind": "$project" },
        doc! { "$project": {
            "_id": 0,
            "project": {
                "projectId": "$project.project_id",
                "name": "$project.name",
                "color": "$project.color",
            },
            "totalComments": 1,
            "averageCollaboration": 1,
            "taskCount": 1,
        } },
        doc! { "$sort": { "totalComments": -1 } },
        doc! { "$limit": 10 },
    ]
}

/// Workload ranking: open assigned tasks weighted by average numeric
/// priority (low/medium/high/urgent -> 1/2/3/4, default 2).
pub fn workload_pipeline() -> Vec<Document> {
    vec![
        doc! { "$match": {
            "assigned_to": { "$exists": true, "$ne": null },
            "status": { "$ne": "completed" },
        } },
        doc! { "$group": {
            "_id": "$assigned_to",
            "activeTasks": { "$sum": 1 },
            "totalEstimatedHours": { "$sum": "$estimated_hours" },
            "averagePriority": { "$avg": {
                "$switch": {
                    "branches": [
                        { "case": { "$eq": ["$priority", "low"] }, "then": 1 },
                        { "case": { "$eq": ["$priority", "medium"] }, "then": 2 },
                        { "case": { "$eq": ["$priority", "high"] }, "then": 3 },
                        { "case": { "$eq": ["$priority", "urgent"] }, "then": 4 },
                    ],
                    "default": 2,
                }
            } },
        } },
        doc! { "$lookup": {
            "from": "users",
            "localField": "_id",
            "foreignField": "user_id",
            "as": "user",
        } },
        doc! { "$unwind": "$user" },
        doc! { "$project": {
            "_id": 0,
            "user": {
                "userId": "$user.user_id",
                "name": "$user.name",
                "avatar": "$user.avatar",
            },
            "activeTasks": 1,
            "totalEstimatedHours": { "$round": ["$totalEstimatedHours", 2] },
            "workloadScore": { "$multiply": ["$activeTasks", "$averagePriority"] },
        } },
        doc! { "$sort": { "workloadScore": -1 } },
    ]
}

// ---------------------------------------------------------------------------
// Execution and shaping
// ---------------------------------------------------------------------------

/// Execute a pipeline and deserialize every row into `T`.
pub async fn run_pipeline<T: DeserializeOwned>(
    coll: &Collection<Document>,
    pipeline: Vec<Document>,
) -> Result<Vec<T>, mongodb::error::Error> {
    let docs: Vec<Document> = coll.aggregate(pipeline).await?.try_collect().await?;
    docs.into_iter()
        .map(|d| from_document(d).map_err(mongodb::error::Error::from))
        .collect()
}

/// Collapse `{_id, count}` rows into a `{category: count}` object.
pub fn distribution(rows: Vec<CategoryCount>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for row in rows {
        map.insert(row.key, serde_json::Value::from(row.count));
    }
    serde_json::Value::Object(map)
}

/// Shape per-status rollups as `{status: {count, averageProgress, ...}}`
/// with the average rounded to an integer.
pub fn status_rollup_map(rows: Vec<StatusRollup>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for row in rows {
        map.insert(
            row.status,
            serde_json::json!({
                "count": row.count,
                "averageProgress": row.average_progress.unwrap_or(0.0).round() as i64,
                "totalEstimatedHours": row.total_estimated_hours,
                "totalActualHours": row.total_actual_hours,
            }),
        );
    }
    serde_json::Value::Object(map)
}

/// The per-project analytics summary: status distribution, member rollup and
/// daily completion buckets, issued concurrently.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub task_stats: serde_json::Value,
    pub member_stats: Vec<MemberStat>,
    pub time_stats: Vec<DailyCount>,
}

fn member_stat_pipeline(project_id: &str) -> Vec<Document> {
    vec![
        doc! { "$match": { "project": project_id } },
        doc! { "$group": {
            "_id": "$assigned_to",
            "taskCount": { "$sum": 1 },
            "completedTasks": completed_cond(),
        } },
        doc! { "$lookup": {
            "from": "users",
            "localField": "_id",
            "foreignField": "user_id",
            "as": "user",
        } },
        doc! { "$unwind": { "path": "$user", "preserveNullAndEmptyArrays": true } },
        doc! { "$project": {
            "_id": 0,
            "user": {
                "userId": "$user.user_id",
                "name": "$user.name",
                "email": "$user.email",
                "avatar": "$user.avatar",
            },
            "taskCount": 1,
            "completedTasks": 1,
        } },
    ]
}

pub async fn project_summary(
    db: &Database,
    project_id: &str,
) -> Result<ProjectSummary, mongodb::error::Error> {
    let tasks = db.collection::<Document>("tasks");

    let (task_stats, member_stats, time_stats) = futures::try_join!(
        run_pipeline::<CategoryCount>(
            &tasks,
            group_count_pipeline(doc! { "project": project_id }, "status"),
        ),
        run_pipeline::<MemberStat>(&tasks, member_stat_pipeline(project_id)),
        run_pipeline::<DailyCount>(
            &tasks,
            daily_count_pipeline(
                doc! { "project": project_id, "status": "completed" },
                "updated_at",
            ),
        ),
    )?;

    Ok(ProjectSummary {
        task_stats: distribution(task_stats),
        member_stats,
        time_stats,
    })
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

fn server_error(msg: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({ "message": msg }))
}

fn access_denied() -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({ "message": "Access denied" }))
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({ "message": "Unauthorized" }))
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeQuery {
    #[serde(rename = "timeRange")]
    pub time_range: Option<String>,
}

impl TimeRangeQuery {
    fn days(&self) -> i64 {
        self.time_range
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30)
    }
}

/// GET /api/analytics/dashboard?timeRange={days}
pub async fn dashboard_analytics(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<TimeRangeQuery>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_manager_or_admin() {
        return access_denied();
    }

    let start = days_ago(query.days());
    let db = &data.mongodb.db;

    let scope = match resolve_scope(db, &current).await {
        Ok(s) => s,
        Err(e) => {
            error!("Error resolving project scope: {}", e);
            return server_error("Server error fetching analytics");
        }
    };
    let task_filter = scope.task_filter();
    let project_query = project_filter(&current);

    let tasks = db.collection::<Document>("tasks");
    let projects = db.collection::<Document>("projects");
    let users = db.collection::<Document>("users");

    let mut completed_filter = task_filter.clone();
    completed_filter.insert("status", "completed");
    completed_filter.insert("completed_at", doc! { "$gte": start });

    let mut recent_filter = task_filter.clone();
    recent_filter.insert("status", "completed");
    recent_filter.insert("completed_at", doc! { "$gte": days_ago(7) });

    let mut created_filter = task_filter.clone();
    created_filter.insert("created_at", doc! { "$gte": start });

    let total_tasks_filter = task_filter.clone();
    let total_projects_filter = project_query.clone();

    let results = futures::try_join!(
        // Summary counts.
        async { tasks.count_documents(total_tasks_filter).await },
        async { projects.count_documents(total_projects_filter).await },
        async { users.count_documents(doc! { "is_active": true }).await },
        async { tasks.count_documents(completed_filter).await },
        // Distributions.
        run_pipeline::<CategoryCount>(&tasks, group_count_pipeline(task_filter.clone(), "status")),
        run_pipeline::<CategoryCount>(&tasks, group_count_pipeline(task_filter.clone(), "priority")),
        run_pipeline::<CategoryCount>(&projects, group_count_pipeline(project_query, "status")),
        // Trends.
        run_pipeline::<DailyCount>(&tasks, daily_count_pipeline(recent_filter, "completed_at")),
        run_pipeline::<DailyActivity>(&tasks, daily_activity_pipeline(created_filter, "created_at")),
        // Rollups.
        run_pipeline::<UserPerformance>(&tasks, user_performance_pipeline(task_filter.clone())),
        run_pipeline::<CategoryCount>(
            &tasks,
            overdue_pipeline(task_filter, BsonDateTime::now()),
        ),
    );

    let (
        total_tasks,
        total_projects,
        total_users,
        completed_this_period,
        task_status,
        task_priority,
        project_status,
        recent_activity,
        productivity,
        user_performance,
        overdue,
    ) = match results {
        Ok(r) => r,
        Err(e) => {
            error!("Error running dashboard aggregations: {}", e);
            return server_error("Server error fetching analytics");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "summary": {
            "totalTasks": total_tasks,
            "totalProjects": total_projects,
            "totalUsers": total_users,
            "completedThisPeriod": completed_this_period,
        },
        "taskStatusStats": distribution(task_status),
        "taskPriorityStats": distribution(task_priority),
        "projectStatusStats": distribution(project_status),
        "recentActivity": recent_activity,
        "productivityStats": productivity,
        "userPerformance": user_performance,
        "overdueStats": distribution(overdue),
    }))
}

/// GET /api/analytics/project/{id}
pub async fn project_analytics(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let project_id = path.into_inner();
    let db = &data.mongodb.db;

    let project = match find_project(db, &project_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "message": "Project not found" }))
        }
        Err(e) => {
            error!("Error fetching project: {}", e);
            return server_error("Server error fetching project analytics");
        }
    };
    if !can_access_project(&project, &current) {
        return access_denied();
    }

    let tasks = db.collection::<Document>("tasks");
    let results = futures::try_join!(
        project_summary(db, &project_id),
        run_pipeline::<WeeklyActivity>(
            &tasks,
            weekly_activity_pipeline(doc! { "project": &project_id }),
        ),
        run_pipeline::<MemberContribution>(&tasks, member_contribution_pipeline(&project_id)),
        run_pipeline::<DailyMinutes>(&tasks, time_tracking_pipeline(&project_id)),
        run_pipeline::<Burndown>(&tasks, burndown_pipeline(&project_id)),
    );

    let (summary, task_trends, member_contributions, time_tracking, burndown) = match results {
        Ok(r) => r,
        Err(e) => {
            error!("Error running project aggregations: {}", e);
            return server_error("Server error fetching project analytics");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "taskStats": summary.task_stats,
        "memberStats": summary.member_stats,
        "timeStats": summary.time_stats,
        "taskTrends": task_trends,
        "memberContributions": member_contributions,
        "timeTracking": time_tracking,
        "burndownData": burndown.into_iter().next().unwrap_or_default(),
    }))
}

/// GET /api/analytics/user/{id}
pub async fn user_analytics(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    let user_id = path.into_inner();
    let db = &data.mongodb.db;

    let users = db.collection::<Document>("users");
    match users.find_one(doc! { "user_id": &user_id }).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(serde_json::json!({ "message": "User not found" }))
        }
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Server error fetching user analytics");
        }
    }
    if user_id != current.id && !current.is_admin() {
        return access_denied();
    }

    let tasks = db.collection::<Document>("tasks");
    let tasks_typed = db.collection::<Task>("tasks");

    let results = futures::try_join!(
        run_pipeline::<StatusRollup>(&tasks, user_task_stats_pipeline(&user_id)),
        run_pipeline::<DailyUserActivity>(
            &tasks,
            user_productivity_pipeline(&user_id, days_ago(30)),
        ),
        run_pipeline::<TimeByProject>(&tasks, time_by_project_pipeline(&user_id)),
        async {
            tasks_typed
                .find(doc! {
                    "assigned_to": &user_id,
                    "updated_at": { "$gte": days_ago(7) },
                })
                .sort(doc! { "updated_at": -1 })
                .limit(10)
                .await?
                .try_collect::<Vec<Task>>()
                .await
        },
    );

    let (task_stats, productivity_trends, time_by_project, recent_activity) = match results {
        Ok(r) => r,
        Err(e) => {
            error!("Error running user aggregations: {}", e);
            return server_error("Server error fetching user analytics");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "taskStats": status_rollup_map(task_stats),
        "productivityTrends": productivity_trends,
        "timeSpentByProject": time_by_project,
        "recentActivity": recent_activity,
    }))
}

/// GET /api/analytics/team?timeRange={days}
pub async fn team_analytics(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<TimeRangeQuery>,
) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return unauthorized(),
    };
    if !current.is_manager_or_admin() {
        return access_denied();
    }

    let start = days_ago(query.days());
    let db = &data.mongodb.db;
    let tasks = db.collection::<Document>("tasks");
    let users = db.collection::<Document>("users");

    let results = futures::try_join!(
        run_pipeline::<TeamProductivity>(&users, team_productivity_pipeline(start)),
        run_pipeline::<CollaborationStat>(&tasks, collaboration_pipeline(start)),
        run_pipeline::<WorkloadEntry>(&tasks, workload_pipeline()),
    );

    let (team_productivity, collaboration_stats, workload_distribution) = match results {
        Ok(r) => r,
        Err(e) => {
            error!("Error running team aggregations: {}", e);
            return server_error("Server error fetching team analytics");
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "teamProductivity": team_productivity,
        "collaborationStats": collaboration_stats,
        "workloadDistribution": workload_distribution,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_collapses_rows_to_object() {
        let rows = vec![
            CategoryCount { key: "completed".into(), count: 2 },
            CategoryCount { key: "in-progress".into(), count: 1 },
            CategoryCount { key: "todo".into(), count: 1 },
        ];
        let value = distribution(rows);
        assert_eq!(value["completed"], 2);
        assert_eq!(value["in-progress"], 1);
        assert_eq!(value["todo"], 1);
        // Zero categories are omitted, not zero-filled.
        assert!(value.get("cancelled").is_none());
    }

    #[test]
    fn distribution_total_matches_row_sum() {
        let rows = vec![
            CategoryCount { key: "todo".into(), count: 3 },
            CategoryCount { key: "review".into(), count: 4 },
        ];
        let value = distribution(rows);
        let total: i64 = value
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_i64().unwrap())
            .sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn group_count_groups_on_requested_field() {
        let pipeline = group_count_pipeline(doc! { "project": "p1" }, "status");
        assert_eq!(pipeline.len(), 2);
        let group = pipeline[1].get_document("$group").unwrap();
        assert_eq!(group.get_str("_id").unwrap(), "$status");
    }

    #[test]
    fn daily_trend_sorts_ascending_by_bucket() {
        let pipeline = daily_count_pipeline(doc! {}, "completed_at");
        let sort = pipeline.last().unwrap().get_document("$sort").unwrap();
        assert_eq!(sort.get_i32("_id.year").unwrap(), 1);
        assert_eq!(sort.get_i32("_id.month").unwrap(), 1);
        assert_eq!(sort.get_i32("_id.day").unwrap(), 1);
    }

    #[test]
    fn weekly_trend_buckets_by_week() {
        let pipeline = weekly_activity_pipeline(doc! { "project": "p1" });
        let group = pipeline[1].get_document("$group").unwrap();
        let key = group.get_document("_id").unwrap();
        assert!(key.contains_key("week"));
        let sort = pipeline.last().unwrap().get_document("$sort").unwrap();
        assert_eq!(sort.get_i32("_id.week").unwrap(), 1);
    }

    #[test]
    fn user_performance_caps_at_ten_and_sorts_by_rate() {
        let pipeline = user_performance_pipeline(doc! { "project": { "$in": ["p1"] } });
        let limit = pipeline.last().unwrap().get_i32("$limit").unwrap();
        assert_eq!(limit, 10);
        let sort = pipeline[pipeline.len() - 2].get_document("$sort").unwrap();
        assert_eq!(sort.get_i32("completionRate").unwrap(), -1);
    }

    #[test]
    fn user_performance_excludes_unassigned_tasks() {
        let pipeline = user_performance_pipeline(doc! {});
        let matched = pipeline[0].get_document("$match").unwrap();
        let assigned = matched.get_document("assigned_to").unwrap();
        assert!(assigned.get_bool("$exists").unwrap());
    }

    #[test]
    fn workload_priority_switch_defaults_to_medium() {
        let pipeline = workload_pipeline();
        let group = pipeline[1].get_document("$group").unwrap();
        let avg = group
            .get_document("averagePriority")
            .unwrap()
            .get_document("$avg")
            .unwrap()
            .get_document("$switch")
            .unwrap();
        assert_eq!(avg.get_i32("default").unwrap(), 2);
        assert_eq!(avg.get_array("branches").unwrap().len(), 4);
    }

    #[test]
    fn workload_only_counts_open_tasks() {
        let pipeline = workload_pipeline();
        let matched = pipeline[0].get_document("$match").unwrap();
        let status = matched.get_document("status").unwrap();
        assert_eq!(status.get_str("$ne").unwrap(), "completed");
    }

    #[test]
    fn team_productivity_guards_zero_denominator() {
        let pipeline = team_productivity_pipeline(BsonDateTime::from_millis(0));
        let add_fields = pipeline
            .iter()
            .find(|stage| stage.contains_key("$addFields"))
            .unwrap()
            .get_document("$addFields")
            .unwrap();
        let cond = add_fields
            .get_document("completionRate")
            .unwrap()
            .get_array("$cond")
            .unwrap();
        assert_eq!(cond.len(), 3);
    }

    #[test]
    fn collaboration_requires_a_comment_and_caps_at_ten() {
        let pipeline = collaboration_pipeline(BsonDateTime::from_millis(0));
        let matched = pipeline[0].get_document("$match").unwrap();
        assert!(matched.contains_key("comments.0"));
        let limit = pipeline.last().unwrap().get_i32("$limit").unwrap();
        assert_eq!(limit, 10);
    }

    #[test]
    fn burndown_groups_without_a_key() {
        let pipeline = burndown_pipeline("p1");
        let group = pipeline[1].get_document("$group").unwrap();
        assert_eq!(group.get("_id"), Some(&mongodb::bson::Bson::Null));
    }

    #[test]
    fn burndown_default_row_is_zeroed() {
        let row = Burndown::default();
        assert_eq!(row.total_tasks, 0);
        assert_eq!(row.completed_tasks, 0);
        assert_eq!(row.estimated_hours, 0.0);
        assert_eq!(row.actual_hours, 0.0);
    }

    #[test]
    fn status_rollup_map_rounds_average_progress() {
        let rows = vec![StatusRollup {
            status: "in-progress".into(),
            count: 3,
            average_progress: Some(41.6),
            total_estimated_hours: 10.0,
            total_actual_hours: 7.5,
        }];
        let value = status_rollup_map(rows);
        assert_eq!(value["in-progress"]["averageProgress"], 42);
        assert_eq!(value["in-progress"]["count"], 3);
    }

    #[test]
    fn overdue_pipeline_filters_open_past_due() {
        let now = BsonDateTime::from_millis(1_000_000);
        let pipeline = overdue_pipeline(doc! { "project": { "$in": ["p1"] } }, now);
        let matched = pipeline[0].get_document("$match").unwrap();
        assert!(matched.get_document("due_date").unwrap().contains_key("$lt"));
        assert_eq!(
            matched.get_document("status").unwrap().get_str("$ne").unwrap(),
            "completed"
        );
    }

    #[test]
    fn time_range_defaults_to_thirty_days() {
        let q = TimeRangeQuery { time_range: None };
        assert_eq!(q.days(), 30);
        let q = TimeRangeQuery { time_range: Some("7".into()) };
        assert_eq!(q.days(), 7);
        let q = TimeRangeQuery { time_range: Some("junk".into()) };
        assert_eq!(q.days(), 30);
    }
}

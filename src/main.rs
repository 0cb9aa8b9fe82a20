// src/main.rs

mod analytics;
mod app_state;
mod auth;
mod config;
mod db;
mod models;
mod notifier;
mod projects;
mod scope;
mod tasks;
mod users;
mod validate;
mod ws;

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};

use crate::app_state::AppState;
use crate::auth::{login, me, register, verify_token};

#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Extract "Bearer <token>" from the Authorization header if present.
        // A missing header passes through; every protected handler rejects
        // requests without a principal in extensions.
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim();
                    let secret = env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());
                    match verify_token(token, &secret) {
                        Ok(principal) => {
                            req.extensions_mut().insert(principal);
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .json(serde_json::json!({
                                    "message": format!("Invalid token: {}", e)
                                }))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/// GET /api/health
async fn health(started: web::Data<Instant>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": started.elapsed().as_secs(),
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let started = Instant::now();
    let config = config::Config::from_env();
    let mongodb = Arc::new(db::MongoDB::init(&config.mongo_uri, &config.database_name).await);
    let notifier = notifier::Notifier::new().start();

    println!("Server running at http://{}", config.bind_addr);
    println!("Allowed CORS Origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication)
            .app_data(web::Data::new(started))
            .app_data(web::Data::new(AppState {
                notifier: notifier.clone(),
                mongodb: mongodb.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/api/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/me", web::get().to(me)),
            )
            .service(
                web::scope("/api/users")
                    .route("", web::get().to(users::list_users))
                    .route("/search/{query}", web::get().to(users::search_users))
                    .route("/{id}/dashboard", web::get().to(users::user_dashboard))
                    .route("/{id}", web::get().to(users::get_user))
                    .route("/{id}", web::put().to(users::update_user))
                    .route("/{id}", web::delete().to(users::delete_user)),
            )
            .service(
                web::scope("/api/projects")
                    .route("", web::get().to(projects::list_projects))
                    .route("", web::post().to(projects::create_project))
                    .route("/{id}/members/{user_id}", web::delete().to(projects::remove_member))
                    .route("/{id}/members", web::post().to(projects::add_member))
                    .route("/{id}/archive", web::put().to(projects::archive_project))
                    .route("/{id}", web::get().to(projects::get_project))
                    .route("/{id}", web::put().to(projects::update_project))
                    .route("/{id}", web::delete().to(projects::delete_project)),
            )
            .service(
                web::scope("/api/tasks")
                    .route("", web::get().to(tasks::list_tasks))
                    .route("", web::post().to(tasks::create_task))
                    .route("/reorder", web::put().to(tasks::reorder_tasks))
                    .route("/project/{project_id}", web::get().to(tasks::project_tasks))
                    .route("/{id}/comments", web::post().to(tasks::add_comment))
                    .route("/{id}/time", web::post().to(tasks::add_time_entry))
                    .route("/{id}", web::get().to(tasks::get_task))
                    .route("/{id}", web::put().to(tasks::update_task))
                    .route("/{id}", web::delete().to(tasks::delete_task)),
            )
            .service(
                web::scope("/api/analytics")
                    .route("/dashboard", web::get().to(analytics::dashboard_analytics))
                    .route("/project/{id}", web::get().to(analytics::project_analytics))
                    .route("/user/{id}", web::get().to(analytics::user_analytics))
                    .route("/team", web::get().to(analytics::team_analytics)),
            )
            .route("/api/health", web::get().to(health))
            // WEBSOCKET route for real-time
            .service(web::resource("/ws").route(web::get().to(ws::ws_index)))
    })
    .bind(bind_addr)?
    .run()
    .await
}

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::user::{Preferences, PublicUser, Role, User};
use crate::scope::AuthUser;
use crate::validate::{check_length, is_valid_email, validation_failed, FieldError};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

pub fn create_jwt(user_id: &str, role: Role, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(AuthUser {
        id: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

/// Pull the authenticated principal out of request extensions.
pub fn current_user(req: &HttpRequest) -> Option<AuthUser> {
    req.extensions().get::<AuthUser>().cloned()
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> impl Responder {
    let mut errors = Vec::new();
    check_length(&mut errors, "name", &payload.name, 2, 50);
    if !is_valid_email(&payload.email) {
        errors.push(FieldError::new("email", "Please enter a valid email"));
    }
    if payload.password.chars().count() < 6 {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 6 characters",
        ));
    }
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let users = data.mongodb.db.collection::<User>("users");
    let email = payload.email.trim().to_lowercase();

    match users.find_one(doc! { "email": &email }).await {
        Ok(Some(_)) => return HttpResponse::BadRequest().json(serde_json::json!({
            "message": "Email already exists"
        })),
        Ok(None) => {}
        Err(e) => {
            error!("Error checking email uniqueness: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error registering user"
            }));
        }
    }

    let hashed = match hash(&payload.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            error!("Error hashing password: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error registering user"
            }));
        }
    };

    let now = BsonDateTime::now();
    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        email,
        password: hashed,
        avatar: String::new(),
        role: Role::Member,
        department: String::new(),
        phone: String::new(),
        bio: String::new(),
        skills: vec![],
        is_active: true,
        last_login: now,
        preferences: Preferences::default(),
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = users.insert_one(&new_user).await {
        error!("Error inserting user: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "message": "Server error registering user"
        }));
    }

    let token = match create_jwt(&new_user.user_id, new_user.role, &data.config.jwt_secret) {
        Ok(t) => t,
        Err(e) => {
            error!("Error signing token: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error registering user"
            }));
        }
    };

    HttpResponse::Created().json(serde_json::json!({
        "token": token,
        "user": PublicUser::from(new_user),
    }))
}

/// POST /api/auth/login
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> impl Responder {
    let users = data.mongodb.db.collection::<User>("users");
    let email = payload.email.trim().to_lowercase();

    let user = match users.find_one(doc! { "email": &email }).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "message": "Invalid credentials"
            }))
        }
        Err(e) => {
            error!("Error fetching user for login: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error logging in"
            }));
        }
    };

    if !verify(&payload.password, &user.password).unwrap_or(false) {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "message": "Invalid credentials"
        }));
    }

    if !user.is_active {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "message": "Account is deactivated"
        }));
    }

    let now = BsonDateTime::now();
    if let Err(e) = users
        .update_one(
            doc! { "user_id": &user.user_id },
            doc! { "$set": { "last_login": now } },
        )
        .await
    {
        error!("Error stamping last login: {}", e);
    }

    let token = match create_jwt(&user.user_id, user.role, &data.config.jwt_secret) {
        Ok(t) => t,
        Err(e) => {
            error!("Error signing token: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error logging in"
            }));
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user": PublicUser::from(user),
    }))
}

/// GET /api/auth/me
pub async fn me(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let current = match current_user(&req) {
        Some(u) => u,
        None => return HttpResponse::Unauthorized().json(serde_json::json!({
            "message": "Unauthorized"
        })),
    };

    let users = data.mongodb.db.collection::<User>("users");
    match users.find_one(doc! { "user_id": &current.id }).await {
        Ok(Some(user)) => HttpResponse::Ok().json(PublicUser::from(user)),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "message": "User not found"
        })),
        Err(e) => {
            error!("Error fetching current user: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Server error fetching user"
            }))
        }
    }
}

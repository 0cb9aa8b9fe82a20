use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// Global role. Privilege is totally ordered: admin > manager > member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Member,
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub push: bool,
    pub desktop: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        NotificationPreferences {
            email: true,
            push: true,
            desktop: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: String,
    pub notifications: NotificationPreferences,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            theme: "auto".to_string(),
            notifications: NotificationPreferences::default(),
            language: "en".to_string(),
        }
    }
}

/// The User entity as stored. The password hash is only ever sent back to
/// the database; API responses use `PublicUser`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub skills: Vec<String>,
    pub is_active: bool,
    pub last_login: DateTime,
    #[serde(default)]
    pub preferences: Preferences,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Response shape for a user: everything except the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub role: Role,
    pub department: String,
    pub phone: String,
    pub bio: String,
    pub skills: Vec<String>,
    pub is_active: bool,
    pub last_login: DateTime,
    pub preferences: Preferences,
    pub created_at: DateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        PublicUser {
            user_id: u.user_id,
            name: u.name,
            email: u.email,
            avatar: u.avatar,
            role: u.role,
            department: u.department,
            phone: u.phone,
            bio: u.bio,
            skills: u.skills,
            is_active: u.is_active,
            last_login: u.last_login,
            preferences: u.preferences,
            created_at: u.created_at,
        }
    }
}

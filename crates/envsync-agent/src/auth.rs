//! # Application Tokens
//!
//! Long-lived credentials the engine presents as `username:token`.
//!
//! ```text
//! issue(username, role)          ──► plaintext token, shown once
//!                                    argon2 hash stored in agent_tokens
//!
//! authorize(username, token)
//!   no matching hash             ──► Unauthenticated (401)
//!   role editor / subscriber     ──► Forbidden       (403)
//!   role owner / administrator   ──► Ok(role)
//! ```

use std::fmt;
use std::str::FromStr;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

/// Role of a token holder on the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Administrator,
    Editor,
    Subscriber,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Administrator => "administrator",
            Role::Editor => "editor",
            Role::Subscriber => "subscriber",
        }
    }

    /// Only owner-level roles may move content in or out.
    pub fn can_sync(&self) -> bool {
        matches!(self, Role::Owner | Role::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "administrator" | "admin" => Ok(Role::Administrator),
            "editor" => Ok(Role::Editor),
            "subscriber" => Ok(Role::Subscriber),
            other => Err(AgentError::InvalidRequest(format!("unknown role '{}'", other))),
        }
    }
}

/// Token storage in the site database.
#[derive(Debug, Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        TokenStore { pool }
    }

    /// Creates a token and returns its plaintext. Only the hash is kept.
    pub async fn issue(&self, username: &str, role: Role) -> AgentResult<String> {
        if username.trim().is_empty() {
            return Err(AgentError::InvalidRequest("username is empty".into()));
        }

        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let hash = hash_token(&token)?;

        sqlx::query(
            "INSERT INTO agent_tokens (id, username, token_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(username)
        .bind(hash)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(username = %username, role = %role, "Issued application token");
        Ok(token)
    }

    /// Resolves a credential to its role.
    pub async fn authenticate(&self, username: &str, token: &str) -> AgentResult<Role> {
        let candidates: Vec<(String, String)> =
            sqlx::query_as("SELECT token_hash, role FROM agent_tokens WHERE username = ?1")
                .bind(username)
                .fetch_all(&self.pool)
                .await?;

        for (hash, role) in candidates {
            if verify_token(token, &hash) {
                debug!(username = %username, role = %role, "Token accepted");
                return role.parse();
            }
        }

        warn!(username = %username, "Rejected application token");
        Err(AgentError::Unauthenticated("invalid username or token".into()))
    }

    /// Resolves a credential and requires a role that may sync.
    pub async fn authorize(&self, username: &str, token: &str) -> AgentResult<Role> {
        let role = self.authenticate(username, token).await?;
        if !role.can_sync() {
            return Err(AgentError::Forbidden(format!(
                "role '{}' may not synchronize this installation",
                role
            )));
        }
        Ok(role)
    }
}

fn hash_token(token: &str) -> AgentResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| AgentError::Internal(format!("Failed to hash token: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_token(token: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(token.as_bytes(), &parsed)
        .is_ok()
}

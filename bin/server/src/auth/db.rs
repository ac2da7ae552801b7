//! Postgres-backed user directory and session store.

use async_trait::async_trait;
use b2c_signin_core::UserId;
use b2c_signin_identity::{
    DirectoryError, LocalUser, NewUser, ProfileUpdate, RoleSet, Session, SessionError,
    SessionEstablisher, SessionId, UserDirectory,
};
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::debug;

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    login: String,
    display_name: String,
    first_name: String,
    last_name: String,
    roles: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<LocalUser, Report<DirectoryError>> {
        let id = UserId::from_str(&self.id).map_err(|e| DirectoryError::Corrupt {
            details: format!("invalid user id '{}': {}", self.id, e),
        })?;
        Ok(LocalUser::with_all_fields(
            id,
            self.email,
            self.login,
            self.display_name,
            self.first_name,
            self.last_name,
            RoleSet::from_names(&self.roles),
            self.created_at,
            self.updated_at,
        ))
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, Report<SessionError>> {
        let user_id = UserId::from_str(&self.user_id).map_err(|e| SessionError::Storage {
            details: format!("invalid user id '{}': {}", self.user_id, e),
        })?;
        Ok(Session::with_all_fields(
            SessionId::new(self.id),
            user_id,
            self.created_at,
            self.expires_at,
        ))
    }
}

fn unavailable(e: sqlx::Error) -> DirectoryError {
    DirectoryError::Unavailable {
        details: e.to_string(),
    }
}

fn storage(e: sqlx::Error) -> SessionError {
    SessionError::Storage {
        details: e.to_string(),
    }
}

/// User directory stored in the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    /// Creates a new user directory.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>, Report<DirectoryError>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, login, display_name, first_name, last_name, roles, created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(UserRow::try_into_user).transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, Report<DirectoryError>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, login, display_name, first_name, last_name, roles, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(UserRow::try_into_user).transpose()
    }

    async fn create(&self, user: NewUser) -> Result<UserId, Report<DirectoryError>> {
        let id = UserId::new();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, login, display_name, first_name, last_name, roles, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(id.to_string())
        .bind(&user.email)
        .bind(&user.login)
        .bind(&user.profile.display_name)
        .bind(&user.profile.first_name)
        .bind(&user.profile.last_name)
        .bind(user.roles.names())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                DirectoryError::Conflict {
                    email: user.email.clone(),
                }
            } else {
                unavailable(e)
            }
        })?;

        debug!(user_id = %id, "inserted user");
        Ok(id)
    }

    async fn update(&self, id: UserId, update: ProfileUpdate) -> Result<(), Report<DirectoryError>> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET display_name = $2, first_name = $3, last_name = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(&update.display_name)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::Corrupt {
                details: format!("no user with id {id}"),
            }
            .into());
        }
        Ok(())
    }
}

/// Repository for session operations.
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
    duration: Duration,
}

impl SessionRepository {
    /// Creates a session repository issuing sessions of `duration`.
    pub fn new(pool: PgPool, duration: Duration) -> Self {
        Self { pool, duration }
    }

    /// Finds a session by ID.
    pub async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, Report<SessionError>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(SessionRow::try_into_session).transpose()
    }

    async fn create(&self, session: &Session) -> Result<(), Report<SessionError>> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().to_string())
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Deletes a session by ID (logout).
    pub async fn delete(&self, id: &SessionId) -> Result<(), Report<SessionError>> {
        sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Deletes expired sessions.
    pub async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionEstablisher for SessionRepository {
    async fn establish(&self, user_id: UserId) -> Result<Session, Report<SessionError>> {
        let session = Session::new(SessionId::generate(), user_id, self.duration);
        self.create(&session).await?;
        Ok(session)
    }
}

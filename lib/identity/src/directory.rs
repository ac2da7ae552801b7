//! Local user records and the directory contract.
//!
//! The directory owns user storage. The sign-in flow looks users up by email
//! and asks for creates and profile updates; it never deletes. Every write is
//! derived from [`TrustedClaims`], so an unverified token cannot reach it.

use crate::error::DirectoryError;
use crate::role::RoleSet;
use crate::token::TrustedClaims;
use async_trait::async_trait;
use b2c_signin_core::{Result, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user known to the local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    id: UserId,
    /// Unique; sourced from the first `emails` claim.
    email: String,
    login: String,
    display_name: String,
    first_name: String,
    last_name: String,
    roles: RoleSet,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LocalUser {
    /// Creates a user record with no roles.
    #[must_use]
    pub fn new(id: UserId, email: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            login: email.clone(),
            email,
            display_name: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            roles: RoleSet::none(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstitutes a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        email: String,
        login: String,
        display_name: String,
        first_name: String,
        last_name: String,
        roles: RoleSet,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            login,
            display_name,
            first_name,
            last_name,
            roles,
            created_at,
            updated_at,
        }
    }

    /// Replaces the role set.
    #[must_use]
    pub fn with_roles(mut self, roles: RoleSet) -> Self {
        self.roles = roles;
        self
    }

    /// Applies a profile update. Id and email never change.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        self.display_name = update.display_name.clone();
        self.first_name = update.first_name.clone();
        self.last_name = update.last_name.clone();
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    #[must_use]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Profile fields taken from the name claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
}

impl ProfileUpdate {
    /// Reads `given_name` and `family_name`; absent claims become empty strings.
    ///
    /// The display name is always `"{given} {family}"`.
    #[must_use]
    pub fn from_claims(claims: &TrustedClaims) -> Self {
        let first_name = claims.claims().get_claim("given_name").first_or_empty();
        let last_name = claims.claims().get_claim("family_name").first_or_empty();
        Self {
            display_name: format!("{first_name} {last_name}"),
            first_name,
            last_name,
        }
    }
}

/// A user to provision on first sign-in.
///
/// The login is the email and no local password is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub login: String,
    pub profile: ProfileUpdate,
    pub roles: RoleSet,
}

impl NewUser {
    /// Builds a subscriber record for `email` from the token's name claims.
    #[must_use]
    pub fn from_claims(email: &str, claims: &TrustedClaims) -> Self {
        Self {
            email: email.to_string(),
            login: email.to_string(),
            profile: ProfileUpdate::from_claims(claims),
            roles: RoleSet::subscriber(),
        }
    }
}

/// Canonical form of an email address for lookup and storage.
///
/// Emails compare case-insensitively, so two claims differing only in case
/// name the same local user.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Read/write access to local users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds the user whose email matches ignoring case.
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>, DirectoryError>;

    /// Finds a user by id.
    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, DirectoryError>;

    /// Creates a user and returns its id.
    async fn create(&self, user: NewUser) -> Result<UserId, DirectoryError>;

    /// Replaces the profile fields of an existing user.
    async fn update(&self, id: UserId, update: ProfileUpdate) -> Result<(), DirectoryError>;
}

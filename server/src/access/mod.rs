//! Access control.
//!
//! Every public operation carries `(user, password)` credentials. The
//! verdict is a pure capability check: may this user perform this kind
//! of operation. Users are persisted in the `user` table; the root
//! user is seeded at startup, granted `read-write`, and protected from
//! removal and downgrade.
//!
//! The policy triad is `{read-only, write-only, read-write}`.
//! `write-only` is deliberate: such a user may `Add` and `Remove`
//! blocks but can never read them back.


use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::database::entity::user::{self, Entity as User, UserModel};
use crate::error::{ServerError, ServerResult};

/// An access policy.
#[derive(
    EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(10))")]
pub enum Policy {
    /// May read blocks but not create or remove them.
    #[sea_orm(string_value = "read-only")]
    #[serde(rename = "read-only")]
    ReadOnly,

    /// May create and remove blocks but not read them.
    #[sea_orm(string_value = "write-only")]
    #[serde(rename = "write-only")]
    WriteOnly,

    /// May do both.
    #[sea_orm(string_value = "read-write")]
    #[serde(rename = "read-write")]
    ReadWrite,
}

/// The kind of capability an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Policy {
    pub fn allows(&self, op: Operation) -> bool {
        match (self, op) {
            (Self::ReadOnly, Operation::Read) => true,
            (Self::WriteOnly, Operation::Write) => true,
            (Self::ReadWrite, _) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WriteOnly => "write-only",
            Self::ReadWrite => "read-write",
        }
    }
}

impl FromStr for Policy {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(Self::ReadOnly),
            "write-only" => Ok(Self::WriteOnly),
            "read-write" => Ok(Self::ReadWrite),
            other => Err(ServerError::InvalidPolicy {
                name: other.to_string(),
            }),
        }
    }
}

/// The user subsystem.
#[derive(Debug, Clone)]
pub struct AccessControl {
    db: DatabaseConnection,
    root_user: String,
}

impl AccessControl {
    /// Creates the subsystem and seeds the root user.
    ///
    /// An existing root row has its password refreshed so that a
    /// changed `--root-password` takes effect on restart.
    pub async fn new(
        db: DatabaseConnection,
        root_user: String,
        root_password: String,
    ) -> ServerResult<Self> {
        let this = Self { db, root_user };

        let root = user::ActiveModel {
            username: Set(this.root_user.clone()),
            password: Set(root_password),
            policy: Set(Policy::ReadWrite),
            capacity: Set(0),
        };

        User::insert(root)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(user::Column::Username)
                    .update_columns([user::Column::Password])
                    .to_owned(),
            )
            .exec(&this.db)
            .await?;

        Ok(this)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        username == self.root_user
    }

    /// Verifies credentials and the capability for `op`.
    pub async fn check(&self, username: &str, password: &str, op: Operation) -> ServerResult<()> {
        let user = self.authenticate(username, password).await?;

        if user.policy.allows(op) {
            Ok(())
        } else {
            Err(ServerError::AccessDenied)
        }
    }

    /// Verifies credentials and that the user is the root user.
    pub async fn check_admin(&self, username: &str, password: &str) -> ServerResult<()> {
        if !self.is_admin(username) {
            return Err(ServerError::AccessDenied);
        }
        self.authenticate(username, password).await?;
        Ok(())
    }

    /// Verifies credentials only.
    pub async fn authenticate(&self, username: &str, password: &str) -> ServerResult<UserModel> {
        let user = User::find_by_id(username).one(&self.db).await?;

        match user {
            Some(user) if user.password == password => Ok(user),
            _ => Err(ServerError::AccessDenied),
        }
    }

    pub async fn add_user(
        &self,
        username: String,
        password: String,
        policy: Policy,
        capacity: i64,
    ) -> ServerResult<()> {
        if self.is_admin(&username) {
            return Err(ServerError::UserAlreadyExists { username });
        }
        if User::find_by_id(&username).one(&self.db).await?.is_some() {
            return Err(ServerError::UserAlreadyExists { username });
        }

        let model = user::ActiveModel {
            username: Set(username),
            password: Set(password),
            policy: Set(policy),
            capacity: Set(capacity),
        };
        User::insert(model).exec(&self.db).await?;

        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> ServerResult<()> {
        if self.is_admin(username) {
            return Err(ServerError::ProtectedUser {
                username: username.to_string(),
            });
        }

        let deletion = User::delete_by_id(username).exec(&self.db).await?;
        if deletion.rows_affected == 0 {
            return Err(ServerError::NoSuchUser {
                username: username.to_string(),
            });
        }

        Ok(())
    }

    pub async fn query_user(&self, username: &str) -> ServerResult<UserModel> {
        User::find_by_id(username)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServerError::NoSuchUser {
                username: username.to_string(),
            })
    }

    /// Updates a user. `None` fields keep their current value.
    pub async fn update_user(
        &self,
        username: &str,
        password: Option<String>,
        policy: Option<Policy>,
        capacity: Option<i64>,
    ) -> ServerResult<()> {
        if self.is_admin(username) {
            return Err(ServerError::ProtectedUser {
                username: username.to_string(),
            });
        }

        let existing = self.query_user(username).await?;

        let mut model: user::ActiveModel = existing.into();
        if let Some(password) = password {
            model.password = Set(password);
        }
        if let Some(policy) = policy {
            model.policy = Set(policy);
        }
        if let Some(capacity) = capacity {
            model.capacity = Set(capacity);
        }
        model.update(&self.db).await?;

        Ok(())
    }
}

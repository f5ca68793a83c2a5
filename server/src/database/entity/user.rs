//! A pool user.

use sea_orm::entity::prelude::*;

use crate::access::Policy;

pub type UserModel = Model;

/// A user of the pool.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user")]
pub struct Model {
    /// The username.
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,

    /// The password.
    pub password: String,

    /// The access policy.
    pub policy: Policy,

    /// Storage capacity granted to the user, in bytes.
    pub capacity: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

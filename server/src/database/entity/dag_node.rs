//! A registered DagNode.

use sea_orm::entity::prelude::*;

use super::Json;
use crate::node::DagNodeConfig;

pub type DagNodeModel = Model;

/// A DagNode definition.
///
/// The full member list and erasure parameters are stored as JSON, the
/// way the server received them from the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "dag_node")]
pub struct Model {
    /// Name of the DagNode.
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    /// The node configuration.
    pub config: Json<DagNodeConfig>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! The RPC surface.
//!
//! Transport-agnostic request and reply types for the three services
//! of §6: DagPool (block and user operations), DagPoolCluster (admin),
//! and the DataNode surface (which lives in `dagpool-datanode`). The
//! framing codec and the listener are the front end's concern; it
//! decodes a request, calls the matching [`DagPoolService`] method,
//! and encodes the reply.
//!
//! [`DagPoolService`]: crate::pool::DagPoolService

use serde::{Deserialize, Serialize};

use dagpool::slot::SlotRange;

use crate::pool::StatusReport;

/// Credentials attached to every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

// DagPool service

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub block: Vec<u8>,
    pub user: Credentials,
    pub pin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReply {
    pub cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub cid: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSizeRequest {
    pub cid: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSizeReply {
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub cid: String,
    pub user: Credentials,
    pub unpin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveReply {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserRequest {
    pub username: String,
    pub password: String,
    pub policy: String,
    pub capacity: u64,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveUserRequest {
    pub username: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryUserRequest {
    pub username: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryUserReply {
    pub username: String,
    pub policy: String,
    pub capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub username: String,
    pub new_password: Option<String>,
    pub new_policy: Option<String>,
    pub new_capacity: Option<u64>,
    pub user: Credentials,
}

// DagPoolCluster service

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDagNodeRequest {
    pub config: crate::node::DagNodeConfig,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDagNodeRequest {
    pub name: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDagNodeRequest {
    pub name: String,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateSlotsRequest {
    pub from: String,
    pub to: String,
    pub slots: Vec<SlotRange>,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSlotsRequest {
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub user: Credentials,
}

pub type StatusReply = StatusReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairDataNodeRequest {
    pub dag_node_name: String,
    pub from_index: usize,
    pub repair_index: usize,
    pub user: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairDataNodeReply {
    pub repaired_keys: u64,
}

/// The error shape every reply can carry instead of a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable machine-readable name (e.g. `NotFound`).
    pub error: String,

    /// Human-readable message.
    pub message: String,
}

impl From<&crate::error::ServerError> for ErrorReply {
    fn from(error: &crate::error::ServerError) -> Self {
        Self {
            error: error.name().to_string(),
            message: error.to_string(),
        }
    }
}

//! The DagPool service.
//!
//! The public operation surface of the cluster: block operations
//! routed by slot, user administration, and cluster administration.
//! Every operation authenticates before touching any state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, PaginatorTrait};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use dagpool::block::{Block, Cid, ShardKey};
use dagpool::slot::{slot_of, SlotRange};

use crate::access::{AccessControl, Operation, Policy};
use crate::config::Config;
use crate::database::entity::dag_node::{self, Entity as DagNodeEntity};
use crate::database::entity::slot_key::{self, Entity as SlotKey};
use crate::database::entity::user::UserModel;
use crate::database::entity::Json;
use crate::database::{self, entity::migration_journal::Entity as MigrationJournal};
use crate::error::{ServerError, ServerResult};
use crate::gc::GcControl;
use crate::node::{DagNode, DagNodeConfig};
use crate::reference::{CacheSet, RefCounter};
use crate::slots::SlotTable;

/// The overall cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// All DagNodes healthy, no migrations in flight.
    Ok,

    /// At least one slot is being migrated.
    Migrating,

    /// At least one DagNode is below read quorum.
    Fail,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Migrating => write!(f, "migrating"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// The `Status` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ClusterState,
    pub nodes: Vec<NodeStatus>,
}

/// Slot ownership of one DagNode, coalesced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node: String,
    pub slots: Vec<SlotRange>,
}

/// The DagPool service.
pub struct DagPoolService {
    config: Config,
    db: DatabaseConnection,
    access: AccessControl,
    ref_counter: RefCounter,
    cache_set: CacheSet,
    slots: SlotTable,
    dag_nodes: RwLock<HashMap<String, Arc<DagNode>>>,
    gc: GcControl,
    migration_notify: Notify,
}

impl DagPoolService {
    /// Opens the service: connects the database, runs migrations,
    /// seeds the root user, and registers the configured DagNodes.
    pub async fn new(config: Config) -> ServerResult<Arc<Self>> {
        let db = database::connect(&config.database_url()).await?;
        database::run_migrations(&db).await?;

        let access = AccessControl::new(
            db.clone(),
            config.root_user.clone(),
            config.root_password.clone(),
        )
        .await?;

        let ref_counter = RefCounter::new(db.clone());
        let cache_set = CacheSet::new(db.clone());
        let slots = SlotTable::load(db.clone()).await?;

        let service = Arc::new(Self {
            config,
            db,
            access,
            ref_counter,
            cache_set,
            slots,
            dag_nodes: RwLock::new(HashMap::new()),
            gc: GcControl::new(),
            migration_notify: Notify::new(),
        });

        // Nodes registered in the database come back first.
        let registered = DagNodeEntity::find().all(&service.db).await?;
        for row in registered {
            let node_config = row.config.0;
            let node = DagNode::open(&node_config, &service.config.data_dir)?;
            service
                .dag_nodes
                .write()
                .unwrap()
                .insert(node_config.name.clone(), node);
        }

        // New nodes from the configuration file are registered now.
        let configured = service.config.dag_nodes.clone();
        for node_config in configured {
            if service.dag_node(&node_config.name).is_err() {
                service.register_dag_node(node_config).await?;
            }
        }

        if service.slots.is_empty() {
            tracing::warn!("the keyspace is unassigned; add a DagNode to initialize the cluster");
        }

        Ok(service)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub(crate) fn ref_counter(&self) -> &RefCounter {
        &self.ref_counter
    }

    pub(crate) fn cache_set(&self) -> &CacheSet {
        &self.cache_set
    }

    pub(crate) fn gc_control(&self) -> &GcControl {
        &self.gc
    }

    pub(crate) fn migration_notify(&self) -> &Notify {
        &self.migration_notify
    }

    /// Installs an already-built DagNode, bypassing persistence.
    ///
    /// Lets tests wire in mock-backed nodes.
    #[cfg(test)]
    pub(crate) async fn install_dag_node(&self, node: Arc<DagNode>) -> ServerResult<()> {
        let name = node.name().to_string();
        self.dag_nodes.write().unwrap().insert(name.clone(), node);

        if self.slots.is_empty() {
            self.slots.assign_all(&name).await?;
        }
        Ok(())
    }

    /// Names of all registered DagNodes.
    pub(crate) fn registered_dag_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dag_nodes.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks up a registered DagNode.
    pub(crate) fn dag_node(&self, name: &str) -> ServerResult<Arc<DagNode>> {
        self.dag_nodes
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::NoSuchDagNode {
                name: name.to_string(),
            })
    }

    // Block operations

    /// Stores a block.
    ///
    /// Pinned adds go through the reference counter, which invokes the
    /// actual fan-out exactly once per lifetime of the pin set.
    /// Unpinned adds land in the cache set and stay eligible for
    /// collection.
    pub async fn add(
        &self,
        block: Block,
        user: &str,
        password: &str,
        pin: bool,
    ) -> ServerResult<Cid> {
        self.access.check(user, password, Operation::Write).await?;

        let cid = block.cid().clone();
        let key = cid.to_string();

        if pin {
            // A racing collection cycle must not sweep the block
            // between our check and the pin landing.
            self.gc.interrupt();

            self.ref_counter
                .incr_or_create(&key, || async { self.put_block(&block).await })
                .await?;
        } else {
            // The per-key lock serializes against the collector's
            // check-and-delete on the same key.
            let _guard = self.ref_counter.lock_key(&key).await;

            if !self.has_block(&key).await? {
                self.put_block(&block).await?;
            }
            self.cache_set.add(&key).await?;
        }

        Ok(cid)
    }

    /// Retrieves a block.
    pub async fn get(&self, cid: &Cid, user: &str, password: &str) -> ServerResult<Block> {
        self.access.check(user, password, Operation::Read).await?;

        if !self.has_block(&cid.to_string()).await? {
            return Err(ServerError::NoSuchBlock);
        }

        self.read_block(cid).await
    }

    /// Returns the size of a block's payload.
    pub async fn get_size(&self, cid: &Cid, user: &str, password: &str) -> ServerResult<u32> {
        self.access.check(user, password, Operation::Read).await?;

        if !self.has_block(&cid.to_string()).await? {
            return Err(ServerError::NoSuchBlock);
        }

        let (owner, fallback) = self.route(cid)?;
        match owner.get_size(cid).await {
            Err(e) if e.is_not_found() => match fallback {
                Some(node) => node.get_size(cid).await,
                None => Err(e),
            },
            result => result,
        }
    }

    /// True iff the block is pinned or cached.
    pub async fn has(&self, cid: &Cid, user: &str, password: &str) -> ServerResult<bool> {
        self.access.check(user, password, Operation::Read).await?;
        self.has_block(&cid.to_string()).await
    }

    /// Removes a reference to a block.
    ///
    /// With `unpin`, the reference count is decremented; the actual
    /// deletion of unreferenced blocks is the collector's job. Without
    /// it, the call is a no-op.
    pub async fn remove(
        &self,
        cid: &Cid,
        user: &str,
        password: &str,
        unpin: bool,
    ) -> ServerResult<()> {
        self.access.check(user, password, Operation::Write).await?;

        if unpin {
            self.ref_counter.decr(&cid.to_string()).await?;
        }

        Ok(())
    }

    pub(crate) async fn has_block(&self, key: &str) -> ServerResult<bool> {
        if self.ref_counter.has(key).await? {
            return Ok(true);
        }
        self.cache_set.has(key).await
    }

    /// Routes a CID to `(owner, importing_from)` DagNodes.
    pub(crate) fn route(&self, cid: &Cid) -> ServerResult<(Arc<DagNode>, Option<Arc<DagNode>>)> {
        let slot = slot_for_cid(cid);
        let entry = self.slots.entry(slot)?;

        let owner = self.dag_node(&entry.owner)?;
        let fallback = match &entry.importing_from {
            Some(name) => Some(self.dag_node(name)?),
            None => None,
        };
        Ok((owner, fallback))
    }

    /// Writes a block to the slot owner and indexes it.
    pub(crate) async fn put_block(&self, block: &Block) -> ServerResult<()> {
        let cid = block.cid();
        let slot = slot_for_cid(cid);
        let entry = self.slots.entry(slot)?;

        // During migration, writes go to the new owner only.
        let node = self.dag_node(&entry.owner)?;
        node.put(block).await?;

        self.index_key(&cid.to_string(), slot).await?;
        Ok(())
    }

    /// Reads a block from the slot owner, falling back to the old
    /// owner while the slot is migrating.
    pub(crate) async fn read_block(&self, cid: &Cid) -> ServerResult<Block> {
        let (owner, fallback) = self.route(cid)?;

        match owner.get(cid).await {
            Err(e) if e.is_not_found() => match fallback {
                Some(node) => node.get(cid).await,
                None => Err(e),
            },
            result => result,
        }
    }

    /// Deletes a block wherever the slot currently points, dropping
    /// the index entry.
    pub(crate) async fn delete_block(&self, key: &str) -> ServerResult<()> {
        let cid = Cid::parse(key)?;
        let slot = slot_for_cid(&cid);
        let entry = self.slots.entry(slot)?;

        let owner = self.dag_node(&entry.owner)?;
        owner.delete(&cid).await?;

        // While migrating, the old owner may still hold a copy.
        if let Some(from) = &entry.importing_from {
            if let Ok(node) = self.dag_node(from) {
                if let Err(e) = node.delete(&cid).await {
                    tracing::warn!(key, node = %from, "delete on old owner failed: {}", e);
                }
            }
        }

        self.unindex_key(key).await?;
        Ok(())
    }

    // The slot→key index

    pub(crate) async fn index_key(&self, key: &str, slot: u16) -> ServerResult<()> {
        let model = slot_key::ActiveModel {
            slot: Set(slot as i32),
            key: Set(key.to_string()),
            ..Default::default()
        };

        SlotKey::insert(model)
            .on_conflict(
                OnConflict::column(slot_key::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.db)
            .await?;

        Ok(())
    }

    pub(crate) async fn unindex_key(&self, key: &str) -> ServerResult<()> {
        SlotKey::delete_many()
            .filter(slot_key::Column::Key.eq(key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Every indexed key in one slot.
    pub(crate) async fn keys_in_slot(&self, slot: u16) -> ServerResult<Vec<String>> {
        Ok(SlotKey::find()
            .filter(slot_key::Column::Slot.eq(slot as i32))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.key)
            .collect())
    }

    /// Every indexed key in the cluster.
    pub(crate) async fn all_indexed_keys(&self) -> ServerResult<Vec<String>> {
        Ok(SlotKey::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.key)
            .collect())
    }

    // User administration

    pub async fn add_user(
        &self,
        username: String,
        password: String,
        policy: Policy,
        capacity: i64,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<()> {
        self.access.check_admin(admin_user, admin_password).await?;
        self.access
            .add_user(username, password, policy, capacity)
            .await
    }

    pub async fn remove_user(
        &self,
        username: &str,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<()> {
        self.access.check_admin(admin_user, admin_password).await?;
        self.access.remove_user(username).await
    }

    /// Queries a user record.
    ///
    /// Only the admin may look at other users; everyone else can only
    /// query themselves.
    pub async fn query_user(
        &self,
        username: &str,
        user: &str,
        password: &str,
    ) -> ServerResult<UserModel> {
        self.access.authenticate(user, password).await?;

        if !self.access.is_admin(user) && username != user {
            return Err(ServerError::AccessDenied);
        }

        self.access.query_user(username).await
    }

    pub async fn update_user(
        &self,
        username: &str,
        new_password: Option<String>,
        new_policy: Option<Policy>,
        new_capacity: Option<i64>,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<()> {
        self.access.check_admin(admin_user, admin_password).await?;
        self.access
            .update_user(username, new_password, new_policy, new_capacity)
            .await
    }

    // Cluster administration

    /// Registers a DagNode.
    ///
    /// The first node registered on an uninitialized cluster receives
    /// the entire keyspace.
    pub async fn add_dag_node(
        &self,
        node_config: DagNodeConfig,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<()> {
        self.access.check_admin(admin_user, admin_password).await?;
        self.register_dag_node(node_config).await
    }

    async fn register_dag_node(&self, node_config: DagNodeConfig) -> ServerResult<()> {
        let name = node_config.name.clone();
        if self.dag_node(&name).is_ok() {
            return Err(ServerError::DagNodeAlreadyExists { name });
        }

        let node = DagNode::open(&node_config, &self.config.data_dir)?;

        let model = dag_node::ActiveModel {
            name: Set(name.clone()),
            config: Set(Json(node_config)),
        };
        DagNodeEntity::insert(model)
            .on_conflict(
                OnConflict::column(dag_node::Column::Name)
                    .update_columns([dag_node::Column::Config])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        self.dag_nodes.write().unwrap().insert(name.clone(), node);

        if self.slots.is_empty() {
            self.slots.assign_all(&name).await?;
            tracing::info!(node = %name, "keyspace assigned to the first DagNode");
        }

        Ok(())
    }

    /// Returns the stored definition of a DagNode.
    pub async fn get_dag_node(
        &self,
        name: &str,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<DagNodeConfig> {
        self.access.check_admin(admin_user, admin_password).await?;

        DagNodeEntity::find_by_id(name)
            .one(&self.db)
            .await?
            .map(|row| row.config.0)
            .ok_or_else(|| ServerError::NoSuchDagNode {
                name: name.to_string(),
            })
    }

    /// Unregisters a DagNode.
    ///
    /// Refused while the node still owns slots: migrate them away
    /// first.
    pub async fn remove_dag_node(
        &self,
        name: &str,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<()> {
        self.access.check_admin(admin_user, admin_password).await?;

        self.dag_node(name)?;

        let owned = self.slots.owned_slots(name);
        if !owned.is_empty() {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {} still owns {} slots", name, owned.len()),
            });
        }
        // Nor may it be the source of an unfinished migration.
        if self
            .slots
            .snapshot()
            .iter()
            .any(|e| e.importing_from.as_deref() == Some(name))
        {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {} is still exporting slots", name),
            });
        }

        DagNodeEntity::delete_by_id(name).exec(&self.db).await?;
        self.dag_nodes.write().unwrap().remove(name);

        Ok(())
    }

    /// Starts migrating slot ranges between two DagNodes.
    pub async fn migrate_slots(
        &self,
        from: &str,
        to: &str,
        ranges: &[SlotRange],
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<usize> {
        self.access.check_admin(admin_user, admin_password).await?;
        crate::migrate::begin_migration(self, from, to, ranges).await
    }

    /// Plans and starts the minimal set of moves that evens out slot
    /// ownership. Returns the number of slots scheduled.
    pub async fn balance_slots(
        &self,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<usize> {
        self.access.check_admin(admin_user, admin_password).await?;
        crate::migrate::balance_slots(self).await
    }

    /// Rebuilds one member of a DagNode from its peers.
    pub async fn repair_data_node(
        &self,
        name: &str,
        from_index: usize,
        repair_index: usize,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<u64> {
        self.access.check_admin(admin_user, admin_password).await?;

        let node = self.dag_node(name)?;
        node.repair(from_index, repair_index).await
    }

    /// Computes the cluster state.
    pub async fn cluster_state(&self) -> ServerResult<ClusterState> {
        let nodes: Vec<Arc<DagNode>> =
            self.dag_nodes.read().unwrap().values().cloned().collect();
        for node in nodes {
            if !node.healthy().await {
                return Ok(ClusterState::Fail);
            }
        }

        let migrating = MigrationJournal::find().count(&self.db).await? > 0;
        if migrating || self.slots.any_migrating() {
            return Ok(ClusterState::Migrating);
        }

        Ok(ClusterState::Ok)
    }

    /// The `Status` admin report.
    pub async fn status(
        &self,
        admin_user: &str,
        admin_password: &str,
    ) -> ServerResult<StatusReport> {
        self.access.check_admin(admin_user, admin_password).await?;

        let state = self.cluster_state().await?;
        let nodes = self
            .slots
            .ranges_by_owner()
            .into_iter()
            .map(|(node, slots)| NodeStatus { node, slots })
            .collect();

        Ok(StatusReport { state, nodes })
    }
}

impl std::fmt::Debug for DagPoolService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagPoolService")
            .field("dag_nodes", &self.dag_nodes.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

/// The slot a CID routes to: CRC-16 of its shard key.
pub(crate) fn slot_for_cid(cid: &Cid) -> u16 {
    slot_of(ShardKey::of(cid))
}

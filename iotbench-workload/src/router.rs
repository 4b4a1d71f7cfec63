//! Assignment of inserted records to driver instances.

use iotbench_storage::ClientId;

use crate::config::ClusterConfig;
use crate::error::ConfigError;

/// Share of the per-worker capacity every instance inserts before overflow routing kicks in.
pub const OVERFLOW_DIVISOR: u64 = 16;

/// Decides whether this instance inserts a given record.
///
/// All instances insert until the record counter reaches a sixteenth of the per-worker capacity.
/// Past that threshold only the designated overflow instances continue, everybody else treats
/// the insert as a successful no-op. The decision is a pure function of the topology and the
/// record number.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardRouter {
    rank: u32,
    overflow: bool,
    capacity: u64,
    threshold: u64,
}

impl ShardRouter {
    /// Creates the router for `client` within the given topology.
    pub fn new(cluster: &ClusterConfig, client: &ClientId) -> Result<Self, ConfigError> {
        if cluster.nodes == 0 || cluster.instances_per_node == 0 {
            return Err(ConfigError::Topology(
                "nodes and instances_per_node must be positive".to_owned(),
            ));
        }
        if !(1..=cluster.nodes).contains(&client.node()) {
            return Err(ConfigError::Topology(format!(
                "client {client} runs on node {} but the cluster has {} nodes",
                client.node(),
                cluster.nodes
            )));
        }

        let rank = (client.node() - 1) * cluster.instances_per_node + client.instance();
        let workers = u64::from(cluster.nodes) * u64::from(cluster.instances_per_node);
        let capacity = cluster.total_insert_budget / workers;

        Ok(Self {
            rank,
            overflow: cluster.overflow_instances.contains(&rank),
            capacity,
            threshold: capacity / OVERFLOW_DIVISOR,
        })
    }

    /// The global rank of this instance.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Whether this instance keeps inserting past the threshold.
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Number of records each instance is budgeted for.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Record number from which on only overflow instances insert.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether this instance inserts the record with the given number.
    pub fn admits(&self, record: u64) -> bool {
        self.overflow || record < self.threshold
    }
}

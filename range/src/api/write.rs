//! Write operations. Every operation checks its preconditions against the
//! current snapshot, then applies the mutation in a single transaction
//! spanning the graphs it touches. When `use_stored` is configured, the
//! serialized request goes to the forwarding daemon instead and the ack
//! decides the outcome.

use log::info;

use crate::api::read::{get_node_fuzzy, prefixed_node_name};
use crate::api::RangeApi;
use crate::error::{CResult, Error};
use crate::graph::{DEPENDENCY, PRIMARY};
use crate::mq::{Ack, Request, RequestQueueListener};
use crate::record::NodeType;
use crate::store::engine::Engine;
use crate::store::txn::WriteTxn;

/// Argument arity of every forwardable write operation, by wire name.
pub const NUM_ARGUMENTS: &[(&str, usize)] = &[
    ("create_env", 1),
    ("remove_env", 1),
    ("add_cluster_to_env", 2),
    ("remove_cluster_from_env", 2),
    ("add_cluster_to_cluster", 3),
    ("remove_cluster_from_cluster", 3),
    ("remove_cluster", 2),
    ("add_host_to_cluster", 3),
    ("remove_host_from_cluster", 3),
    ("add_host", 1),
    ("remove_host", 2),
    ("add_node_key_value", 4),
    ("remove_node_key_value", 4),
    ("remove_key_from_node", 3),
    ("add_node_ext_dependency", 4),
    ("remove_node_ext_dependency", 4),
];

fn incorrect_type(name: &str, actual: NodeType, expected: NodeType) -> Error {
    Error::IncorrectNodeType(format!("{} has type {}, should be {}", name, actual, expected))
}

/// Ensures a node exists in a graph with the given type, creating it when
/// missing. Used to mirror membership nodes into the dependency graph.
fn ensure_node<E: Engine>(
    txn: &mut WriteTxn<'_, E>,
    graph: &str,
    name: &str,
    node_type: NodeType,
) -> CResult<()> {
    if txn.get_node(graph, name)?.is_none() {
        let mut node = txn.create(graph, name)?;
        node.set_type(txn, node_type)?;
    }
    Ok(())
}

impl<E: Engine> RangeApi<E> {
    fn forward(&self, method: &str, args: &[String]) -> CResult<Option<bool>> {
        let Some(client) = self.stored_client() else {
            return Ok(None);
        };
        let ack = client.request(method, args, std::process::id() as u64)?;
        ack.into_result().map(Some)
    }

    /// Creates an environment in both graphs.
    pub fn create_env(&self, env_name: &str) -> CResult<bool> {
        info!("create_env {}", env_name);
        if let Some(result) = self.forward("create_env", &[env_name.to_string()])? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        for graph in [PRIMARY, DEPENDENCY] {
            txn.enroll(graph)?;
            let mut node = txn.create(graph, env_name)?;
            node.set_type(&mut txn, NodeType::Environment)?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Removes an environment from both graphs.
    pub fn remove_env(&self, env_name: &str) -> CResult<bool> {
        info!("remove_env {}", env_name);
        if let Some(result) = self.forward("remove_env", &[env_name.to_string()])? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        for graph in [PRIMARY, DEPENDENCY] {
            txn.enroll(graph)?;
            let node = txn
                .get_node(graph, env_name)?
                .ok_or_else(|| Error::NodeNotFound(env_name.to_string()))?;
            if node.node_type() != NodeType::Environment {
                return Err(incorrect_type(env_name, node.node_type(), NodeType::Environment));
            }
            txn.remove(graph, &node)?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Adds a cluster to an environment, creating the cluster when missing.
    pub fn add_cluster_to_env(&self, env_name: &str, cluster_name: &str) -> CResult<bool> {
        info!("add_cluster_to_env {} {}", env_name, cluster_name);
        if let Some(result) = self
            .forward("add_cluster_to_env", &[env_name.to_string(), cluster_name.to_string()])?
        {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;
        txn.enroll(DEPENDENCY)?;

        let mut env = txn
            .get_node(PRIMARY, env_name)?
            .ok_or_else(|| Error::InvalidEnvironment(env_name.to_string()))?;
        if env.node_type() != NodeType::Environment {
            return Err(incorrect_type(env_name, env.node_type(), NodeType::Environment));
        }

        let name = prefixed_node_name(env_name, cluster_name);
        let mut cluster = match txn.get_node(PRIMARY, &name)? {
            Some(node) if node.node_type() != NodeType::Cluster => {
                return Err(incorrect_type(&name, node.node_type(), NodeType::Cluster));
            }
            Some(node) => node,
            None => {
                let mut node = txn.create(PRIMARY, &name)?;
                node.set_type(&mut txn, NodeType::Cluster)?;
                node
            }
        };

        if !env.add_forward_edge(&mut txn, &mut cluster, true)? {
            return Err(Error::NodeExists(cluster_name.to_string()));
        }
        ensure_node(&mut txn, DEPENDENCY, &name, NodeType::Cluster)?;
        txn.commit()?;
        Ok(true)
    }

    /// Detaches a cluster from its environment. The cluster (and anything
    /// under it) becomes an orphan rather than being deleted.
    pub fn remove_cluster_from_env(&self, env_name: &str, cluster_name: &str) -> CResult<bool> {
        info!("remove_cluster_from_env {} {}", env_name, cluster_name);
        if let Some(result) = self.forward(
            "remove_cluster_from_env",
            &[env_name.to_string(), cluster_name.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let mut env = txn
            .get_node(PRIMARY, env_name)?
            .ok_or_else(|| Error::InvalidEnvironment(env_name.to_string()))?;
        let name = prefixed_node_name(env_name, cluster_name);
        let mut cluster =
            txn.get_node(PRIMARY, &name)?.ok_or_else(|| Error::NodeNotFound(name.clone()))?;

        if env.node_type() != NodeType::Environment {
            return Err(incorrect_type(env_name, env.node_type(), NodeType::Environment));
        }
        if cluster.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&name, cluster.node_type(), NodeType::Cluster));
        }

        if !env.remove_forward_edge(&mut txn, &mut cluster, true)? {
            return Err(Error::EdgeNotFound(name));
        }
        txn.commit()?;
        Ok(true)
    }

    /// Nests a cluster under another, creating the child when missing.
    pub fn add_cluster_to_cluster(
        &self,
        env_name: &str,
        parent_cluster: &str,
        child_cluster: &str,
    ) -> CResult<bool> {
        info!("add_cluster_to_cluster {} {} {}", env_name, parent_cluster, child_cluster);
        if let Some(result) = self.forward(
            "add_cluster_to_cluster",
            &[env_name.to_string(), parent_cluster.to_string(), child_cluster.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;
        txn.enroll(DEPENDENCY)?;

        let parent_name = prefixed_node_name(env_name, parent_cluster);
        let mut parent = txn
            .get_node(PRIMARY, &parent_name)?
            .ok_or_else(|| Error::NodeNotFound(parent_name.clone()))?;
        if parent.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&parent_name, parent.node_type(), NodeType::Cluster));
        }

        let child_name = prefixed_node_name(env_name, child_cluster);
        let mut child = match txn.get_node(PRIMARY, &child_name)? {
            Some(node) if node.node_type() != NodeType::Cluster => {
                return Err(incorrect_type(&child_name, node.node_type(), NodeType::Cluster));
            }
            Some(node) => node,
            None => {
                let mut node = txn.create(PRIMARY, &child_name)?;
                node.set_type(&mut txn, NodeType::Cluster)?;
                node
            }
        };

        if !parent.add_forward_edge(&mut txn, &mut child, true)? {
            return Err(Error::NodeExists(child_cluster.to_string()));
        }
        ensure_node(&mut txn, DEPENDENCY, &child_name, NodeType::Cluster)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn remove_cluster_from_cluster(
        &self,
        env_name: &str,
        parent_cluster: &str,
        child_cluster: &str,
    ) -> CResult<bool> {
        info!("remove_cluster_from_cluster {} {} {}", env_name, parent_cluster, child_cluster);
        if let Some(result) = self.forward(
            "remove_cluster_from_cluster",
            &[env_name.to_string(), parent_cluster.to_string(), child_cluster.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let parent_name = prefixed_node_name(env_name, parent_cluster);
        let child_name = prefixed_node_name(env_name, child_cluster);
        let mut parent = txn
            .get_node(PRIMARY, &parent_name)?
            .ok_or_else(|| Error::NodeNotFound(parent_name.clone()))?;
        let mut child = txn
            .get_node(PRIMARY, &child_name)?
            .ok_or_else(|| Error::NodeNotFound(child_name.clone()))?;

        if parent.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&parent_name, parent.node_type(), NodeType::Cluster));
        }
        if child.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&child_name, child.node_type(), NodeType::Cluster));
        }

        if !parent.remove_forward_edge(&mut txn, &mut child, true)? {
            return Err(Error::EdgeNotFound(child_name));
        }
        txn.commit()?;
        Ok(true)
    }

    /// Removes a cluster from both graphs entirely.
    pub fn remove_cluster(&self, env_name: &str, cluster_name: &str) -> CResult<bool> {
        info!("remove_cluster {} {}", env_name, cluster_name);
        if let Some(result) =
            self.forward("remove_cluster", &[env_name.to_string(), cluster_name.to_string()])?
        {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;
        txn.enroll(DEPENDENCY)?;

        let name = prefixed_node_name(env_name, cluster_name);
        let node =
            txn.get_node(PRIMARY, &name)?.ok_or_else(|| Error::NodeNotFound(name.clone()))?;
        if node.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&name, node.node_type(), NodeType::Cluster));
        }

        txn.remove(PRIMARY, &node)?;
        if let Some(dep) = txn.get_node(DEPENDENCY, &name)? {
            txn.remove(DEPENDENCY, &dep)?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Adds a host to a cluster, creating the host when missing. A
    /// pre-existing host must not belong to clusters of another environment.
    pub fn add_host_to_cluster(
        &self,
        env_name: &str,
        parent_cluster: &str,
        hostname: &str,
    ) -> CResult<bool> {
        info!("add_host_to_cluster {} {} {}", env_name, parent_cluster, hostname);
        if let Some(result) = self.forward(
            "add_host_to_cluster",
            &[env_name.to_string(), parent_cluster.to_string(), hostname.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;
        txn.enroll(DEPENDENCY)?;

        let parent_name = prefixed_node_name(env_name, parent_cluster);
        let mut parent = txn
            .get_node(PRIMARY, &parent_name)?
            .ok_or_else(|| Error::NodeNotFound(parent_name.clone()))?;
        if parent.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&parent_name, parent.node_type(), NodeType::Cluster));
        }

        let mut host = match txn.get_node(PRIMARY, hostname)? {
            Some(node) if node.node_type() != NodeType::Host => {
                return Err(incorrect_type(hostname, node.node_type(), NodeType::Host));
            }
            Some(node) => {
                // Adding a host to an orphaned cluster is fine; it just makes
                // the host an orphan too. What must never happen is a host
                // with parent clusters in two different environments.
                let prefix = format!("{}#", env_name);
                for parent_name in node.reverse_edges() {
                    if let Some(existing) = txn.get_node(PRIMARY, &parent_name)? {
                        if existing.node_type() == NodeType::Cluster
                            && !parent_name.starts_with(&prefix)
                        {
                            return Err(Error::InvalidEnvironment(format!(
                                "{} exists in another environment",
                                hostname
                            )));
                        }
                    }
                }
                node
            }
            None => {
                let mut node = txn.create(PRIMARY, hostname)?;
                node.set_type(&mut txn, NodeType::Host)?;
                node
            }
        };

        if !parent.add_forward_edge(&mut txn, &mut host, true)? {
            return Err(Error::NodeExists(hostname.to_string()));
        }
        ensure_node(&mut txn, DEPENDENCY, hostname, NodeType::Host)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn remove_host_from_cluster(
        &self,
        env_name: &str,
        parent_cluster: &str,
        hostname: &str,
    ) -> CResult<bool> {
        info!("remove_host_from_cluster {} {} {}", env_name, parent_cluster, hostname);
        if let Some(result) = self.forward(
            "remove_host_from_cluster",
            &[env_name.to_string(), parent_cluster.to_string(), hostname.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let parent_name = prefixed_node_name(env_name, parent_cluster);
        let mut parent = txn
            .get_node(PRIMARY, &parent_name)?
            .ok_or_else(|| Error::NodeNotFound(parent_name.clone()))?;
        let mut host = txn
            .get_node(PRIMARY, hostname)?
            .ok_or_else(|| Error::NodeNotFound(hostname.to_string()))?;

        if parent.node_type() != NodeType::Cluster {
            return Err(incorrect_type(&parent_name, parent.node_type(), NodeType::Cluster));
        }
        if host.node_type() != NodeType::Host {
            return Err(incorrect_type(hostname, host.node_type(), NodeType::Host));
        }

        if !host.remove_reverse_edge(&mut txn, &mut parent, true)? {
            return Err(Error::EdgeNotFound(hostname.to_string()));
        }
        txn.commit()?;
        Ok(true)
    }

    /// Creates a host with no cluster membership in both graphs.
    pub fn add_host(&self, hostname: &str) -> CResult<bool> {
        info!("add_host {}", hostname);
        if let Some(result) = self.forward("add_host", &[hostname.to_string()])? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        for graph in [PRIMARY, DEPENDENCY] {
            txn.enroll(graph)?;
            if let Some(node) = txn.get_node(graph, hostname)? {
                return Err(Error::NodeExists(node.name().to_string()));
            }
            let mut node = txn.create(graph, hostname)?;
            node.set_type(&mut txn, NodeType::Host)?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Removes a host entirely. The host must belong to the named
    /// environment (or to none).
    pub fn remove_host(&self, env_name: &str, hostname: &str) -> CResult<bool> {
        info!("remove_host {} {}", env_name, hostname);
        if let Some(result) =
            self.forward("remove_host", &[env_name.to_string(), hostname.to_string()])?
        {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;
        txn.enroll(DEPENDENCY)?;

        let host = txn
            .get_node(PRIMARY, hostname)?
            .ok_or_else(|| Error::NodeNotFound(hostname.to_string()))?;

        // Walk up to the owning environment; a different environment on the
        // way up means the caller is deleting someone else's host.
        let mut stack = host.reverse_edges();
        let mut visited = std::collections::HashSet::new();
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(node) = txn.get_node(PRIMARY, &name)? else { continue };
            if node.node_type() == NodeType::Environment {
                if node.name() == env_name {
                    break;
                }
                return Err(Error::InvalidEnvironment(env_name.to_string()));
            }
            stack.extend(node.reverse_edges());
        }

        txn.remove(PRIMARY, &host)?;
        if let Some(dep) = txn.get_node(DEPENDENCY, hostname)? {
            txn.remove(DEPENDENCY, &dep)?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// Appends a value to a node's tag key.
    pub fn add_node_key_value(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
        value: &str,
    ) -> CResult<bool> {
        info!("add_node_key_value {} {} {}={}", env_name, node_name, key, value);
        if let Some(result) = self.forward(
            "add_node_key_value",
            &[
                env_name.to_string(),
                node_name.to_string(),
                key.to_string(),
                value.to_string(),
            ],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let mut node = get_node_fuzzy(&txn, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;

        let mut values = node.tags().remove(key).unwrap_or_default();
        if values.iter().any(|v| v == value) {
            return Err(Error::NodeExists(format!(
                "value {} already exists for key {}",
                value, key
            )));
        }
        values.push(value.to_string());
        node.update_tag(&mut txn, key, &values)?;
        txn.commit()?;
        Ok(true)
    }

    /// Removes one value from a node's tag key.
    pub fn remove_node_key_value(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
        value: &str,
    ) -> CResult<bool> {
        info!("remove_node_key_value {} {} {}={}", env_name, node_name, key, value);
        if let Some(result) = self.forward(
            "remove_node_key_value",
            &[
                env_name.to_string(),
                node_name.to_string(),
                key.to_string(),
                value.to_string(),
            ],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let mut node = get_node_fuzzy(&txn, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;

        let values = node.tags().remove(key).unwrap_or_default();
        let new_values: Vec<String> =
            values.iter().filter(|v| *v != value).cloned().collect();
        if new_values.len() == values.len() {
            return Err(Error::KeyNotFound(format!("{}={} nothing to remove", key, value)));
        }
        node.update_tag(&mut txn, key, &new_values)?;
        txn.commit()?;
        Ok(true)
    }

    /// Deletes a whole tag key from a node.
    pub fn remove_key_from_node(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
    ) -> CResult<bool> {
        info!("remove_key_from_node {} {} {}", env_name, node_name, key);
        if let Some(result) = self.forward(
            "remove_key_from_node",
            &[env_name.to_string(), node_name.to_string(), key.to_string()],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(PRIMARY)?;

        let mut node = get_node_fuzzy(&txn, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
        if !node.delete_tag(&mut txn, key)? {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        txn.commit()?;
        Ok(true)
    }

    /// Declares a dependency on a node in another environment.
    pub fn add_node_ext_dependency(
        &self,
        env_name: &str,
        node_name: &str,
        dependency_env: &str,
        dependency_name: &str,
    ) -> CResult<bool> {
        info!(
            "add_node_ext_dependency {}#{} -> {}#{}",
            env_name, node_name, dependency_env, dependency_name
        );
        if let Some(result) = self.forward(
            "add_node_ext_dependency",
            &[
                env_name.to_string(),
                node_name.to_string(),
                dependency_env.to_string(),
                dependency_name.to_string(),
            ],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(DEPENDENCY)?;

        let name = prefixed_node_name(env_name, node_name);
        let dep_name = prefixed_node_name(dependency_env, dependency_name);
        let mut node = txn
            .get_node(DEPENDENCY, &name)?
            .ok_or_else(|| Error::NodeNotFound(name.clone()))?;
        let mut dep = txn
            .get_node(DEPENDENCY, &dep_name)?
            .ok_or_else(|| Error::NodeNotFound(dep_name.clone()))?;

        // Environments cannot have dependencies themselves.
        if matches!(node.node_type(), NodeType::Environment | NodeType::Unknown) {
            return Err(Error::IncorrectNodeType(format!(
                "{} has type {}, but should not be ENVIRONMENT or UNKNOWN",
                name,
                node.node_type()
            )));
        }

        if !node.add_forward_edge(&mut txn, &mut dep, true)? {
            return Err(Error::NodeExists("dependency already exists".to_string()));
        }
        txn.commit()?;
        Ok(true)
    }

    /// Declares a dependency within the same environment.
    pub fn add_node_env_dependency(
        &self,
        env_name: &str,
        node_name: &str,
        dependency_name: &str,
    ) -> CResult<bool> {
        self.add_node_ext_dependency(env_name, node_name, env_name, dependency_name)
    }

    pub fn remove_node_ext_dependency(
        &self,
        env_name: &str,
        node_name: &str,
        dependency_env: &str,
        dependency_name: &str,
    ) -> CResult<bool> {
        info!(
            "remove_node_ext_dependency {}#{} -> {}#{}",
            env_name, node_name, dependency_env, dependency_name
        );
        if let Some(result) = self.forward(
            "remove_node_ext_dependency",
            &[
                env_name.to_string(),
                node_name.to_string(),
                dependency_env.to_string(),
                dependency_name.to_string(),
            ],
        )? {
            return Ok(result);
        }
        let mut txn = self.backend().begin()?;
        txn.enroll(DEPENDENCY)?;

        let name = prefixed_node_name(env_name, node_name);
        let dep_name = prefixed_node_name(dependency_env, dependency_name);
        let mut node = txn
            .get_node(DEPENDENCY, &name)?
            .ok_or_else(|| Error::NodeNotFound(name.clone()))?;
        let mut dep = txn
            .get_node(DEPENDENCY, &dep_name)?
            .ok_or_else(|| Error::NodeNotFound(dep_name.clone()))?;

        if !node.remove_forward_edge(&mut txn, &mut dep, true)? {
            return Err(Error::EdgeNotFound(dependency_name.to_string()));
        }
        txn.commit()?;
        Ok(true)
    }

    pub fn remove_node_env_dependency(
        &self,
        env_name: &str,
        node_name: &str,
        dependency_name: &str,
    ) -> CResult<bool> {
        self.remove_node_ext_dependency(env_name, node_name, env_name, dependency_name)
    }

    /// Applies a forwarded request by wire name, checking the argument
    /// arity. This is what the daemon runs for each received request.
    pub fn apply(&self, request: &Request) -> CResult<bool> {
        let arity = NUM_ARGUMENTS
            .iter()
            .find(|(name, _)| *name == request.method)
            .map(|(_, n)| *n)
            .ok_or_else(|| {
                Error::IncorrectNumberOfArguments(format!("unknown method {}", request.method))
            })?;
        if request.args.len() != arity {
            return Err(Error::IncorrectNumberOfArguments(format!(
                "{}: expected {}, got {}",
                request.method,
                arity,
                request.args.len()
            )));
        }

        let a = &request.args;
        match request.method.as_str() {
            "create_env" => self.create_env(&a[0]),
            "remove_env" => self.remove_env(&a[0]),
            "add_cluster_to_env" => self.add_cluster_to_env(&a[0], &a[1]),
            "remove_cluster_from_env" => self.remove_cluster_from_env(&a[0], &a[1]),
            "add_cluster_to_cluster" => self.add_cluster_to_cluster(&a[0], &a[1], &a[2]),
            "remove_cluster_from_cluster" => {
                self.remove_cluster_from_cluster(&a[0], &a[1], &a[2])
            }
            "remove_cluster" => self.remove_cluster(&a[0], &a[1]),
            "add_host_to_cluster" => self.add_host_to_cluster(&a[0], &a[1], &a[2]),
            "remove_host_from_cluster" => self.remove_host_from_cluster(&a[0], &a[1], &a[2]),
            "add_host" => self.add_host(&a[0]),
            "remove_host" => self.remove_host(&a[0], &a[1]),
            "add_node_key_value" => self.add_node_key_value(&a[0], &a[1], &a[2], &a[3]),
            "remove_node_key_value" => self.remove_node_key_value(&a[0], &a[1], &a[2], &a[3]),
            "remove_key_from_node" => self.remove_key_from_node(&a[0], &a[1], &a[2]),
            "add_node_ext_dependency" => {
                self.add_node_ext_dependency(&a[0], &a[1], &a[2], &a[3])
            }
            "remove_node_ext_dependency" => {
                self.remove_node_ext_dependency(&a[0], &a[1], &a[2], &a[3])
            }
            method => Err(Error::Internal(format!("unroutable method {}", method))),
        }
    }

    /// Serves one forwarded request: receive, apply, ack. Returns false when
    /// the receive timed out with nothing to do. This API must itself be
    /// configured for local writes, or requests would bounce forever.
    pub fn serve_one(&self, listener: &RequestQueueListener) -> CResult<bool> {
        let Some(request) = listener.receive()? else {
            return Ok(false);
        };
        let ack = match self.apply(&request) {
            Ok(_) => Ack::success(),
            Err(err) => Ack::failure(&err),
        };
        listener.send_ack(&request.client_id, &ack)?;
        Ok(true)
    }
}

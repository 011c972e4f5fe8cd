//! Read operations. The free functions operate on an open snapshot so the
//! built-in range functions can reuse them without reopening the engine.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::api::RangeApi;
use crate::backend::Snapshot;
use crate::compiler::{parse, Evaluator};
use crate::error::{CResult, Error};
use crate::graph::{DEPENDENCY, PRIMARY};
use crate::node::Node;
use crate::record::NodeType;
use crate::store::engine::Engine;
use crate::store::txn::WriteTxn;
use crate::value::{Object, Value};

/// The environment prefix used for child node keys.
pub fn env_prefix(env_name: &str) -> String {
    if env_name.is_empty() {
        String::new()
    } else {
        format!("{}#", env_name)
    }
}

/// `<env>#<name>`, degrading gracefully when either side is empty.
pub fn prefixed_node_name(env_name: &str, node_name: &str) -> String {
    if !env_name.is_empty() && !node_name.is_empty() {
        format!("{}{}", env_prefix(env_name), node_name)
    } else if !env_name.is_empty() {
        env_name.to_string()
    } else {
        node_name.to_string()
    }
}

/// Strips the environment prefix when present.
pub fn unprefix_node_name(env_name: &str, node_name: &str) -> String {
    let prefix = env_prefix(env_name);
    if !env_name.is_empty() && !node_name.is_empty() {
        if let Some(stripped) = node_name.strip_prefix(&prefix) {
            return stripped.to_string();
        }
    }
    if node_name.is_empty() {
        return env_name.to_string();
    }
    node_name.to_string()
}

/// Node lookup shared by snapshots and write transactions, so the fuzzy
/// env-prefix resolution below works against either view.
pub(crate) trait NodeLookup {
    fn lookup(&self, graph: &str, name: &str) -> CResult<Option<Node>>;
}

impl<'b, E: Engine> NodeLookup for Snapshot<'b, E> {
    fn lookup(&self, graph: &str, name: &str) -> CResult<Option<Node>> {
        self.get_node(graph, name)
    }
}

impl<'b, E: Engine> NodeLookup for WriteTxn<'b, E> {
    fn lookup(&self, graph: &str, name: &str) -> CResult<Option<Node>> {
        self.get_node(graph, name)
    }
}

/// Resolves a node by `<env>#<name>` first, then by the bare name. The bare
/// fallback only accepts environments and hosts; anything else under an
/// unprefixed name is a miss-filed cluster and reported as not found.
pub(crate) fn get_node_fuzzy(
    kv: &dyn NodeLookup,
    graph: &str,
    env_name: &str,
    node_name: &str,
) -> CResult<Option<Node>> {
    let prefixed = prefixed_node_name(env_name, node_name);
    if let Some(node) = kv.lookup(graph, &prefixed)? {
        return Ok(Some(node));
    }
    if let Some(node) = kv.lookup(graph, node_name)? {
        if node.node_type() != NodeType::Environment && node.node_type() != NodeType::Host {
            return Err(Error::NodeNotFound(prefixed));
        }
        return Ok(Some(node));
    }
    Ok(None)
}

/// Every environment node, in key order.
pub(crate) fn environments<E: Engine>(snapshot: &Snapshot<'_, E>) -> CResult<Vec<String>> {
    Ok(snapshot
        .nodes(PRIMARY)?
        .into_iter()
        .filter(|n| n.node_type() == NodeType::Environment)
        .map(|n| n.name().to_string())
        .collect())
}

/// Every host node, in key order.
pub(crate) fn hosts<E: Engine>(snapshot: &Snapshot<'_, E>) -> CResult<Vec<String>> {
    Ok(snapshot
        .nodes(PRIMARY)?
        .into_iter()
        .filter(|n| n.node_type() == NodeType::Host)
        .map(|n| n.name().to_string())
        .collect())
}

/// Every cluster reachable from the environment, unprefixed and sorted.
pub(crate) fn clusters_in_env<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
) -> CResult<Vec<String>> {
    let root = snapshot
        .get_node(PRIMARY, env_name)?
        .ok_or_else(|| Error::NodeNotFound(env_name.to_string()))?;

    let mut visited = HashSet::new();
    let mut stack = vec![root];
    let mut found = Vec::new();
    while let Some(node) = stack.pop() {
        if !visited.insert(node.name().to_string()) {
            continue;
        }
        if node.node_type() == NodeType::Cluster {
            found.push(unprefix_node_name(env_name, node.name()));
        }
        for child in node.forward_edges() {
            if let Some(child) = snapshot.get_node(PRIMARY, &child)? {
                stack.push(child);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// The parent clusters of a node, unprefixed.
pub(crate) fn clusters_of<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
    node_name: &str,
) -> CResult<Vec<String>> {
    let node = get_node_fuzzy(snapshot, PRIMARY, env_name, node_name)?
        .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
    Ok(node
        .reverse_edges()
        .into_iter()
        .map(|e| unprefix_node_name(env_name, &e))
        .collect())
}

fn tags_value(node: &Node) -> Value {
    let mut obj = Object::new();
    for (key, values) in node.tags() {
        obj.insert(key, Value::from(values));
    }
    Value::Object(obj)
}

/// DFS of the primary graph producing the nested
/// `{type, name, tags, dependencies, children}` object. Cycles are skipped;
/// `depth` caps the descent.
pub(crate) fn expand_value<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
    node_name: &str,
    depth: usize,
) -> CResult<Value> {
    let node = get_node_fuzzy(snapshot, PRIMARY, env_name, node_name)?
        .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
    let mut visited = HashSet::new();
    let mut onstack = HashSet::new();
    expand_node(snapshot, env_name, &node, depth, &mut visited, &mut onstack)
}

fn expand_node<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
    node: &Node,
    depth: usize,
    visited: &mut HashSet<String>,
    onstack: &mut HashSet<String>,
) -> CResult<Value> {
    let name = node.name().to_string();
    visited.insert(name.clone());
    onstack.insert(name.clone());

    let mut obj = Object::new();
    obj.insert("type", node.node_type().to_string());
    obj.insert("name", unprefix_node_name(env_name, &name));
    obj.insert("tags", tags_value(node));

    // The dependency graph is unversioned; read it at its latest version.
    let mut deps = Vec::new();
    if let Some(dep_node) = snapshot.get_node_latest(DEPENDENCY, &name)? {
        deps = dep_node.forward_edges();
    }
    obj.insert("dependencies", Value::from(deps));

    let mut children = Object::new();
    if depth > 0 {
        for child_name in node.forward_edges() {
            if onstack.contains(&child_name) || visited.contains(&child_name) {
                continue;
            }
            let Some(child) = snapshot.get_node(PRIMARY, &child_name)? else {
                continue;
            };
            let subtree =
                expand_node(snapshot, env_name, &child, depth - 1, visited, onstack)?;
            children.insert(child_name, subtree);
        }
    }
    obj.insert("children", children);

    onstack.remove(&name);
    Ok(Value::Object(obj))
}

/// First, DFS the primary graph from the environment to collect every
/// non-environment node; then topologically sort those nodes along the
/// dependency graph restricted to that set. A back-edge is a cycle failure.
pub(crate) fn topological_sort<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
) -> CResult<Vec<String>> {
    let root = snapshot
        .get_node(PRIMARY, env_name)?
        .ok_or_else(|| Error::NodeNotFound(env_name.to_string()))?;

    let mut visited = HashSet::new();
    let mut stack = vec![root];
    let mut members = Vec::new();
    while let Some(node) = stack.pop() {
        if !visited.insert(node.name().to_string()) {
            continue;
        }
        if node.node_type() != NodeType::Environment {
            members.push(node.name().to_string());
        }
        for child in node.forward_edges() {
            if let Some(child) = snapshot.get_node(PRIMARY, &child)? {
                stack.push(child);
            }
        }
    }

    let member_set: HashSet<&String> = members.iter().collect();
    let mut sorted = Vec::new();
    let mut done = HashSet::new();
    let mut onstack = HashSet::new();
    for name in &members {
        sort_visit(snapshot, name, &member_set, &mut done, &mut onstack, &mut sorted)?;
    }
    sorted.reverse();
    Ok(sorted)
}

fn sort_visit<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    name: &String,
    members: &HashSet<&String>,
    done: &mut HashSet<String>,
    onstack: &mut HashSet<String>,
    sorted: &mut Vec<String>,
) -> CResult<()> {
    if onstack.contains(name) {
        return Err(Error::GraphCycle(format!("dependency cycle through {}", name)));
    }
    if done.contains(name) {
        return Ok(());
    }
    onstack.insert(name.clone());
    if let Some(dep_node) = snapshot.get_node_latest(DEPENDENCY, name)? {
        for dep in dep_node.forward_edges() {
            if members.contains(&dep) {
                sort_visit(snapshot, &dep, members, done, onstack, sorted)?;
            }
        }
    }
    onstack.remove(name);
    done.insert(name.clone());
    sorted.push(name.clone());
    Ok(())
}

/// Every node not reachable from any environment via forward edges.
pub(crate) fn orphans<E: Engine>(
    snapshot: &Snapshot<'_, E>,
) -> CResult<Vec<(NodeType, String)>> {
    let mut visited = HashSet::new();
    for env in environments(snapshot)? {
        let mut stack = vec![env];
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(node) = snapshot.get_node(PRIMARY, &name)? {
                stack.extend(node.forward_edges());
            }
        }
    }

    let mut found = Vec::new();
    for node in snapshot.nodes(PRIMARY)? {
        if !visited.contains(node.name()) {
            found.push((node.node_type(), node.name().to_string()));
        }
    }
    Ok(found)
}

struct BfsEntry {
    name: String,
    depth: usize,
}

/// Concurrent BFS up the reverse graph from both nodes, alternating one step
/// each; the first intersection wins, ties broken by total path length.
pub(crate) fn nearest_common_ancestor<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
    node1_name: &str,
    node2_name: &str,
) -> CResult<Option<String>> {
    let n1 = get_node_fuzzy(snapshot, PRIMARY, env_name, node1_name)?
        .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node1_name)))?;
    let n2 = get_node_fuzzy(snapshot, PRIMARY, env_name, node2_name)?
        .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node2_name)))?;

    let mut visited1: HashMap<String, usize> = HashMap::new();
    let mut visited2: HashMap<String, usize> = HashMap::new();
    let mut q1 = VecDeque::new();
    let mut q2 = VecDeque::new();
    q1.push_back(BfsEntry { name: n1.name().to_string(), depth: 0 });
    q2.push_back(BfsEntry { name: n2.name().to_string(), depth: 0 });

    let mut ancestor = None;
    let mut min_distance = usize::MAX;

    while let (Some(v1), Some(v2)) = (q1.pop_front(), q2.pop_front()) {
        if let Some(d2) = visited2.get(&v1.name) {
            let distance = d2 + v1.depth;
            if distance < min_distance {
                ancestor = Some(v1.name.clone());
                min_distance = distance;
            }
        }
        if let Some(d1) = visited1.get(&v2.name) {
            let distance = d1 + v2.depth;
            if distance < min_distance {
                ancestor = Some(v2.name.clone());
                min_distance = distance;
            }
        }

        // Nothing past this depth can beat the best answer found so far.
        if min_distance != usize::MAX && v1.depth + v2.depth > min_distance * 2 + 1 {
            return Ok(ancestor);
        }

        if !visited1.contains_key(&v1.name) {
            visited1.insert(v1.name.clone(), v1.depth);
            if let Some(node) = snapshot.get_node(PRIMARY, &v1.name)? {
                for parent in node.reverse_edges() {
                    q1.push_back(BfsEntry { name: parent, depth: v1.depth + 1 });
                }
            }
        }
        if !visited2.contains_key(&v2.name) {
            visited2.insert(v2.name.clone(), v2.depth);
            if let Some(node) = snapshot.get_node(PRIMARY, &v2.name)? {
                for parent in node.reverse_edges() {
                    q2.push_back(BfsEntry { name: parent, depth: v2.depth + 1 });
                }
            }
        }
    }

    Ok(ancestor)
}

/// Walks parents from a node until one carries the tag key. `breadth` picks
/// BFS over DFS.
fn search_parents_for_first_key<E: Engine>(
    snapshot: &Snapshot<'_, E>,
    env_name: &str,
    node_name: &str,
    key: &str,
    breadth: bool,
) -> CResult<Option<(String, Vec<String>)>> {
    let start = get_node_fuzzy(snapshot, PRIMARY, env_name, node_name)?
        .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;

    let mut visited = HashSet::new();
    let mut pending = VecDeque::new();
    pending.push_back(start.name().to_string());

    while let Some(name) = if breadth {
        pending.pop_front()
    } else {
        pending.pop_back()
    } {
        if !visited.insert(name.clone()) {
            continue;
        }
        let Some(node) = snapshot.get_node(PRIMARY, &name)? else {
            continue;
        };
        if let Some(values) = node.tags().get(key) {
            return Ok(Some((name, values.clone())));
        }
        pending.extend(node.reverse_edges());
    }
    Ok(None)
}

impl<E: Engine> RangeApi<E> {
    /// Every environment name.
    pub fn all_environments(&self, version: Option<u64>) -> CResult<Vec<String>> {
        environments(&self.snapshot(version)?)
    }

    /// Every cluster in an environment, unprefixed and sorted.
    pub fn all_clusters(&self, env_name: &str, version: Option<u64>) -> CResult<Vec<String>> {
        clusters_in_env(&self.snapshot(version)?, env_name)
    }

    /// Every host name.
    pub fn all_hosts(&self, version: Option<u64>) -> CResult<Vec<String>> {
        hosts(&self.snapshot(version)?)
    }

    /// Parses and evaluates a range expression against a graph snapshot.
    pub fn expand_range_expression(
        &self,
        env_name: &str,
        expression: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        let snapshot = self.snapshot(version)?;
        let expr = parse(expression, &self.functions().names())?;
        Evaluator::new(&snapshot, env_name, self.functions()).expand(&expr)
    }

    /// Direct forward neighbors, unprefixed. With `node_type`, the node must
    /// match it.
    pub fn simple_expand(
        &self,
        env_name: &str,
        node_name: &str,
        version: Option<u64>,
        node_type: Option<NodeType>,
    ) -> CResult<Vec<String>> {
        let snapshot = self.snapshot(version)?;
        let name = prefixed_node_name(env_name, node_name);
        let node = snapshot
            .get_node(PRIMARY, &name)?
            .ok_or_else(|| Error::NodeNotFound(name.clone()))?;
        if let Some(expected) = node_type {
            if node.node_type() != expected {
                return Err(Error::IncorrectNodeType(format!(
                    "{} has type {}, should be {}",
                    name,
                    node.node_type(),
                    expected
                )));
            }
        }
        Ok(node
            .forward_edges()
            .into_iter()
            .map(|e| unprefix_node_name(env_name, &e))
            .collect())
    }

    pub fn simple_expand_cluster(
        &self,
        env_name: &str,
        cluster_name: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        self.simple_expand(env_name, cluster_name, version, Some(NodeType::Cluster))
    }

    pub fn simple_expand_env(&self, env_name: &str, version: Option<u64>) -> CResult<Vec<String>> {
        self.simple_expand(env_name, "", version, Some(NodeType::Environment))
    }

    /// The tag keys on a node.
    pub fn get_keys(
        &self,
        env_name: &str,
        node_name: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        let snapshot = self.snapshot(version)?;
        let node = get_node_fuzzy(&snapshot, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
        Ok(node.tags().into_keys().collect())
    }

    /// The values of one tag key.
    pub fn fetch_key(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        let snapshot = self.snapshot(version)?;
        let node = get_node_fuzzy(&snapshot, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
        node.tags().remove(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// The whole tag table as an object of value arrays.
    pub fn fetch_all_keys(
        &self,
        env_name: &str,
        node_name: &str,
        version: Option<u64>,
    ) -> CResult<Value> {
        let snapshot = self.snapshot(version)?;
        let node = get_node_fuzzy(&snapshot, PRIMARY, env_name, node_name)?
            .ok_or_else(|| Error::NodeNotFound(prefixed_node_name(env_name, node_name)))?;
        Ok(tags_value(&node))
    }

    /// The nested expansion of a node:
    /// `{type, name, tags, dependencies, children}`.
    pub fn expand(
        &self,
        env_name: &str,
        node_name: &str,
        version: Option<u64>,
        depth: usize,
    ) -> CResult<Value> {
        expand_value(&self.snapshot(version)?, env_name, node_name, depth)
    }

    /// Like [`RangeApi::expand`], but the node must be a cluster.
    pub fn expand_cluster(
        &self,
        env_name: &str,
        cluster_name: &str,
        version: Option<u64>,
        depth: usize,
    ) -> CResult<Value> {
        let snapshot = self.snapshot(version)?;
        let name = prefixed_node_name(env_name, cluster_name);
        let node = snapshot
            .get_node(PRIMARY, &name)?
            .ok_or_else(|| Error::NodeNotFound(name.clone()))?;
        if node.node_type() != NodeType::Cluster {
            return Err(Error::IncorrectNodeType(format!(
                "{} has type {}, should be CLUSTER",
                name,
                node.node_type()
            )));
        }
        expand_value(&snapshot, env_name, cluster_name, depth)
    }

    /// Like [`RangeApi::expand`], but for a whole environment.
    pub fn expand_env(
        &self,
        env_name: &str,
        version: Option<u64>,
        depth: usize,
    ) -> CResult<Value> {
        let snapshot = self.snapshot(version)?;
        let node = snapshot
            .get_node(PRIMARY, env_name)?
            .ok_or_else(|| Error::NodeNotFound(env_name.to_string()))?;
        if node.node_type() != NodeType::Environment {
            return Err(Error::IncorrectNodeType(format!(
                "{} has type {}, should be ENVIRONMENT",
                env_name,
                node.node_type()
            )));
        }
        expand_value(&snapshot, env_name, "", depth)
    }

    /// The parent clusters of a node.
    pub fn get_clusters(
        &self,
        env_name: &str,
        node_name: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        clusters_of(&self.snapshot(version)?, env_name, node_name)
    }

    /// BFS the reverse graph for the nearest node carrying `key`.
    pub fn bfs_search_parents_for_first_key(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
        version: Option<u64>,
    ) -> CResult<Option<(String, Vec<String>)>> {
        search_parents_for_first_key(&self.snapshot(version)?, env_name, node_name, key, true)
    }

    /// DFS variant of the parent key search.
    pub fn dfs_search_parents_for_first_key(
        &self,
        env_name: &str,
        node_name: &str,
        key: &str,
        version: Option<u64>,
    ) -> CResult<Option<(String, Vec<String>)>> {
        search_parents_for_first_key(&self.snapshot(version)?, env_name, node_name, key, false)
    }

    /// The nearest common ancestor of two nodes, if any.
    pub fn nearest_common_ancestor(
        &self,
        env_name: &str,
        node1_name: &str,
        node2_name: &str,
        version: Option<u64>,
    ) -> CResult<Option<String>> {
        nearest_common_ancestor(&self.snapshot(version)?, env_name, node1_name, node2_name)
    }

    /// Topological order of the environment's nodes along the dependency
    /// graph; fails on a cycle.
    pub fn environment_topological_sort(
        &self,
        env_name: &str,
        version: Option<u64>,
    ) -> CResult<Vec<String>> {
        topological_sort(&self.snapshot(version)?, env_name)
    }

    /// Every node not reachable from any environment.
    pub fn find_orphaned_nodes(
        &self,
        version: Option<u64>,
    ) -> CResult<Vec<(NodeType, String)>> {
        orphans(&self.snapshot(version)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_prefix_helpers() {
        assert_eq!(prefixed_node_name("env", "node"), "env#node");
        assert_eq!(prefixed_node_name("env", ""), "env");
        assert_eq!(prefixed_node_name("", "node"), "node");
        assert_eq!(unprefix_node_name("env", "env#node"), "node");
        assert_eq!(unprefix_node_name("env", "other#node"), "other#node");
        assert_eq!(unprefix_node_name("env", ""), "env");
        assert_eq!(unprefix_node_name("", "node"), "node");
    }
}

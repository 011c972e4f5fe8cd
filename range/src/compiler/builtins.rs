//! Built-in range functions.
//!
//! A function receives the evaluation context (snapshot + environment) by
//! reference and one string vector per `;`-separated argument. Functions
//! invoked with the wrong number of argument vectors return the empty result.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::error;

use crate::api::read;
use crate::backend::Snapshot;
use crate::error::CResult;
use crate::store::engine::Engine;
use crate::value::Value;

/// What a range function gets to see while evaluating.
pub struct EvalContext<'a, 'b, E: Engine> {
    pub snapshot: &'a Snapshot<'b, E>,
    pub env_name: &'a str,
}

pub trait RangeFunction<E: Engine>: Send + Sync {
    /// The number of argument vectors the function expects.
    fn n_args(&self) -> usize;

    fn invoke(&self, ctx: &EvalContext<'_, '_, E>, args: &[Vec<String>])
        -> CResult<Vec<String>>;
}

/// The function symbol table shared by the lexer and the evaluator.
/// Immutable after configuration.
pub struct FunctionTable<E: Engine> {
    functions: std::collections::BTreeMap<String, Arc<dyn RangeFunction<E>>>,
}

impl<E: Engine> FunctionTable<E> {
    pub fn empty() -> Self {
        Self { functions: std::collections::BTreeMap::new() }
    }

    /// The built-in functions.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("expand", Arc::new(ExpandFn));
        table.register("expand_hosts", Arc::new(ExpandHostsFn));
        table.register("clusters", Arc::new(ClustersFn));
        table.register("all_clusters", Arc::new(AllClustersFn));
        table
    }

    /// The built-ins restricted to the given names. Unknown names are
    /// ignored.
    pub fn builtin_subset(names: &[String]) -> Self {
        let mut all = Self::builtin();
        all.functions.retain(|name, _| names.iter().any(|n| n == name));
        all
    }

    pub fn register(&mut self, name: &str, function: Arc<dyn RangeFunction<E>>) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RangeFunction<E>>> {
        self.functions.get(name)
    }

    /// The registered names, for the tokenizer's symbol table.
    pub fn names(&self) -> BTreeSet<String> {
        self.functions.keys().cloned().collect()
    }
}

/// `expand(cluster_names)` — the JSON encoding of the nested expansion of
/// each name. Names that fail to expand are skipped.
struct ExpandFn;

impl<E: Engine> RangeFunction<E> for ExpandFn {
    fn n_args(&self) -> usize {
        1
    }

    fn invoke(&self, ctx: &EvalContext<'_, '_, E>, args: &[Vec<String>]) -> CResult<Vec<String>> {
        let mut ret = Vec::new();
        if args.len() != RangeFunction::<E>::n_args(self) {
            return Ok(ret);
        }
        for elem in &args[0] {
            match read::expand_value(ctx.snapshot, ctx.env_name, elem, usize::MAX) {
                Ok(value) => ret.push(value.to_json()),
                Err(err) => {
                    error!("expand({}) failed: {}", elem, err);
                    continue;
                }
            }
        }
        Ok(ret)
    }
}

/// `expand_hosts(cluster_names)` — the HOST leaves of the nested expansion.
struct ExpandHostsFn;

fn collect_hosts(value: &Value, hosts: &mut Vec<String>) {
    let Value::Object(obj) = value else { return };
    let node_type = obj.get("type");
    let name = obj.get("name");
    if let (Some(Value::String(node_type)), Some(Value::String(name))) = (node_type, name) {
        if node_type == "HOST" {
            hosts.push(name.clone());
            return;
        }
    }
    if let Some(Value::Object(children)) = obj.get("children") {
        for (_, child) in children.iter() {
            collect_hosts(child, hosts);
        }
    }
}

impl<E: Engine> RangeFunction<E> for ExpandHostsFn {
    fn n_args(&self) -> usize {
        1
    }

    fn invoke(&self, ctx: &EvalContext<'_, '_, E>, args: &[Vec<String>]) -> CResult<Vec<String>> {
        let mut ret = Vec::new();
        if args.len() != RangeFunction::<E>::n_args(self) {
            return Ok(ret);
        }
        for elem in &args[0] {
            match read::expand_value(ctx.snapshot, ctx.env_name, elem, usize::MAX) {
                Ok(value) => collect_hosts(&value, &mut ret),
                Err(err) => {
                    error!("expand_hosts({}) failed: {}", elem, err);
                    continue;
                }
            }
        }
        Ok(ret)
    }
}

/// `clusters(node_names)` — the parent clusters of each node.
struct ClustersFn;

impl<E: Engine> RangeFunction<E> for ClustersFn {
    fn n_args(&self) -> usize {
        1
    }

    fn invoke(&self, ctx: &EvalContext<'_, '_, E>, args: &[Vec<String>]) -> CResult<Vec<String>> {
        let mut ret = Vec::new();
        if args.len() != RangeFunction::<E>::n_args(self) {
            return Ok(ret);
        }
        for elem in &args[0] {
            match read::clusters_of(ctx.snapshot, ctx.env_name, elem) {
                Ok(clusters) => ret.extend(clusters),
                Err(err) => {
                    error!("clusters({}) failed: {}", elem, err);
                    continue;
                }
            }
        }
        Ok(ret)
    }
}

/// `all_clusters()` — every `env#cluster` in the system.
struct AllClustersFn;

impl<E: Engine> RangeFunction<E> for AllClustersFn {
    fn n_args(&self) -> usize {
        0
    }

    fn invoke(&self, ctx: &EvalContext<'_, '_, E>, args: &[Vec<String>]) -> CResult<Vec<String>> {
        let mut ret = Vec::new();
        if args.len() != RangeFunction::<E>::n_args(self) {
            return Ok(ret);
        }
        for env in read::environments(ctx.snapshot)? {
            match read::clusters_in_env(ctx.snapshot, &env) {
                Ok(clusters) => {
                    ret.extend(clusters.into_iter().map(|c| format!("{}#{}", env, c)))
                }
                Err(err) => {
                    error!("all_clusters({}) failed: {}", env, err);
                    continue;
                }
            }
        }
        Ok(ret)
    }
}

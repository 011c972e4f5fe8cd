//! The expanding evaluator: a bottom-up tree walk that resolves each AST
//! node to a vector of strings against a graph snapshot.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::backend::Snapshot;
use crate::compiler::ast::Expr;
use crate::compiler::builtins::{EvalContext, FunctionTable};
use crate::error::{CResult, Error};
use crate::graph::PRIMARY;
use crate::node::Node;
use crate::store::engine::Engine;

/// The tag key consulted by the `^` operator.
pub const ADMIN_NODE_KEY: &str = "ADMIN_NODE";

/// Evaluates parsed range expressions against a snapshot of the primary
/// graph. Single-threaded and memo-less; re-entrant across separate AST
/// roots.
pub struct Evaluator<'a, 'b, E: Engine> {
    snapshot: &'a Snapshot<'b, E>,
    env_name: String,
    functions: &'a FunctionTable<E>,
}

impl<'a, 'b, E: Engine> Evaluator<'a, 'b, E> {
    pub fn new(
        snapshot: &'a Snapshot<'b, E>,
        env_name: impl Into<String>,
        functions: &'a FunctionTable<E>,
    ) -> Self {
        Self { snapshot, env_name: env_name.into(), functions }
    }

    /// Expands an expression to its result vector.
    pub fn expand(&self, expr: &Expr) -> CResult<Vec<String>> {
        match expr {
            Expr::Null => Ok(Vec::new()),
            Expr::Word(word) => Ok(vec![word.clone()]),
            Expr::Literal(lit) => Ok(vec![lit.clone()]),
            Expr::Regex { pattern, .. } => Ok(vec![pattern.clone()]),
            Expr::Union(lhs, rhs) => {
                let mut set: BTreeSet<String> = self.expand(lhs)?.into_iter().collect();
                set.extend(self.expand(rhs)?);
                Ok(set.into_iter().collect())
            }
            Expr::Difference(lhs, rhs) => {
                let mut lchildren = self.expand(lhs)?;
                lchildren.sort();
                if let Expr::Regex { pattern, positive } = rhs.as_ref() {
                    // A regex on the right rejects matching elements.
                    self.regex_filter(lchildren, pattern, !*positive)
                } else {
                    let rchildren: BTreeSet<String> = self.expand(rhs)?.into_iter().collect();
                    Ok(lchildren.into_iter().filter(|c| !rchildren.contains(c)).collect())
                }
            }
            Expr::Intersection(lhs, rhs) => {
                let mut lchildren = self.expand(lhs)?;
                lchildren.sort();
                if let Expr::Regex { pattern, positive } = rhs.as_ref() {
                    self.regex_filter(lchildren, pattern, *positive)
                } else {
                    let rchildren: BTreeSet<String> = self.expand(rhs)?.into_iter().collect();
                    Ok(lchildren.into_iter().filter(|c| rchildren.contains(c)).collect())
                }
            }
            Expr::Sequence { lhs, rhs } => expand_sequence(lhs, rhs),
            Expr::Expand(child) => {
                let children = self.expand(child)?;
                // Tag-value expansion already yields plain strings.
                if matches!(child.as_ref(), Expr::KeyExpand { .. }) {
                    return Ok(children);
                }
                let mut out = BTreeSet::new();
                for child in children {
                    let node = self.resolve_node(&child)?;
                    out.extend(node.forward_edges());
                }
                Ok(out.into_iter().collect())
            }
            Expr::GetCluster(child) => {
                let mut out = Vec::new();
                for child in self.expand(child)? {
                    let node = self.resolve_node(&child)?;
                    out.extend(node.reverse_edges());
                }
                Ok(out)
            }
            Expr::Admin(child) => self.expand_admin(child),
            Expr::Group(child) => self.expand(child),
            Expr::Negate(_) => Err(Error::InvalidRangeExpression(
                "negation is only valid inside a filtering context".to_string(),
            )),
            Expr::BraceExpand { left, center, right } => {
                let lchildren = self.expand(left)?;
                let cchildren = self.expand(center)?;
                let rchildren = self.expand(right)?;

                let tmp: Vec<String> = if lchildren.is_empty() {
                    cchildren
                } else {
                    lchildren
                        .iter()
                        .flat_map(|l| cchildren.iter().map(move |c| format!("{}{}", l, c)))
                        .collect()
                };
                if rchildren.is_empty() {
                    Ok(tmp)
                } else {
                    Ok(tmp
                        .iter()
                        .flat_map(|t| rchildren.iter().map(move |r| format!("{}{}", t, r)))
                        .collect())
                }
            }
            Expr::FunctionArguments(_) => Err(Error::InvalidRangeExpression(
                "argument list outside a function call".to_string(),
            )),
            Expr::Function { name, args } => {
                let function = self.functions.get(name).ok_or_else(|| {
                    Error::InvalidRangeExpression(format!("unknown function: {}", name))
                })?;
                let Expr::FunctionArguments(arg_exprs) = args.as_ref() else {
                    return Err(Error::InvalidRangeExpression(
                        "malformed function call".to_string(),
                    ));
                };
                let mut vectors = Vec::with_capacity(arg_exprs.len());
                for arg in arg_exprs {
                    vectors.push(self.expand(arg)?);
                }
                let ctx = EvalContext { snapshot: self.snapshot, env_name: &self.env_name };
                function.invoke(&ctx, &vectors)
            }
            Expr::KeyExpand { lhs, key } => {
                let mut out = Vec::new();
                for child in self.expand(lhs)? {
                    let node = self.resolve_node(&child)?;
                    let tags = node.tags();
                    if key == "KEYS" {
                        out.extend(tags.keys().cloned());
                    } else if let Some(values) = tags.get(key) {
                        out.extend(values.iter().cloned());
                    }
                }
                Ok(out)
            }
        }
    }

    fn regex_filter(
        &self,
        children: Vec<String>,
        pattern: &str,
        keep_matching: bool,
    ) -> CResult<Vec<String>> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| Error::InvalidRangeExpression(e.to_string()))?;
        Ok(children.into_iter().filter(|c| re.is_match(c) == keep_matching).collect())
    }

    /// Applies the environment prefix to a bare name when the prefixed node
    /// exists; otherwise the name is used as-is.
    fn prefix_child(&self, child: &str) -> CResult<String> {
        if self.env_name.is_empty() {
            return Ok(child.to_string());
        }
        let prefix = format!("{}#", self.env_name);
        if child.starts_with(&prefix) {
            return Ok(child.to_string());
        }
        let prefixed = format!("{}{}", prefix, child);
        if self.snapshot.get_node(PRIMARY, &prefixed)?.is_some() {
            return Ok(prefixed);
        }
        Ok(child.to_string())
    }

    fn resolve_node(&self, child: &str) -> CResult<Node> {
        let name = self.prefix_child(child)?;
        self.snapshot
            .get_node(PRIMARY, &name)?
            .ok_or_else(|| Error::NodeNotFound(name))
    }

    /// BFS up the reverse graph from each element until a node carrying the
    /// ADMIN_NODE tag is found; the result is the union of those values.
    fn expand_admin(&self, child: &Expr) -> CResult<Vec<String>> {
        let mut admins = BTreeSet::new();
        for child in self.expand(child)? {
            let name = self.prefix_child(&child)?;
            let mut visited = HashSet::new();
            let mut queue = VecDeque::new();
            if self.snapshot.get_node(PRIMARY, &name)?.is_some() {
                queue.push_back(name);
            }
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                let Some(node) = self.snapshot.get_node(PRIMARY, &current)? else {
                    continue;
                };
                if let Some(values) = node.tags().get(ADMIN_NODE_KEY) {
                    admins.extend(values.iter().cloned());
                    break;
                }
                queue.extend(node.reverse_edges());
            }
        }
        Ok(admins.into_iter().collect())
    }
}

/// Expands `lhs..rhs`: lhs is `<prefix><number>`, rhs is `<number?><suffix>`
/// (inheriting the prefix when it repeats it). Pads to the wider number.
fn expand_sequence(lhs: &str, rhs: &str) -> CResult<Vec<String>> {
    let digits_start = lhs.len() - lhs.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    let (prefix, lnum) = lhs.split_at(digits_start);
    if lnum.is_empty() {
        return Err(Error::InvalidRangeExpression(format!(
            "invalid left portion of sequence: {}..{}",
            lhs, rhs
        )));
    }

    let mut rword = rhs;
    if !prefix.is_empty() {
        if let Some(stripped) = rword.strip_prefix(prefix) {
            rword = stripped;
        }
    }
    let digits_end = rword.chars().take_while(|c| c.is_ascii_digit()).count();
    let (rnum, suffix) = rword.split_at(digits_end);
    if rnum.is_empty() {
        return Err(Error::InvalidRangeExpression(format!(
            "invalid right portion of sequence: {}..{}",
            lhs, rhs
        )));
    }

    let lo: u64 = lnum
        .parse()
        .map_err(|_| Error::InvalidRangeExpression(format!("sequence bound too large: {}", lnum)))?;
    let mut hi: u64 = rnum
        .parse()
        .map_err(|_| Error::InvalidRangeExpression(format!("sequence bound too large: {}", rnum)))?;

    // Legacy behavior: an inverted range is shifted up, not rejected.
    if hi < lo {
        hi += lo;
    }

    let width = std::cmp::max(decimal_width(lo), decimal_width(hi));
    Ok((lo..=hi)
        .map(|n| format!("{}{:0width$}{}", prefix, n, suffix, width = width as usize))
        .collect())
}

fn decimal_width(n: u64) -> u32 {
    if n == 0 {
        1
    } else {
        n.ilog10() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_pads_to_widest_bound() {
        let children = expand_sequence("asdf1", "1000").unwrap();
        assert_eq!(children.len(), 1000);
        assert_eq!(children[0], "asdf0001");
        assert_eq!(children[499], "asdf0500");
        assert_eq!(children[999], "asdf1000");
    }

    #[test]
    fn sequence_inherits_prefix_and_keeps_suffix() {
        assert_eq!(
            expand_sequence("web1", "web3").unwrap(),
            vec!["web1", "web2", "web3"]
        );
        assert_eq!(
            expand_sequence("node1", "2a").unwrap(),
            vec!["node1a", "node2a"]
        );
    }

    #[test]
    fn sequence_without_prefix() {
        assert_eq!(expand_sequence("0", "3").unwrap(), vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn inverted_sequence_shifts_up() {
        // hi < lo adds lo to hi instead of failing.
        assert_eq!(
            expand_sequence("a5", "3").unwrap(),
            vec!["a5", "a6", "a7", "a8"]
        );
    }

    #[test]
    fn sequence_requires_numbers_on_both_sides() {
        assert!(expand_sequence("abc", "3").is_err());
        assert!(expand_sequence("a1", "xyz").is_err());
    }
}

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::keys;
use super::Result;

/// A node in the configuration forest.
///
/// Internal nodes hold an ordered mapping of segment to child; a node whose
/// children are all array-index segments projects to a sequence. Leaves hold
/// the raw string value as it came from the flat map.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Internal {
        children: BTreeMap<String, Node>,
        array: bool,
    },
    Leaf {
        value: Option<String>,
    },
}

impl Node {
    fn internal() -> Node {
        Node::Internal {
            children: BTreeMap::new(),
            array: false,
        }
    }

    /// The raw leaf value, if this is a leaf.
    pub fn value(&self) -> Option<&str> {
        match self {
            Node::Leaf { value } => value.as_ref().map(|v| v.as_str()),
            Node::Internal { .. } => None,
        }
    }

    pub fn is_array(&self) -> bool {
        match self {
            Node::Internal { array, .. } => *array,
            Node::Leaf { .. } => false,
        }
    }

    /// Project this subtree to a nested value with coerced leaves.
    pub fn to_value(&self) -> Value {
        node_to_value(self)
    }
}

/// One tree per top-level segment of the flat key space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forest {
    roots: BTreeMap<String, Node>,
}

impl Forest {
    pub fn new() -> Forest {
        Forest::default()
    }

    /// Build a forest from a flat map of dotted keys to string values.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Forest> {
        let mut forest = Forest::new();
        for (k, v) in map {
            forest.insert(k, Some(v.clone()))?;
        }
        Ok(forest)
    }

    /// Build a forest from an already nested value (inverse of `to_value`).
    pub fn from_value(value: &Value) -> Result<Forest> {
        Forest::from_map(&flatten_value(value)?)
    }

    /// Insert a single key, creating internal nodes along the path.
    ///
    /// A key that would turn an existing leaf into an internal node (or the
    /// reverse) is a conflict and fails.
    pub fn insert(&mut self, key: &str, value: Option<String>) -> Result<()> {
        let segments = keys::split(key)?;
        let (first, rest) = segments.split_first().unwrap();
        let root = self
            .roots
            .entry(first.clone())
            .or_insert_with(|| if rest.is_empty() { Node::Leaf { value: None } } else { Node::internal() });
        insert_at(root, key, rest, value)
    }

    /// Look up the raw leaf value for a key.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.node_at(key).and_then(|n| n.value())
    }

    /// Traverse to the node for a key.
    pub fn node_at(&self, key: &str) -> Option<&Node> {
        let segments = keys::split(key).ok()?;
        let (first, rest) = segments.split_first()?;
        let mut node = self.roots.get(first)?;
        for seg in rest {
            match node {
                Node::Internal { children, .. } => node = children.get(seg)?,
                Node::Leaf { .. } => return None,
            }
        }
        Some(node)
    }

    /// Project the forest to a nested value with coerced leaves.
    pub fn to_value(&self) -> Value {
        let mut mapping = Mapping::new();
        for (k, node) in &self.roots {
            mapping.insert(Value::String(k.clone()), node_to_value(node));
        }
        Value::Mapping(mapping)
    }

    /// Flatten back to the dotted map. Inverse of `from_map`.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (k, node) in &self.roots {
            flatten_node(node, k, &mut out);
        }
        out
    }
}

fn insert_at(node: &mut Node, key: &str, rest: &[String], value: Option<String>) -> Result<()> {
    if rest.is_empty() {
        return match node {
            Node::Leaf { value: v } => {
                *v = value;
                Ok(())
            }
            Node::Internal { .. } => bail!("key '{}' already has children", key),
        };
    }
    match node {
        Node::Leaf { .. } => bail!("key '{}' extends through a leaf", key),
        Node::Internal { children, array } => {
            let (seg, tail) = rest.split_first().unwrap();
            let child = children.entry(seg.clone()).or_insert_with(|| {
                if tail.is_empty() {
                    Node::Leaf { value: None }
                } else {
                    Node::internal()
                }
            });
            insert_at(child, key, tail, value)?;
            *array = !children.is_empty() && children.keys().all(|k| keys::is_index(k));
            Ok(())
        }
    }
}

fn node_to_value(node: &Node) -> Value {
    match node {
        Node::Leaf { value } => match value {
            Some(v) => coerce(v),
            None => Value::Null,
        },
        Node::Internal { children, array } => {
            if *array {
                // order numerically, holes collapse
                let mut indexed: Vec<(usize, &Node)> = children
                    .iter()
                    .filter_map(|(k, n)| keys::parse_index(k).ok().map(|i| (i, n)))
                    .collect();
                indexed.sort_by_key(|(i, _)| *i);
                Value::Sequence(indexed.into_iter().map(|(_, n)| node_to_value(n)).collect())
            } else {
                let mut mapping = Mapping::new();
                for (k, n) in children {
                    mapping.insert(Value::String(k.clone()), node_to_value(n));
                }
                Value::Mapping(mapping)
            }
        }
    }
}

fn flatten_node(node: &Node, prefix: &str, out: &mut BTreeMap<String, String>) {
    match node {
        Node::Leaf { value } => {
            out.insert(
                prefix.to_string(),
                value.clone().unwrap_or_else(|| "null".to_string()),
            );
        }
        Node::Internal { children, .. } => {
            for (k, n) in children {
                flatten_node(n, &format!("{}{}{}", prefix, keys::SEPARATOR, k), out);
            }
        }
    }
}

/// Coerce a raw leaf string for untyped accessors.
///
/// `"true"`/`"false"` become booleans, `"null"` becomes null, and anything
/// that parses as a finite number becomes a number. Everything else stays a
/// string.
pub fn coerce(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Number(serde_yaml::Number::from(f));
        }
    }
    Value::String(raw.to_string())
}

/// Render a scalar value back to its flat string form.
fn scalar_to_string(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => bail!("not a scalar value"),
    })
}

/// Flatten a nested value into the dotted map form.
pub fn flatten_value(value: &Value) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    match value {
        Value::Mapping(m) => {
            for (k, v) in m {
                let key = match k {
                    Value::String(s) => keys::normalize(s),
                    other => scalar_to_string(other)?,
                };
                flatten_value_at(v, &key, &mut out)?;
            }
        }
        _ => bail!("top level value must be a mapping"),
    }
    Ok(out)
}

fn flatten_value_at(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) -> Result<()> {
    match value {
        Value::Mapping(m) => {
            for (k, v) in m {
                let key = match k {
                    Value::String(s) => keys::normalize(s),
                    other => scalar_to_string(other)?,
                };
                flatten_value_at(v, &format!("{}{}{}", prefix, keys::SEPARATOR, key), out)?;
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                flatten_value_at(v, &format!("{}{}{}", prefix, keys::SEPARATOR, i), out)?;
            }
        }
        scalar => {
            out.insert(prefix.to_string(), scalar_to_string(scalar)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn projects_arrays_and_scalars() {
        let forest =
            Forest::from_map(&map(&[("a.b.0", "x"), ("a.b.1", "y"), ("a.c", "z")])).unwrap();
        let value = forest.to_value();
        let expected: Value =
            serde_yaml::from_str("a:\n  b: [x, y]\n  c: z\n").unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn roundtrips_through_flatten() {
        let input = map(&[
            ("cluster.name", "dev"),
            ("cluster.nodes.0", "node1"),
            ("cluster.nodes.1", "node2"),
            ("cluster.realm", "0"),
        ]);
        let forest = Forest::from_map(&input).unwrap();
        assert_eq!(forest.flatten(), input);
    }

    #[test]
    fn roundtrips_through_value() {
        let value: Value = serde_yaml::from_str(
            "deployment:\n  namespace: solo-e2e\n  replicas: 3\n  debug: true\n  nodes: [node1, node2]\n",
        )
        .unwrap();
        let forest = Forest::from_value(&value).unwrap();
        assert_eq!(forest.to_value(), value);
    }

    #[test]
    fn coerces_leaves() {
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("null"), Value::Null);
        assert_eq!(coerce("42"), Value::Number(42.into()));
        assert_eq!(coerce("solo"), Value::String("solo".into()));
    }

    #[test]
    fn value_lookup_and_traversal() {
        let forest = Forest::from_map(&map(&[("a.b.c", "v")])).unwrap();
        assert_eq!(forest.value_of("a.b.c"), Some("v"));
        assert!(forest.node_at("a.b").map(|n| !n.is_array()).unwrap());
        assert_eq!(forest.value_of("a.b.missing"), None);
    }

    #[test]
    fn rejects_leaf_conflicts() {
        let mut forest = Forest::new();
        forest.insert("a.b", Some("x".into())).unwrap();
        assert!(forest.insert("a.b.c", Some("y".into())).is_err());
    }

    #[test]
    fn array_holes_collapse_in_order() {
        let forest = Forest::from_map(&map(&[("a.0", "x"), ("a.2", "z")])).unwrap();
        let expected: Value = serde_yaml::from_str("a: [x, z]\n").unwrap();
        assert_eq!(forest.to_value(), expected);
    }
}

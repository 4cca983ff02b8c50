//! Path resolution against the flattened graph
//!
//! A dotted path such as `carts.items.price` resolves to the loops needed to
//! reach it (one per array crossed before the final segment) and the access
//! from the innermost loop element to the final value.

use std::fmt;

use crate::schema::{NodeKind, NodeMap, ObjectNode, ScalarType};

/// One array level to iterate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSpec {
    /// Unique name of the iterated array node
    pub key: String,
    /// Keys from the enclosing element (or the record) down to the array
    pub access: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathTarget {
    Scalar {
        node: String,
        attribute: String,
        /// Unknown for attributes of virtual nodes
        scalar_type: Option<ScalarType>,
    },
    Node {
        node: String,
        kind: NodeKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub path: String,
    pub loops: Vec<LoopSpec>,
    /// Keys from the innermost loop element (or the record) to the value
    pub leaf: Vec<String>,
    pub target: PathTarget,
    /// Whether a virtual node was crossed
    pub is_virtual: bool,
}

impl ResolvedPath {
    /// Number of loops needed to reach the value
    pub fn depth(&self) -> usize {
        self.loops.len()
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match &self.target {
            PathTarget::Scalar { scalar_type, .. } => *scalar_type,
            PathTarget::Node { .. } => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.target, PathTarget::Scalar { .. })
    }

    /// Loops reaching the elements of the target array. For any other
    /// target this is `loops` unchanged.
    pub fn element_loops(&self) -> (Vec<LoopSpec>, Vec<String>) {
        match &self.target {
            PathTarget::Node {
                node,
                kind: NodeKind::Array,
            } => {
                let mut loops = self.loops.clone();
                loops.push(LoopSpec {
                    key: node.clone(),
                    access: self.leaf.clone(),
                });
                (loops, Vec::new())
            }
            _ => (self.loops.clone(), self.leaf.clone()),
        }
    }

    /// Renders the access expression, e.g. `record.carts[i0].items[i1].price`.
    pub fn expression(&self) -> String {
        let mut out = String::from("record");
        for (index, spec) in self.loops.iter().enumerate() {
            for key in &spec.access {
                out.push('.');
                out.push_str(key);
            }
            out.push_str(&format!("[i{}]", index));
        }
        for key in &self.leaf {
            out.push('.');
            out.push_str(key);
        }
        out
    }
}

/// A path that does not exist in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub path: String,
    /// First segment that could not be followed
    pub segment: String,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path '{}' does not resolve (at '{}')", self.path, self.segment)
    }
}

pub struct PathResolver<'g> {
    nodes: &'g NodeMap,
    virtual_nodes: Option<&'g NodeMap>,
    root: &'g str,
}

impl<'g> PathResolver<'g> {
    pub fn new(nodes: &'g NodeMap, root: &'g str) -> Self {
        Self {
            nodes,
            virtual_nodes: None,
            root,
        }
    }

    /// Also follows join attachments into `virtual_nodes`.
    pub fn with_virtual(mut self, virtual_nodes: &'g NodeMap) -> Self {
        self.virtual_nodes = Some(virtual_nodes);
        self
    }

    fn node(&self, name: &str) -> Option<&'g ObjectNode> {
        self.nodes
            .get(name)
            .or_else(|| self.virtual_nodes.and_then(|nodes| nodes.get(name)))
    }

    pub fn resolve(&self, path: &str) -> Result<ResolvedPath, Unresolved> {
        let unresolved = |segment: &str| Unresolved {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(unresolved(path));
        }

        let mut current = self.node(self.root).ok_or_else(|| unresolved(self.root))?;
        let mut loops = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        let mut is_virtual = false;

        for (index, &segment) in segments.iter().enumerate() {
            let last = index + 1 == segments.len();

            if current.is_virtual {
                // attributes of joined records are not declared
                let rest = &segments[index..];
                pending.extend(rest.iter().map(|s| s.to_string()));
                return Ok(ResolvedPath {
                    path: path.to_string(),
                    loops,
                    leaf: pending,
                    target: PathTarget::Scalar {
                        node: current.unique_name.clone(),
                        attribute: rest.join("."),
                        scalar_type: None,
                    },
                    is_virtual: true,
                });
            }

            let attr = current.attribute(segment).ok_or_else(|| unresolved(segment))?;
            pending.push(segment.to_string());

            let child = match &attr.child {
                None if last => {
                    return Ok(ResolvedPath {
                        path: path.to_string(),
                        loops,
                        leaf: pending,
                        target: PathTarget::Scalar {
                            node: current.unique_name.clone(),
                            attribute: attr.name.clone(),
                            scalar_type: attr.scalar_type,
                        },
                        is_virtual,
                    })
                }
                None => return Err(unresolved(segments[index + 1])),
                Some(child) => self.node(child).ok_or_else(|| unresolved(segment))?,
            };
            is_virtual |= child.is_virtual;

            if last {
                return Ok(ResolvedPath {
                    path: path.to_string(),
                    loops,
                    leaf: pending,
                    target: PathTarget::Node {
                        node: child.unique_name.clone(),
                        kind: child.kind,
                    },
                    is_virtual,
                });
            }
            if child.kind == NodeKind::Array {
                loops.push(LoopSpec {
                    key: child.unique_name.clone(),
                    access: std::mem::take(&mut pending),
                });
            }
            current = child;
        }
        Err(unresolved(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemoryLogger;
    use crate::schema::{flatten, Descriptor, Flattened};
    use serde_json::json;

    fn cart() -> Flattened {
        let descriptor = Descriptor::from_json(&json!({
            "id": ["int", "<<id>>"],
            "address": ["object", { "city": ["string"] }],
            "carts": ["array", {
                "id": ["int", "<<cartId>>"],
                "items": ["array", { "sku": ["string", "<<sku>>"], "price": ["number"] }]
            }],
            "orders": ["array", "@orders"]
        }))
        .unwrap();
        flatten(&descriptor, "customer", &MemoryLogger::new()).unwrap()
    }

    #[test]
    fn test_resolve_nested_scalar() {
        let flat = cart();
        let resolver = PathResolver::new(&flat.nodes, &flat.root);
        let resolved = resolver.resolve("carts.items.price").unwrap();

        assert_eq!(resolved.depth(), 2);
        assert_eq!(resolved.loops[0].access, vec!["carts"]);
        assert_eq!(resolved.loops[1].access, vec!["items"]);
        assert_eq!(resolved.leaf, vec!["price"]);
        assert_eq!(resolved.scalar_type(), Some(ScalarType::Number));
        assert_eq!(resolved.expression(), "record.carts[i0].items[i1].price");
    }

    #[test]
    fn test_resolve_through_object() {
        let flat = cart();
        let resolved = PathResolver::new(&flat.nodes, &flat.root).resolve("address.city").unwrap();
        assert!(resolved.loops.is_empty());
        assert_eq!(resolved.leaf, vec!["address", "city"]);
    }

    #[test]
    fn test_resolve_node_target() {
        let flat = cart();
        let resolved = PathResolver::new(&flat.nodes, &flat.root).resolve("carts.items").unwrap();
        assert!(matches!(resolved.target, PathTarget::Node { kind: NodeKind::Array, .. }));
        let (loops, leaf) = resolved.element_loops();
        assert_eq!(loops.len(), 2);
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_unresolved_paths() {
        let flat = cart();
        let resolver = PathResolver::new(&flat.nodes, &flat.root);
        assert_eq!(resolver.resolve("carts.missing").unwrap_err().segment, "missing");
        assert!(resolver.resolve("id.deeper").is_err());
        assert!(resolver.resolve("").is_err());
    }

    #[test]
    fn test_virtual_nodes_need_opt_in() {
        let flat = cart();
        assert!(PathResolver::new(&flat.nodes, &flat.root).resolve("orders.amount").is_err());

        let resolved = PathResolver::new(&flat.nodes, &flat.root)
            .with_virtual(&flat.virtual_nodes)
            .resolve("orders.amount")
            .unwrap();
        assert!(resolved.is_virtual);
        assert_eq!(resolved.depth(), 1);
        assert_eq!(resolved.leaf, vec!["amount"]);
        assert_eq!(resolved.scalar_type(), None);
    }
}

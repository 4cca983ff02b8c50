//! Descriptor flattener
//!
//! Walks a nested descriptor once and produces:
//!
//! - the flat node graph (one [`ObjectNode`] per nested object/array level)
//! - the virtual nodes standing for join attachments without a declared shape
//! - store [`Metadata`] (keys, columns, aggregates, joins, references)
//! - the default-value skeleton mirroring the descriptor shape
//!
//! Unique node names come from a counter owned by one [`Flattener`], so two
//! stores compiled separately get independent name sequences.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::descriptor::{Attribute, Descriptor, Directive, Handler};
use super::errors::{SchemaError, SchemaResult};
use super::meta::{
    AggregateDecl, ComputedDecl, ExternalAggregateDecl, Hook, JoinCardinality, JoinDecl, Metadata,
};
use super::node::{AttributeDef, NodeKind, NodeMap, ObjectNode};
use super::tokenizer::{split_join_marker, HookKind, Keyword, Token, Tokenizer};
use super::types::{ScalarType, ValidationRule};
use crate::aggregates::AggregateOp;
use crate::observability::{Logger, Severity};

/// Output of one flattening pass
#[derive(Debug, Clone)]
pub struct Flattened {
    pub root: String,
    pub nodes: NodeMap,
    pub virtual_nodes: NodeMap,
    pub meta: Metadata,
    pub default_value: Value,
    /// Dotted attribute path to onValidate hook
    pub on_validate: IndexMap<String, Hook>,
    /// Dotted attribute path to onTransform hook
    pub on_transform: IndexMap<String, Hook>,
}

/// Position of the attribute being visited
#[derive(Debug, Clone)]
struct Frame {
    node: String,
    /// Dotted path of the node from the root, empty at the root
    path: String,
    /// Column key prefix (`dishes[]`, `address`)
    column: String,
    /// Node owning the primary keys declared here
    key_owner: String,
    /// Dotted prefix from the key owner down to this node
    key_prefix: String,
    depth: usize,
}

impl Frame {
    fn attribute_path(&self, name: &str) -> String {
        join_path(&self.path, name)
    }

    fn column_key(&self, name: &str) -> String {
        if self.column.is_empty() {
            name.to_string()
        } else {
            format!("{}[{}]", self.column, name)
        }
    }
}

enum Link<'d> {
    Aggregate {
        op: AggregateOp,
        path: String,
        transformer: Option<&'d Handler>,
    },
    Join {
        store: String,
        path: Option<String>,
    },
}

/// Tokens of one tuple, sorted by concern
#[derive(Default)]
struct Leaf<'d> {
    rules: Vec<ValidationRule>,
    scalar_type: Option<ScalarType>,
    nesting: Option<NodeKind>,
    nested: Option<&'d Descriptor>,
    column: Option<(String, bool)>,
    default: Option<Value>,
    hooks: Vec<(HookKind, Hook)>,
    links: Vec<Link<'d>>,
    computed: Option<&'d Handler>,
    reference: Option<String>,
}

pub struct Flattener<'a> {
    store: &'a str,
    root_name: &'a str,
    logger: &'a dyn Logger,
    counter: usize,
    nodes: NodeMap,
    virtual_nodes: NodeMap,
    meta: Metadata,
    /// Key columns with the array depth of their owner
    mandatory: Vec<(usize, String)>,
    on_validate: IndexMap<String, Hook>,
    on_transform: IndexMap<String, Hook>,
}

impl<'a> Flattener<'a> {
    pub fn new(store: &'a str, root_name: &'a str, logger: &'a dyn Logger) -> Self {
        Self {
            store,
            root_name,
            logger,
            counter: 0,
            nodes: NodeMap::new(),
            virtual_nodes: NodeMap::new(),
            meta: Metadata::new(store),
            mandatory: Vec::new(),
            on_validate: IndexMap::new(),
            on_transform: IndexMap::new(),
        }
    }

    /// Flattens `descriptor`, consuming the flattener.
    pub fn flatten(mut self, descriptor: &Descriptor) -> SchemaResult<Flattened> {
        let root = self.allocate_name(self.root_name);
        self.nodes.insert(root.clone(), ObjectNode::root(root.clone()));

        let frame = Frame {
            node: root.clone(),
            path: String::new(),
            column: String::new(),
            key_owner: root.clone(),
            key_prefix: String::new(),
            depth: 0,
        };
        let default_value = self.visit(descriptor, &frame)?;

        self.mandatory.sort_by_key(|(depth, _)| *depth);
        self.meta.sort_mandatory = self.mandatory.drain(..).map(|(_, column)| column).collect();

        Ok(Flattened {
            root,
            nodes: self.nodes,
            virtual_nodes: self.virtual_nodes,
            meta: self.meta,
            default_value,
            on_validate: self.on_validate,
            on_transform: self.on_transform,
        })
    }

    fn allocate_name(&mut self, base: &str) -> String {
        loop {
            let name = format!("{}{}", base, self.counter);
            self.counter += 1;
            if !self.nodes.contains_key(&name) && !self.virtual_nodes.contains_key(&name) {
                return name;
            }
        }
    }

    fn config_error(&self, attribute: &str, rule: impl Into<String>) -> SchemaError {
        SchemaError::configuration(self.store, attribute, rule)
    }

    fn visit(&mut self, descriptor: &Descriptor, frame: &Frame) -> SchemaResult<Value> {
        let mut skeleton = Map::new();
        for (name, attribute) in descriptor.attributes() {
            let path = frame.attribute_path(name);
            let directives = match attribute {
                Attribute::Tuple(directives) => directives,
                Attribute::Bare(token) => {
                    return Err(self.config_error(
                        &path,
                        format!("expected a directive tuple, found bare string '{}'", token),
                    ))
                }
                Attribute::Malformed(kind) => {
                    return Err(self.config_error(
                        &path,
                        format!("expected a directive tuple, found {}", kind),
                    ))
                }
            };
            let leaf = self.read_tuple(directives, &path)?;
            let value = if leaf.nesting.is_some() || leaf.nested.is_some() {
                self.visit_nested(name, leaf, frame)?
            } else {
                self.visit_scalar(name, leaf, frame)?
            };
            skeleton.insert(name.to_string(), value);
        }
        Ok(Value::Object(skeleton))
    }

    fn read_tuple<'d>(&self, directives: &'d [Directive], path: &str) -> SchemaResult<Leaf<'d>> {
        let mut leaf = Leaf::default();
        for token in Tokenizer::new(directives) {
            let token = token.map_err(|rule| self.config_error(path, rule))?;
            match token {
                Token::Type(scalar) => {
                    leaf.scalar_type.get_or_insert(scalar);
                    leaf.rules.push(ValidationRule::Type(scalar));
                }
                Token::Conversion(conversion) => leaf.rules.push(ValidationRule::Conversion(conversion)),
                Token::Keyword(Keyword::Optional) => leaf.rules.push(ValidationRule::Optional),
                Token::Keyword(Keyword::Array) => leaf.nesting = Some(NodeKind::Array),
                Token::Keyword(Keyword::Object) => leaf.nesting = Some(NodeKind::Object),
                Token::Bound { max: false, value } => leaf.rules.push(ValidationRule::Min(value)),
                Token::Bound { max: true, value } => leaf.rules.push(ValidationRule::Max(value)),
                Token::Column { name, primary } => {
                    if leaf.column.is_some() {
                        return Err(self.config_error(path, "more than one column annotation"));
                    }
                    leaf.column = Some((name, primary));
                }
                Token::Aggregate { op, path, transformer } => {
                    leaf.links.push(Link::Aggregate { op, path, transformer })
                }
                Token::Join { store, path } => leaf.links.push(Link::Join { store, path }),
                Token::Reference { store } => {
                    if leaf.reference.is_some() {
                        return Err(self.config_error(path, "more than one 'ref'"));
                    }
                    leaf.reference = Some(store);
                }
                Token::Hook { kind, hook } => leaf.hooks.push((kind, hook)),
                Token::Handler(handler) => {
                    if leaf.computed.is_some() {
                        return Err(self.config_error(path, "more than one computed handler"));
                    }
                    leaf.computed = Some(handler);
                }
                Token::Literal(value) => {
                    leaf.default.get_or_insert(value);
                }
                Token::Nested(descriptor) => {
                    if leaf.nested.is_some() {
                        return Err(self.config_error(path, "more than one nested descriptor"));
                    }
                    leaf.nested = Some(descriptor);
                }
            }
        }
        Ok(leaf)
    }

    fn register_hooks(&mut self, path: &str, hooks: Vec<(HookKind, Hook)>) {
        for (kind, hook) in hooks {
            match kind {
                HookKind::Validate => self.on_validate.insert(path.to_string(), hook),
                HookKind::Transform => self.on_transform.insert(path.to_string(), hook),
            };
        }
    }

    fn register_reference(&mut self, path: &str, store: String) -> SchemaResult<()> {
        if store == self.store {
            return Err(self.config_error(path, format!("'ref @{}' references its own store", store)));
        }
        if let Some((existing, _)) = self.meta.references.iter().find(|(_, s)| **s == store) {
            return Err(self.config_error(
                path,
                format!("store '{}' is already referenced by '{}'", store, existing),
            ));
        }
        self.meta.references.insert(path.to_string(), store);
        Ok(())
    }

    fn node_mut(&mut self, name: &str) -> &mut ObjectNode {
        match self.nodes.get_mut(name) {
            Some(node) => node,
            None => unreachable!("node '{}' allocated before use", name),
        }
    }

    fn visit_nested(&mut self, name: &str, leaf: Leaf<'_>, frame: &Frame) -> SchemaResult<Value> {
        let path = frame.attribute_path(name);
        let kind = match leaf.nesting {
            Some(kind) => kind,
            None => {
                return Err(self.config_error(
                    &path,
                    "nested descriptor requires 'array' or 'object'",
                ))
            }
        };
        if leaf.column.is_some() {
            return Err(self.config_error(&path, "column annotation on a nested attribute"));
        }

        let mut join_store = None;
        for link in &leaf.links {
            match link {
                Link::Join { store, path: None } if join_store.is_none() => join_store = Some(store.clone()),
                Link::Join { store, path: None } => {
                    return Err(self.config_error(&path, format!("second join marker '@{}'", store)))
                }
                Link::Join { store, path: Some(source) } => {
                    return Err(self.config_error(
                        &path,
                        format!("join marker '@{}.{}' needs an aggregate", store, source),
                    ))
                }
                Link::Aggregate { op, .. } => {
                    return Err(self.config_error(
                        &path,
                        format!("aggregate '{}' must target a scalar attribute", op),
                    ))
                }
            }
        }
        if leaf.computed.is_some() {
            return Err(self.config_error(&path, "computed handler on a nested attribute"));
        }
        self.register_hooks(&path, leaf.hooks);

        let parent = self.nodes[&frame.node].clone();
        let mut attr = AttributeDef::new(name);
        attr.rules = leaf.rules;

        let value = match leaf.nested {
            Some(descriptor) => {
                let child_name = self.allocate_name(name);
                let mut child = ObjectNode::child_of(&parent, child_name.clone(), name, kind);
                child.joined_store = join_store.clone();
                self.nodes.insert(child_name.clone(), child);

                let child_frame = match kind {
                    NodeKind::Array => Frame {
                        node: child_name.clone(),
                        path: path.clone(),
                        column: format!("{}[]", frame.column_key(name)),
                        key_owner: child_name.clone(),
                        key_prefix: String::new(),
                        depth: frame.depth + 1,
                    },
                    NodeKind::Object => Frame {
                        node: child_name.clone(),
                        path: path.clone(),
                        column: frame.column_key(name),
                        key_owner: frame.key_owner.clone(),
                        key_prefix: format!("{}{}.", frame.key_prefix, name),
                        depth: frame.depth,
                    },
                };
                let skeleton = self.visit(descriptor, &child_frame)?;

                if kind == NodeKind::Array {
                    if self.nodes[&child_name].primary_key_attributes.is_empty() {
                        return Err(self.config_error(
                            &path,
                            "array requires at least one primary key column '<<name>>'",
                        ));
                    }
                    self.node_mut(&frame.node).child_array_names.push(child_name.clone());
                }
                attr.child = Some(child_name);
                match kind {
                    NodeKind::Array => Value::Array(vec![skeleton]),
                    NodeKind::Object => skeleton,
                }
            }
            None => {
                if join_store.is_none() {
                    return Err(self.config_error(
                        &path,
                        "nested attribute needs a sub-descriptor or a join marker",
                    ));
                }
                let child_name = self.allocate_name(name);
                let mut child = ObjectNode::child_of(&parent, child_name.clone(), name, kind);
                child.is_virtual = true;
                child.joined_store = join_store.clone();
                self.virtual_nodes.insert(child_name.clone(), child);
                attr.child = Some(child_name);
                attr.derived = true;
                match kind {
                    NodeKind::Array => Value::Array(Vec::new()),
                    NodeKind::Object => Value::Null,
                }
            }
        };

        if let Some(store) = join_store {
            let cardinality = match kind {
                NodeKind::Array => JoinCardinality::Many,
                NodeKind::Object => JoinCardinality::One,
            };
            self.meta.joins.entry(store.clone()).or_default().push(JoinDecl {
                store,
                path: path.clone(),
                cardinality,
            });
        }
        if let Some(store) = leaf.reference {
            self.register_reference(&path, store)?;
        }
        self.node_mut(&frame.node).declared_attributes.push(attr);
        Ok(value)
    }

    fn visit_scalar(&mut self, name: &str, leaf: Leaf<'_>, frame: &Frame) -> SchemaResult<Value> {
        let path = frame.attribute_path(name);
        let mut attr = AttributeDef::new(name);
        attr.scalar_type = leaf.scalar_type;
        attr.rules = leaf.rules;

        if let Some(conversion) = attr.conversion() {
            self.node_mut(&frame.node).transform_map.insert(name.to_string(), conversion);
        }

        if let Some((column, primary)) = leaf.column {
            let key = frame.column_key(name);
            self.meta.json_to_sql.insert(key, column.clone());
            self.meta.sort_group.insert(column.clone(), frame.depth);
            if primary {
                let key_path = format!("{}{}", frame.key_prefix, name);
                if self.is_root(&frame.key_owner) {
                    self.meta.primary_key.push(key_path.clone());
                }
                self.mandatory.push((frame.depth, column.clone()));
                self.node_mut(&frame.key_owner).primary_key_attributes.push(key_path);
            }
            attr.column = Some(column);
        }

        if let Some(handler) = leaf.computed {
            self.meta.computeds.push(ComputedDecl {
                path: path.clone(),
                handler: handler.clone(),
            });
            attr.derived = true;
        }

        if !leaf.links.is_empty() {
            self.link_aggregates(&path, leaf.links)?;
            attr.derived = true;
        }
        if let Some(store) = leaf.reference {
            self.register_reference(&path, store)?;
        }
        self.register_hooks(&path, leaf.hooks);

        self.node_mut(&frame.node).declared_attributes.push(attr);
        Ok(leaf.default.unwrap_or(Value::Null))
    }

    fn is_root(&self, node: &str) -> bool {
        self.nodes.get_index_of(node) == Some(0)
    }

    /// Registers the aggregates of one target in declaration order.
    ///
    /// A plain `@store` after an aggregate promotes it to an external
    /// aggregate fed by `store`; a later promotion of the same target
    /// replaces the earlier one.
    fn link_aggregates(&mut self, target: &str, links: Vec<Link<'_>>) -> SchemaResult<()> {
        let parent_path = match target.rsplit_once('.') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        let mut latest: Option<(AggregateOp, Option<String>, Option<Handler>)> = None;

        for link in links {
            match link {
                Link::Aggregate { op, path, transformer } => {
                    if let Some(marker) = path.strip_prefix('@') {
                        let (store, source) =
                            split_join_marker(marker).map_err(|rule| self.config_error(target, rule))?;
                        let transformer = transformer.cloned();
                        latest = Some((op, source.clone(), transformer.clone()));
                        self.promote(ExternalAggregateDecl {
                            target: target.to_string(),
                            op,
                            store,
                            source_attribute: source,
                            transformer,
                        });
                    } else {
                        let source = join_path(&parent_path, &path);
                        let last = path.rsplit('.').next().map(str::to_string);
                        latest = Some((op, last, transformer.cloned()));
                        self.remove_external(target);
                        if !self.meta.aggregates.contains_key(target) {
                            self.meta.aggregates_sort.push(target.to_string());
                        }
                        self.meta.aggregates.insert(
                            target.to_string(),
                            AggregateDecl {
                                target: target.to_string(),
                                op,
                                source,
                                transformer: transformer.cloned(),
                            },
                        );
                    }
                }
                Link::Join { store, path: None } => {
                    let (op, source, transformer) = latest.clone().ok_or_else(|| {
                        self.config_error(
                            target,
                            format!("join marker '@{}' on a scalar attribute needs an aggregate", store),
                        )
                    })?;
                    self.promote(ExternalAggregateDecl {
                        target: target.to_string(),
                        op,
                        store,
                        source_attribute: source,
                        transformer,
                    });
                }
                Link::Join { store, path: Some(source) } => {
                    return Err(self.config_error(
                        target,
                        format!("join marker '@{}.{}' needs an aggregate", store, source),
                    ))
                }
            }
        }
        Ok(())
    }

    fn remove_external(&mut self, target: &str) -> Option<ExternalAggregateDecl> {
        let mut removed = None;
        for (store, decls) in self.meta.external_aggregates.iter_mut() {
            if let Some(position) = decls.iter().position(|decl| decl.target == target) {
                removed = Some(decls.remove(position));
                if let Some(joins) = self.meta.joins.get_mut(store) {
                    joins.retain(|join| !(join.cardinality == JoinCardinality::Aggregate && join.path == target));
                }
                break;
            }
        }
        self.meta.external_aggregates.retain(|_, decls| !decls.is_empty());
        self.meta.joins.retain(|_, joins| !joins.is_empty());
        removed
    }

    fn promote(&mut self, decl: ExternalAggregateDecl) {
        let target = decl.target.clone();
        self.meta.aggregates.shift_remove(&target);
        self.meta.aggregates_sort.retain(|t| *t != target);

        if let Some(previous) = self.remove_external(&target) {
            self.logger.event(
                Severity::Warn,
                "AGGREGATE_PROMOTION_REPLACED",
                &[
                    ("store", self.store),
                    ("target", target.as_str()),
                    ("previous", previous.store.as_str()),
                    ("current", decl.store.as_str()),
                ],
            );
        }

        self.meta.joins.entry(decl.store.clone()).or_default().push(JoinDecl {
            store: decl.store.clone(),
            path: target,
            cardinality: JoinCardinality::Aggregate,
        });
        self.meta
            .external_aggregates
            .entry(decl.store.clone())
            .or_default()
            .push(decl);
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Flattens `descriptor` for `store` with default naming.
pub fn flatten(descriptor: &Descriptor, store: &str, logger: &dyn Logger) -> SchemaResult<Flattened> {
    Flattener::new(store, "main", logger).flatten(descriptor)
}

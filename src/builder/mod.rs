//! Declarative statement builder
//!
//! Scripts arrive as trees of tagged [`ConfigNode`]s, format-agnostic and
//! built programmatically by whatever loads the configuration. A
//! [`StatementBuilder`] walks such a tree, resolving every tag through an
//! explicit [`TagRegistry`] of factory closures into the statement and
//! expression objects of [`crate::script`]. Nothing executes here; the
//! builder's only product is the object tree.
//!
//! Unknown tags fall through to a chain of [`CustomTagProcessor`]s, layered
//! with [`StatementBuilder::with_processor`]: the most recently added
//! processor is consulted first, so an embedding application can override
//! standard tags it does not register and extend the dialect without
//! touching the registry.
//!
//! ```
//! use dray::builder::{ConfigNode, StatementBuilder};
//! use dray::context::Context;
//! use dray::ExecContext;
//!
//! let script = ConfigNode::new("block")
//!     .with_child(
//!         ConfigNode::new("set-var")
//!             .with_attr("name", "greeting")
//!             .with_child(ConfigNode::new("template").with_text("hello")),
//!     );
//! let stmt = StatementBuilder::standard().build_statement(&script)?;
//!
//! let mut ctx = ExecContext::new("demo");
//! ctx.exec(stmt.as_ref())?;
//! assert_eq!(ctx.get_var("greeting")?.as_deref(), Some("hello"));
//! # Ok::<(), dray::EngineError>(())
//! ```

mod tags;

use crate::context::SharedObject;
use crate::result::{EngineError, Result};
use crate::script::expr::Const;
use crate::script::{SharedBool, SharedExpr, SharedStatement};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// One node of a declarative script tree: a tag, string attributes,
/// optional text, and child nodes.
#[derive(Debug, Clone, Default)]
pub struct ConfigNode {
    tag: String,
    attrs: HashMap<String, String>,
    text: Option<String>,
    children: Vec<ConfigNode>,
}

impl ConfigNode {
    /// Creates an empty node with the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        ConfigNode {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Adds a string attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Sets the node text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Appends a child node.
    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    /// The tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// An attribute by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// The node text, if set.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Child nodes in document order.
    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// The first child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.tag == tag)
    }
}

/// What a tag resolved to.
#[derive(Clone)]
pub enum BuiltValue {
    /// A runnable statement.
    Statement(SharedStatement),
    /// A text expression.
    Expr(SharedExpr),
    /// A boolean expression.
    Bool(SharedBool),
    /// A primitive value; `None` for an explicit null.
    Text(Option<String>),
    /// A list of resolved children.
    List(Vec<BuiltValue>),
    /// A map of resolved children keyed by their `key` attribute.
    Map(HashMap<String, BuiltValue>),
    /// A raw configuration sub-tree passed through verbatim.
    Node(ConfigNode),
    /// A shared object fetched from a stock repository.
    Object(SharedObject),
}

impl std::fmt::Debug for BuiltValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuiltValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            BuiltValue::List(items) => f.debug_tuple("List").field(items).finish(),
            BuiltValue::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            BuiltValue::Node(node) => f.debug_tuple("Node").field(node).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

impl BuiltValue {
    fn kind_name(&self) -> &'static str {
        match self {
            BuiltValue::Statement(_) => "statement",
            BuiltValue::Expr(_) => "expression",
            BuiltValue::Bool(_) => "boolean expression",
            BuiltValue::Text(_) => "text",
            BuiltValue::List(_) => "list",
            BuiltValue::Map(_) => "map",
            BuiltValue::Node(_) => "config node",
            BuiltValue::Object(_) => "stock object",
        }
    }

    fn mismatch(&self, wanted: &str) -> EngineError {
        EngineError::Format(format!("Expected {} but got {}", wanted, self.kind_name()))
    }

    /// The contained statement.
    pub fn into_statement(self) -> Result<SharedStatement> {
        match self {
            BuiltValue::Statement(s) => Ok(s),
            other => Err(other.mismatch("statement")),
        }
    }

    /// The contained expression; a primitive becomes a constant.
    pub fn into_expr(self) -> Result<SharedExpr> {
        match self {
            BuiltValue::Expr(e) => Ok(e),
            BuiltValue::Text(t) => Ok(Rc::new(Const::new(t))),
            other => Err(other.mismatch("expression")),
        }
    }

    /// The contained boolean expression.
    pub fn into_bool(self) -> Result<SharedBool> {
        match self {
            BuiltValue::Bool(b) => Ok(b),
            other => Err(other.mismatch("boolean expression")),
        }
    }

    /// The contained primitive text.
    pub fn into_text(self) -> Result<Option<String>> {
        match self {
            BuiltValue::Text(t) => Ok(t),
            other => Err(other.mismatch("text")),
        }
    }
}

/// Positional arguments for a constructor factory: the node's children,
/// already resolved, in document order.
pub struct Args {
    items: VecDeque<BuiltValue>,
}

impl Args {
    fn new(items: Vec<BuiltValue>) -> Self {
        Args {
            items: items.into(),
        }
    }

    fn next(&mut self, what: &str) -> Result<BuiltValue> {
        self.items
            .pop_front()
            .ok_or_else(|| EngineError::Format(format!("Missing argument: {}", what)))
    }

    /// Next argument as a statement.
    pub fn statement(&mut self, what: &str) -> Result<SharedStatement> {
        self.next(what)?.into_statement()
    }

    /// Next argument as a text expression.
    pub fn expr(&mut self, what: &str) -> Result<SharedExpr> {
        self.next(what)?.into_expr()
    }

    /// Next argument as a boolean expression.
    pub fn bool_expr(&mut self, what: &str) -> Result<SharedBool> {
        self.next(what)?.into_bool()
    }

    /// Next argument as a statement, or `None` when exhausted.
    pub fn opt_statement(&mut self) -> Result<Option<SharedStatement>> {
        match self.items.pop_front() {
            None => Ok(None),
            Some(v) => Ok(Some(v.into_statement()?)),
        }
    }

    /// Drains the remaining arguments as statements.
    pub fn statements(&mut self) -> Result<Vec<SharedStatement>> {
        self.items.drain(..).map(BuiltValue::into_statement).collect()
    }

    /// Drains the remaining arguments untyped.
    pub fn take_all(&mut self) -> Vec<BuiltValue> {
        self.items.drain(..).collect()
    }

    /// Arguments not consumed yet.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when every argument has been consumed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Constructor factory: the node itself plus its resolved children.
///
/// The node is passed along so factories can read attributes and, where
/// order alone is not enough, correlate arguments with the corresponding
/// child nodes.
pub type Factory = Rc<dyn Fn(&ConfigNode, Args) -> Result<BuiltValue>>;

enum TagKind {
    Constructor(Factory),
    Primitive,
    List,
    Map,
    Node,
    Stock,
}

/// Immutable tag dispatch table.
///
/// [`TagRegistry::standard`] covers every statement and expression of the
/// script model; an embedding application can start from an empty registry
/// instead and register its own dialect.
pub struct TagRegistry {
    tags: HashMap<String, TagKind>,
}

impl TagRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        TagRegistry {
            tags: HashMap::new(),
        }
    }

    /// The standard dialect.
    pub fn standard() -> Self {
        tags::standard()
    }

    /// Registers a constructor tag.
    pub fn constructor(
        &mut self,
        tag: &str,
        factory: impl Fn(&ConfigNode, Args) -> Result<BuiltValue> + 'static,
    ) {
        self.tags
            .insert(tag.to_string(), TagKind::Constructor(Rc::new(factory)));
    }

    /// Registers a primitive tag: the value is the node text, or null
    /// when the node carries `null="yes"`.
    pub fn primitive(&mut self, tag: &str) {
        self.tags.insert(tag.to_string(), TagKind::Primitive);
    }

    /// Registers a list tag: children resolve into a value list.
    pub fn list(&mut self, tag: &str) {
        self.tags.insert(tag.to_string(), TagKind::List);
    }

    /// Registers a map tag: children are keyed by their `key` attribute,
    /// each value coming from the child's first child.
    pub fn map(&mut self, tag: &str) {
        self.tags.insert(tag.to_string(), TagKind::Map);
    }

    /// Registers a pass-through tag: the raw node is the value.
    pub fn node(&mut self, tag: &str) {
        self.tags.insert(tag.to_string(), TagKind::Node);
    }

    /// Registers a stock tag: the value comes from the configured
    /// repository, addressed by the `rep` and `obje` attributes.
    pub fn stock(&mut self, tag: &str) {
        self.tags.insert(tag.to_string(), TagKind::Stock);
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of shared objects for `stock` tags.
pub trait StockRepository {
    /// Fetches the object `name` from the repository `rep`.
    fn stock_object(&self, rep: &str, name: &str) -> Result<SharedObject>;
}

/// Handler for tags the registry does not know.
pub trait CustomTagProcessor {
    /// Resolves `node`, or returns `Ok(None)` to pass it along the chain.
    fn process(&self, builder: &StatementBuilder, node: &ConfigNode) -> Result<Option<BuiltValue>>;
}

struct ProcessorLink {
    processor: Rc<dyn CustomTagProcessor>,
    parent: Option<Rc<ProcessorLink>>,
}

/// Walks [`ConfigNode`] trees and produces script objects.
///
/// Builders are cheap to clone; [`with_processor`](Self::with_processor)
/// layers a handler onto a clone instead of mutating the original, so a
/// nested scope can extend the dialect without affecting its caller.
#[derive(Clone)]
pub struct StatementBuilder {
    registry: Rc<TagRegistry>,
    processors: Option<Rc<ProcessorLink>>,
    stock: Option<Rc<dyn StockRepository>>,
}

impl StatementBuilder {
    /// A builder over the given registry.
    pub fn new(registry: TagRegistry) -> Self {
        StatementBuilder {
            registry: Rc::new(registry),
            processors: None,
            stock: None,
        }
    }

    /// A builder over the standard dialect.
    pub fn standard() -> Self {
        Self::new(TagRegistry::standard())
    }

    /// Attaches the repository consulted by `stock` tags.
    pub fn with_stock(mut self, stock: Rc<dyn StockRepository>) -> Self {
        self.stock = Some(stock);
        self
    }

    /// A copy of this builder with `processor` layered in front of the
    /// existing chain.
    pub fn with_processor(&self, processor: Rc<dyn CustomTagProcessor>) -> Self {
        let mut layered = self.clone();
        layered.processors = Some(Rc::new(ProcessorLink {
            processor,
            parent: self.processors.clone(),
        }));
        layered
    }

    /// Resolves a tree into whatever its root tag produces.
    pub fn build(&self, node: &ConfigNode) -> Result<BuiltValue> {
        self.build_at(node, node.tag())
    }

    /// Resolves a tree and insists on a statement.
    pub fn build_statement(&self, node: &ConfigNode) -> Result<SharedStatement> {
        self.build(node)?.into_statement()
    }

    /// Resolves a tree and insists on a text expression.
    pub fn build_expr(&self, node: &ConfigNode) -> Result<SharedExpr> {
        self.build(node)?.into_expr()
    }

    fn build_at(&self, node: &ConfigNode, path: &str) -> Result<BuiltValue> {
        match self.registry.tags.get(node.tag()) {
            Some(TagKind::Constructor(factory)) => {
                let args = self.build_children(node, path)?;
                factory(node, Args::new(args)).map_err(|e| EngineError::TagConstructor {
                    tag: node.tag().to_string(),
                    source: Box::new(e),
                })
            }
            Some(TagKind::Primitive) => Ok(BuiltValue::Text(primitive_text(node))),
            Some(TagKind::List) => Ok(BuiltValue::List(self.build_children(node, path)?)),
            Some(TagKind::Map) => {
                let mut map = HashMap::new();
                for child in node.children() {
                    let key = child.attr("key").ok_or_else(|| {
                        EngineError::Format(format!(
                            "Map entry '{}/{}' has no 'key' attribute",
                            path,
                            child.tag()
                        ))
                    })?;
                    let value = child.children().first().ok_or_else(|| {
                        EngineError::Format(format!(
                            "Map entry '{}/{}' has no value node",
                            path,
                            child.tag()
                        ))
                    })?;
                    let child_path = format!("{}/{}", path, value.tag());
                    map.insert(key.to_string(), self.build_at(value, &child_path)?);
                }
                Ok(BuiltValue::Map(map))
            }
            Some(TagKind::Node) => Ok(BuiltValue::Node(node.clone())),
            Some(TagKind::Stock) => {
                let stock = self.stock.as_ref().ok_or(EngineError::NoRepositories)?;
                let rep = req_attr(node, "rep")?;
                let name = req_attr(node, "obje")?;
                Ok(BuiltValue::Object(stock.stock_object(rep, name)?))
            }
            None => {
                let mut link = self.processors.as_ref();
                while let Some(l) = link {
                    if let Some(value) = l.processor.process(self, node)? {
                        return Ok(value);
                    }
                    link = l.parent.as_ref();
                }
                Err(EngineError::UnknownTag(path.to_string()))
            }
        }
    }

    fn build_children(&self, node: &ConfigNode, path: &str) -> Result<Vec<BuiltValue>> {
        node.children()
            .iter()
            .map(|child| {
                let child_path = format!("{}/{}", path, child.tag());
                self.build_at(child, &child_path)
            })
            .collect()
    }
}

fn primitive_text(node: &ConfigNode) -> Option<String> {
    if node.attr("null") == Some("yes") {
        None
    } else {
        Some(node.text().unwrap_or("").to_string())
    }
}

pub(crate) fn req_attr<'a>(node: &'a ConfigNode, name: &str) -> Result<&'a str> {
    node.attr(name).ok_or_else(|| {
        EngineError::Format(format!(
            "Tag '{}' requires attribute '{}'",
            node.tag(),
            name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ExecContext};
    use crate::result::EngineError;
    use std::any::Any;

    fn set_var_node(name: &str, value: &str) -> ConfigNode {
        ConfigNode::new("set-var")
            .with_attr("name", name)
            .with_child(ConfigNode::new("template").with_text(value))
    }

    #[test]
    fn test_builds_and_runs_a_script() {
        let tree = ConfigNode::new("block")
            .with_child(set_var_node("a", "1"))
            .with_child(set_var_node("b", "[%a%]+1"));
        let stmt = StatementBuilder::standard().build_statement(&tree).unwrap();
        let mut ctx = ExecContext::new("b");
        ctx.exec(stmt.as_ref()).unwrap();
        assert_eq!(ctx.get_var("b").unwrap().as_deref(), Some("1+1"));
    }

    #[test]
    fn test_primitive_tag_honors_the_null_marker() {
        let builder = StatementBuilder::standard();
        let value = builder
            .build(&ConfigNode::new("text").with_text("plain"))
            .unwrap();
        assert_eq!(value.into_text().unwrap().as_deref(), Some("plain"));
        let value = builder
            .build(&ConfigNode::new("text").with_attr("null", "yes"))
            .unwrap();
        assert_eq!(value.into_text().unwrap(), None);
    }

    #[test]
    fn test_list_and_map_kinds() {
        let mut registry = TagRegistry::standard();
        registry.list("columns");
        registry.map("lookup");
        let builder = StatementBuilder::new(registry);

        let listed = builder
            .build(
                &ConfigNode::new("columns")
                    .with_child(ConfigNode::new("text").with_text("id"))
                    .with_child(ConfigNode::new("text").with_text("name")),
            )
            .unwrap();
        let BuiltValue::List(items) = listed else {
            panic!("expected a list");
        };
        assert_eq!(items.len(), 2);

        let mapped = builder
            .build(
                &ConfigNode::new("lookup").with_child(
                    ConfigNode::new("entry")
                        .with_attr("key", "dev")
                        .with_child(ConfigNode::new("text").with_text("srv1")),
                ),
            )
            .unwrap();
        let BuiltValue::Map(entries) = mapped else {
            panic!("expected a map");
        };
        assert_eq!(
            entries["dev"].clone().into_text().unwrap().as_deref(),
            Some("srv1")
        );
    }

    #[test]
    fn test_node_kind_passes_the_subtree_through() {
        let mut registry = TagRegistry::new();
        registry.node("raw");
        let builder = StatementBuilder::new(registry);
        let tree = ConfigNode::new("raw").with_child(ConfigNode::new("anything"));
        let BuiltValue::Node(node) = builder.build(&tree).unwrap() else {
            panic!("expected a node");
        };
        assert!(node.child("anything").is_some());
    }

    #[test]
    fn test_unknown_tag_reports_the_path() {
        let tree = ConfigNode::new("block").with_child(ConfigNode::new("frob"));
        let err = StatementBuilder::standard().build(&tree).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot generate statement for tag 'block/frob'"
        );
    }

    #[test]
    fn test_constructor_failure_wraps_the_tag() {
        let tree = ConfigNode::new("set-var")
            .with_child(ConfigNode::new("template").with_text("x"));
        let err = StatementBuilder::standard().build(&tree).unwrap_err();
        assert_eq!(err.to_string(), "Error creating statement for tag: set-var");
        assert!(err
            .root_message()
            .contains("requires attribute 'name'"));
    }

    struct UpperTag;
    impl CustomTagProcessor for UpperTag {
        fn process(
            &self,
            _builder: &StatementBuilder,
            node: &ConfigNode,
        ) -> Result<Option<BuiltValue>> {
            if node.tag() == "upper" {
                let text = node.text().unwrap_or("").to_uppercase();
                Ok(Some(BuiltValue::Text(Some(text))))
            } else {
                Ok(None)
            }
        }
    }

    struct QuietUpperTag;
    impl CustomTagProcessor for QuietUpperTag {
        fn process(
            &self,
            _builder: &StatementBuilder,
            node: &ConfigNode,
        ) -> Result<Option<BuiltValue>> {
            if node.tag() == "upper" {
                Ok(Some(BuiltValue::Text(Some("quiet".to_string()))))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_custom_processor_resolves_unknown_tags() {
        let builder = StatementBuilder::standard().with_processor(Rc::new(UpperTag));
        let value = builder
            .build(&ConfigNode::new("upper").with_text("abc"))
            .unwrap();
        assert_eq!(value.into_text().unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn test_latest_processor_wins() {
        let builder = StatementBuilder::standard()
            .with_processor(Rc::new(UpperTag))
            .with_processor(Rc::new(QuietUpperTag));
        let value = builder
            .build(&ConfigNode::new("upper").with_text("abc"))
            .unwrap();
        assert_eq!(value.into_text().unwrap().as_deref(), Some("quiet"));
    }

    #[test]
    fn test_layering_does_not_leak_into_the_original() {
        let base = StatementBuilder::standard();
        let _layered = base.with_processor(Rc::new(UpperTag));
        let err = base.build(&ConfigNode::new("upper")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTag(_)));
    }

    struct OneObjectRepo;
    impl StockRepository for OneObjectRepo {
        fn stock_object(&self, rep: &str, name: &str) -> Result<SharedObject> {
            assert_eq!(rep, "shared");
            assert_eq!(name, "limits");
            Ok(Rc::new("42".to_string()) as Rc<dyn Any>)
        }
    }

    #[test]
    fn test_stock_tag_without_repository() {
        let tree = ConfigNode::new("stock")
            .with_attr("rep", "shared")
            .with_attr("obje", "limits");
        let err = StatementBuilder::standard().build(&tree).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to get a stock object while repositories is null"
        );
    }

    #[test]
    fn test_stock_tag_fetches_from_the_repository() {
        let tree = ConfigNode::new("stock")
            .with_attr("rep", "shared")
            .with_attr("obje", "limits");
        let builder = StatementBuilder::standard().with_stock(Rc::new(OneObjectRepo));
        let BuiltValue::Object(obj) = builder.build(&tree).unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(obj.downcast_ref::<String>().map(String::as_str), Some("42"));
    }
}

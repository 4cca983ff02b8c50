//! Loop scaffolding and the program evaluator
//!
//! Compilers append fragments to a [`LoopScaffold`]: one level per array
//! path, each with ordered pre-loop, per-element and post-loop buckets.
//! Levels are shared, so every fragment touching `carts.items` runs in the
//! same pass over that array.
//!
//! [`LoopScaffold::synthesize`] freezes the scaffold into a [`Program`].
//! For each element the program runs nested loops first, then the element's
//! body, so per-element fragments see values derived from deeper levels.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use super::path::LoopSpec;

/// One step from the record down to a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'p> {
    Key(&'p str),
    Index(usize),
}

/// Position of the running program inside a record
#[derive(Debug, Default)]
pub struct Cursor<'p> {
    steps: Vec<Step<'p>>,
    /// Step count before each entered loop
    marks: Vec<usize>,
}

fn walk<'v>(value: &'v Value, steps: &[Step<'_>]) -> Option<&'v Value> {
    steps.iter().try_fold(value, |value, step| match step {
        Step::Key(key) => value.get(*key),
        Step::Index(index) => value.get(*index),
    })
}

fn walk_mut<'v>(value: &'v mut Value, steps: &[Step<'_>]) -> Option<&'v mut Value> {
    steps.iter().try_fold(value, |value, step| match step {
        Step::Key(key) => value.get_mut(*key),
        Step::Index(index) => value.get_mut(*index),
    })
}

fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

impl<'p> Cursor<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of loops entered
    pub fn depth(&self) -> usize {
        self.marks.len()
    }

    /// Index of the element at loop `depth` (1-based)
    pub fn index(&self, depth: usize) -> Option<usize> {
        let end = self.base(depth);
        match self.steps[..end].last() {
            Some(Step::Index(index)) if depth > 0 => Some(*index),
            _ => None,
        }
    }

    pub fn enter(&mut self, access: &'p [String], index: usize) {
        self.marks.push(self.steps.len());
        self.steps.extend(access.iter().map(|key| Step::Key(key.as_str())));
        self.steps.push(Step::Index(index));
    }

    pub fn leave(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.steps.truncate(mark);
        }
    }

    /// Step count locating the current element of loop `depth`
    fn base(&self, depth: usize) -> usize {
        self.marks.get(depth).copied().unwrap_or(self.steps.len())
    }

    /// Reads `rel` below the current element.
    pub fn get<'v>(&self, record: &'v Value, rel: &[String]) -> Option<&'v Value> {
        self.get_at(record, self.depth(), rel)
    }

    /// Reads `rel` below the element of the enclosing loop `depth`.
    pub fn get_at<'v>(&self, record: &'v Value, depth: usize, rel: &[String]) -> Option<&'v Value> {
        let element = walk(record, &self.steps[..self.base(depth)])?;
        rel.iter().try_fold(element, |value, key| value.get(key.as_str()))
    }

    pub fn get_mut<'v>(&self, record: &'v mut Value, rel: &[String]) -> Option<&'v mut Value> {
        let element = walk_mut(record, &self.steps)?;
        rel.iter().try_fold(element, |value, key| value.get_mut(key.as_str()))
    }

    /// Returns the slot at `rel` below the element of loop `depth`,
    /// inserting a null final key when its parent object exists. An empty
    /// `rel` is the element itself.
    pub fn slot_mut_at<'v>(&self, record: &'v mut Value, depth: usize, rel: &[String]) -> Option<&'v mut Value> {
        let element = walk_mut(record, &self.steps[..self.base(depth)])?;
        let (last, parents) = match rel.split_last() {
            Some(split) => split,
            None => return Some(element),
        };
        let parent = parents
            .iter()
            .try_fold(element, |value, key| value.get_mut(key.as_str()))?;
        let object: &mut Map<String, Value> = parent.as_object_mut()?;
        Some(object.entry(last.clone()).or_insert(Value::Null))
    }

    /// Writes `value` at `rel` below the element of loop `depth`.
    pub fn set_at(&self, record: &mut Value, depth: usize, rel: &[String], value: Value) -> bool {
        match self.slot_mut_at(record, depth, rel) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// JSON pointer of `rel` below the element of loop `depth`
    pub fn pointer_at(&self, depth: usize, rel: &[String]) -> String {
        let mut pointer = String::new();
        for step in &self.steps[..self.base(depth)] {
            pointer.push('/');
            match step {
                Step::Key(key) => pointer.push_str(&escape_pointer(key)),
                Step::Index(index) => pointer.push_str(&index.to_string()),
            }
        }
        for key in rel {
            pointer.push('/');
            pointer.push_str(&escape_pointer(key));
        }
        pointer
    }
}

/// State threaded through one program run
pub trait Scope {
    fn record(&self) -> &Value;

    /// Stops iteration once true
    fn settled(&self) -> bool {
        false
    }
}

struct Labeled<F> {
    label: String,
    fragment: F,
}

/// One level of the scaffold (the root or one array loop)
pub struct LoopLevel<F> {
    spec: Option<LoopSpec>,
    pre: Vec<Labeled<F>>,
    body: Vec<Labeled<F>>,
    post: Vec<Labeled<F>>,
    children: Vec<LoopLevel<F>>,
}

impl<F> LoopLevel<F> {
    fn new(spec: Option<LoopSpec>) -> Self {
        Self {
            spec,
            pre: Vec::new(),
            body: Vec::new(),
            post: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Appends a fragment run before the loop, at the enclosing element.
    pub fn pre(&mut self, label: impl Into<String>, fragment: F) -> &mut Self {
        self.pre.push(Labeled {
            label: label.into(),
            fragment,
        });
        self
    }

    /// Appends a fragment run for every element.
    pub fn body(&mut self, label: impl Into<String>, fragment: F) -> &mut Self {
        self.body.push(Labeled {
            label: label.into(),
            fragment,
        });
        self
    }

    /// Appends a fragment run after the loop, at the enclosing element.
    pub fn post(&mut self, label: impl Into<String>, fragment: F) -> &mut Self {
        self.post.push(Labeled {
            label: label.into(),
            fragment,
        });
        self
    }

    fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.body.is_empty() && self.post.is_empty() && self.children.is_empty()
    }

    fn prune(&mut self) {
        for child in &mut self.children {
            child.prune();
        }
        self.children.retain(|child| !child.is_empty());
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let inner = match &self.spec {
            Some(spec) => {
                let _ = writeln!(out, "{}for {} in .{}:", pad, spec.key, spec.access.join("."));
                indent + 1
            }
            None => indent,
        };
        let inner_pad = "  ".repeat(inner);
        for (bucket, fragments) in [("pre", &self.pre), ("body", &self.body), ("post", &self.post)] {
            for fragment in fragments {
                let _ = writeln!(out, "{}{}: {}", inner_pad, bucket, fragment.label);
            }
        }
        for child in &self.children {
            child.render(out, inner);
        }
    }
}

/// Error raised when a scaffold cannot become a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub cause: String,
    pub plan: String,
}

/// Mutable tree of loop levels, built per compiled procedure
pub struct LoopScaffold<F> {
    name: String,
    root: LoopLevel<F>,
    conflicts: Vec<String>,
}

impl<F> LoopScaffold<F> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: LoopLevel::new(None),
            conflicts: Vec::new(),
        }
    }

    /// Returns the level reached through `loops`, creating missing levels.
    /// An empty slice is the root level.
    pub fn level(&mut self, loops: &[LoopSpec]) -> &mut LoopLevel<F> {
        let mut current = &mut self.root;
        for spec in loops {
            let position = match current
                .children
                .iter()
                .position(|child| child.spec.as_ref().map(|s| &s.key) == Some(&spec.key))
            {
                Some(position) => {
                    if current.children[position].spec.as_ref() != Some(spec) {
                        self.conflicts
                            .push(format!("loop '{}' reached through different accesses", spec.key));
                    }
                    position
                }
                None => {
                    current.children.push(LoopLevel::new(Some(spec.clone())));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[position];
        }
        current
    }

    /// Renders the plan of the procedure.
    pub fn render(&self) -> String {
        let mut out = format!("procedure {}:\n", self.name);
        self.root.render(&mut out, 1);
        out
    }

    /// Freezes the scaffold, dropping levels without fragments.
    pub fn synthesize(mut self) -> Result<Program<F>, BuildFailure> {
        let plan = self.render();
        if let Some(conflict) = self.conflicts.first() {
            return Err(BuildFailure {
                cause: conflict.clone(),
                plan,
            });
        }
        if let Some(key) = find_empty_access(&self.root) {
            return Err(BuildFailure {
                cause: format!("loop '{}' has no access path", key),
                plan,
            });
        }
        self.root.prune();
        let plan = self.render();
        Ok(Program {
            name: self.name,
            root: self.root,
            plan,
        })
    }
}

fn find_empty_access<F>(level: &LoopLevel<F>) -> Option<String> {
    level.children.iter().find_map(|child| match &child.spec {
        Some(spec) if spec.access.is_empty() => Some(spec.key.clone()),
        _ => find_empty_access(child),
    })
}

/// A synthesized procedure
pub struct Program<F> {
    name: String,
    root: LoopLevel<F>,
    plan: String,
}

impl<F> Program<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rendered plan
    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Runs the program over `scope.record()`.
    pub fn run<C>(&self, scope: &mut C)
    where
        C: Scope,
        F: Fn(&mut C, &Cursor<'_>),
    {
        let mut cursor = Cursor::new();
        let root = &self.root;
        run_fragments(&root.pre, scope, &cursor);
        for child in &root.children {
            run_loop(child, scope, &mut cursor);
        }
        run_fragments(&root.body, scope, &cursor);
        run_fragments(&root.post, scope, &cursor);
    }
}

impl<F> std::fmt::Debug for Program<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program").field("name", &self.name).field("plan", &self.plan).finish()
    }
}

fn run_fragments<C, F>(fragments: &[Labeled<F>], scope: &mut C, cursor: &Cursor<'_>)
where
    C: Scope,
    F: Fn(&mut C, &Cursor<'_>),
{
    for labeled in fragments {
        if scope.settled() {
            return;
        }
        (labeled.fragment)(scope, cursor);
    }
}

fn run_loop<'p, C, F>(level: &'p LoopLevel<F>, scope: &mut C, cursor: &mut Cursor<'p>)
where
    C: Scope,
    F: Fn(&mut C, &Cursor<'_>),
{
    let spec = match &level.spec {
        Some(spec) => spec,
        None => return,
    };
    run_fragments(&level.pre, scope, cursor);

    let mut index = 0;
    loop {
        if scope.settled() {
            break;
        }
        let len = cursor
            .get(scope.record(), &spec.access)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if index >= len {
            break;
        }
        cursor.enter(&spec.access, index);
        for child in &level.children {
            run_loop(child, scope, cursor);
        }
        run_fragments(&level.body, scope, cursor);
        cursor.leave();
        index += 1;
    }

    run_fragments(&level.post, scope, cursor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Collect<'r> {
        record: &'r Value,
        seen: Vec<String>,
        limit: usize,
    }

    impl Scope for Collect<'_> {
        fn record(&self) -> &Value {
            self.record
        }

        fn settled(&self) -> bool {
            self.seen.len() >= self.limit
        }
    }

    type Fragment = Box<dyn for<'r, 'c> Fn(&mut Collect<'r>, &Cursor<'c>)>;

    fn spec(key: &str, access: &[&str]) -> LoopSpec {
        LoopSpec {
            key: key.into(),
            access: access.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn record() -> Value {
        json!({
            "carts": [
                { "items": [{ "sku": "a" }, { "sku": "b" }] },
                { "items": [] },
                { "items": [{ "sku": "c" }] }
            ]
        })
    }

    fn fragment<F>(f: F) -> Fragment
    where
        F: for<'r, 'c> Fn(&mut Collect<'r>, &Cursor<'c>) + 'static,
    {
        Box::new(f)
    }

    fn emit(text: &'static str) -> Fragment {
        fragment(move |scope, _| scope.seen.push(text.to_string()))
    }

    #[test]
    fn test_levels_are_shared_and_ordered() {
        let carts = spec("carts1", &["carts"]);
        let items = spec("items2", &["items"]);
        let mut scaffold: LoopScaffold<Fragment> = LoopScaffold::new("test");
        scaffold.level(&[carts.clone(), items.clone()]).body(
            "sku",
            fragment(|scope, cursor| {
                let sku = cursor.get(scope.record, &["sku".to_string()]).cloned();
                scope.seen.push(sku.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default());
            }),
        );
        scaffold.level(&[carts.clone(), items]).pre("items-pre", emit("["));
        scaffold.level(&[carts]).body("cart", emit("cart"));
        scaffold.level(&[]).post("done", emit("done"));

        let program = scaffold.synthesize().unwrap();
        let record = record();
        let mut scope = Collect {
            record: &record,
            seen: Vec::new(),
            limit: usize::MAX,
        };
        program.run(&mut scope);
        assert_eq!(
            scope.seen,
            vec!["[", "a", "b", "cart", "[", "cart", "[", "c", "cart", "done"]
        );
    }

    #[test]
    fn test_settled_stops_iteration() {
        let mut scaffold: LoopScaffold<Fragment> = LoopScaffold::new("test");
        scaffold
            .level(&[spec("carts1", &["carts"])])
            .body("cart", emit("cart"));
        let program = scaffold.synthesize().unwrap();
        let record = record();
        let mut scope = Collect {
            record: &record,
            seen: Vec::new(),
            limit: 1,
        };
        program.run(&mut scope);
        assert_eq!(scope.seen.len(), 1);
    }

    #[test]
    fn test_conflicting_access_fails() {
        let mut scaffold: LoopScaffold<Fragment> = LoopScaffold::new("broken");
        scaffold.level(&[spec("carts1", &["carts"])]).body("a", emit("a"));
        scaffold.level(&[spec("carts1", &["baskets"])]).body("b", emit("b"));
        let failure = scaffold.synthesize().unwrap_err();
        assert!(failure.cause.contains("carts1"));
        assert!(failure.plan.starts_with("procedure broken:"));
    }

    #[test]
    fn test_empty_levels_are_pruned() {
        let mut scaffold: LoopScaffold<Fragment> = LoopScaffold::new("test");
        scaffold.level(&[spec("carts1", &["carts"]), spec("items2", &["items"])]);
        scaffold.level(&[]).body("root", emit("root"));
        let program = scaffold.synthesize().unwrap();
        assert!(!program.plan().contains("for "));
    }

    #[test]
    fn test_cursor_pointer_and_writes() {
        let access = vec!["carts".to_string()];
        let mut record = record();
        let mut cursor = Cursor::new();
        cursor.enter(&access, 2);

        assert_eq!(cursor.pointer_at(1, &["total".to_string()]), "/carts/2/total");
        assert_eq!(cursor.pointer_at(0, &["total".to_string()]), "/total");
        assert_eq!(cursor.index(1), Some(2));
        assert!(cursor.set_at(&mut record, 1, &["total".to_string()], json!(3)));
        assert_eq!(record["carts"][2]["total"], json!(3));
        assert!(!cursor.set_at(&mut record, 1, &["missing".to_string(), "x".to_string()], json!(1)));
        cursor.leave();
        assert_eq!(cursor.depth(), 0);
    }
}

//! Filter compiler
//!
//! A filter compares a caller-supplied value against one local attribute.
//! Attributes nested in arrays match existentially: the predicate holds as
//! soon as one element matches.
//!
//! Comparisons do not coerce: numbers compare with numbers, strings with
//! strings, and a null or missing attribute never matches.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CompileContext;
use crate::schema::SchemaResult;
use crate::synth::{Cursor, LoopScaffold, Program, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "ILIKE")]
    ILike,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::ILike => "ILIKE",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A filter as declared by the collection runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDeclaration {
    /// Store the compared value comes from
    pub source: String,
    pub source_attribute: String,
    /// Dotted path of the filtered attribute
    pub local_attribute: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub is_required: bool,
}

/// Case-insensitive pattern matching behind `ILIKE`
pub trait IlikeMatcher: Send + Sync {
    fn matches(&self, value: &str, pattern: &str) -> bool;
}

/// SQL `LIKE` semantics: `%` matches any run, `_` one character.
///
/// Each distinct pattern is compiled once and kept for later calls.
#[derive(Debug, Default)]
pub struct LikeMatcher {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl LikeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct patterns compiled so far
    pub fn compiled_count(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Option<Regex>>> {
        match self.compiled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn like_regex(pattern: &str) -> Option<Regex> {
    let mut expression = String::with_capacity(pattern.len() + 2);
    expression.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

impl IlikeMatcher for LikeMatcher {
    fn matches(&self, value: &str, pattern: &str) -> bool {
        let mut cache = self.cache();
        let regex = cache
            .entry(pattern.to_string())
            .or_insert_with(|| like_regex(pattern));
        regex.as_ref().map_or(false, |regex| regex.is_match(value))
    }
}

pub struct FilterScope<'r> {
    record: &'r Value,
    value: &'r Value,
    matcher: &'r dyn IlikeMatcher,
    found: bool,
}

impl Scope for FilterScope<'_> {
    fn record(&self) -> &Value {
        self.record
    }

    fn settled(&self) -> bool {
        self.found
    }
}

type FilterFragment = Box<dyn for<'r, 'c> Fn(&mut FilterScope<'r>, &Cursor<'c>) + Send + Sync>;

fn fragment<F>(f: F) -> FilterFragment
where
    F: for<'r, 'c> Fn(&mut FilterScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

/// Compiled filter predicate
#[derive(Debug)]
pub struct FilterFn {
    declaration: FilterDeclaration,
    operator: FilterOperator,
    existential: bool,
    program: Program<FilterFragment>,
}

impl FilterFn {
    pub(crate) fn compile(ctx: &CompileContext<'_>, declaration: &FilterDeclaration) -> SchemaResult<Self> {
        let path = &declaration.local_attribute;
        let resolved = ctx
            .resolve_strict(path)
            .map_err(|unresolved| ctx.config_error(path, unresolved.to_string()))?;
        if !resolved.is_scalar() {
            return Err(ctx.config_error(path, "filters compare scalar attributes only"));
        }

        let operator = if declaration.is_required {
            FilterOperator::Eq
        } else {
            declaration.operator
        };
        if operator == FilterOperator::ILike && !resolved.scalar_type().map_or(false, |t| t.is_textual()) {
            let declared = resolved.scalar_type().map_or("untyped", |t| t.type_name());
            return Err(ctx.config_error(
                path,
                format!("ILIKE requires a string attribute, found {}", declared),
            ));
        }

        let leaf = resolved.leaf.clone();
        let mut scaffold = LoopScaffold::new(format!("{}.filter({})", ctx.store, path));
        scaffold.level(&resolved.loops).body(
            format!("test {} {} value", resolved.expression(), operator),
            fragment(move |scope, cursor| {
                if let Some(actual) = cursor.get(scope.record, &leaf) {
                    if matches_value(operator, actual, scope.value, scope.matcher) {
                        scope.found = true;
                    }
                }
            }),
        );
        let program = scaffold
            .synthesize()
            .map_err(|failure| ctx.build_error("filter", failure))?;

        Ok(Self {
            declaration: declaration.clone(),
            operator,
            existential: resolved.depth() > 0,
            program,
        })
    }

    pub fn declaration(&self) -> &FilterDeclaration {
        &self.declaration
    }

    /// Operator actually applied (required filters compare for equality)
    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    /// Whether the attribute sits inside an array
    pub fn is_existential(&self) -> bool {
        self.existential
    }

    /// Tests `record` against `value`. A list value matches when any of its
    /// elements does.
    pub fn test(&self, record: &Value, value: &Value, matcher: &dyn IlikeMatcher) -> bool {
        let mut scope = FilterScope {
            record,
            value,
            matcher,
            found: false,
        };
        self.program.run(&mut scope);
        scope.found
    }
}

fn matches_value(operator: FilterOperator, actual: &Value, expected: &Value, matcher: &dyn IlikeMatcher) -> bool {
    match expected {
        Value::Array(candidates) => candidates
            .iter()
            .any(|candidate| compare(operator, actual, candidate, matcher)),
        _ => compare(operator, actual, expected, matcher),
    }
}

fn compare(operator: FilterOperator, actual: &Value, expected: &Value, matcher: &dyn IlikeMatcher) -> bool {
    if actual.is_null() {
        return false;
    }
    match operator {
        FilterOperator::Eq => eq_match(actual, expected),
        FilterOperator::Gt => ordering(actual, expected).map_or(false, |o| o.is_gt()),
        FilterOperator::Gte => ordering(actual, expected).map_or(false, |o| o.is_ge()),
        FilterOperator::Lt => ordering(actual, expected).map_or(false, |o| o.is_lt()),
        FilterOperator::Lte => ordering(actual, expected).map_or(false, |o| o.is_le()),
        FilterOperator::ILike => match (actual, expected) {
            (Value::String(value), Value::String(pattern)) => matcher.matches(value, pattern),
            _ => false,
        },
    }
}

/// Equality without coercion; `1` and `1.0` are equal numbers
fn eq_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => actual == expected,
    }
}

fn ordering(actual: &Value, bound: &Value) -> Option<std::cmp::Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(ai), Some(bi)) = (a.as_i64(), b.as_i64()) {
                return Some(ai.cmp(&bi));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{analyze, CompiledBundle};
    use crate::schema::{Descriptor, SchemaErrorCode};
    use serde_json::json;

    fn shop() -> CompiledBundle {
        analyze(
            &Descriptor::from_json(&json!({
                "id": ["int", "<<id>>"],
                "name": ["string"],
                "rating": ["number"],
                "tags": ["array", { "id": ["int", "<<tagId>>"], "label": ["string"] }]
            }))
            .unwrap(),
            "shop",
        )
        .unwrap()
    }

    fn declaration(local: &str, operator: FilterOperator, required: bool) -> FilterDeclaration {
        FilterDeclaration {
            source: "search".into(),
            source_attribute: "q".into(),
            local_attribute: local.into(),
            operator,
            is_required: required,
        }
    }

    #[test]
    fn test_required_filter_compiles_to_equality() {
        let filter = shop()
            .filter(&declaration("rating", FilterOperator::Gt, true))
            .unwrap();
        assert_eq!(filter.operator(), FilterOperator::Eq);
        let record = json!({ "id": 1, "rating": 4 });
        assert!(filter.test(&record, &json!(4), &LikeMatcher::new()));
        assert!(!filter.test(&record, &json!(3), &LikeMatcher::new()));
    }

    #[test]
    fn test_direct_comparisons() {
        let bundle = shop();
        let record = json!({ "id": 1, "rating": 4.5, "name": "Corner Deli" });

        let gt = bundle.filter(&declaration("rating", FilterOperator::Gt, false)).unwrap();
        assert!(!gt.is_existential());
        assert!(gt.test(&record, &json!(4), &LikeMatcher::new()));
        assert!(!gt.test(&record, &json!(4.5), &LikeMatcher::new()));
        assert!(!gt.test(&record, &json!("4"), &LikeMatcher::new()));

        let lte = bundle.filter(&declaration("rating", FilterOperator::Lte, false)).unwrap();
        assert!(lte.test(&record, &json!(4.5), &LikeMatcher::new()));

        let like = bundle.filter(&declaration("name", FilterOperator::ILike, false)).unwrap();
        assert!(like.test(&record, &json!("%deli"), &LikeMatcher::new()));
        assert!(like.test(&record, &json!("corner_deli"), &LikeMatcher::new()));
        assert!(!like.test(&record, &json!("deli"), &LikeMatcher::new()));
    }

    #[test]
    fn test_existential_match_in_array() {
        let filter = shop()
            .filter(&declaration("tags.label", FilterOperator::Eq, false))
            .unwrap();
        assert!(filter.is_existential());

        let record = json!({ "id": 1, "tags": [{ "id": 1, "label": "vegan" }, { "id": 2, "label": "halal" }] });
        assert!(filter.test(&record, &json!("halal"), &LikeMatcher::new()));
        assert!(!filter.test(&record, &json!("kosher"), &LikeMatcher::new()));
        assert!(filter.test(&record, &json!(["kosher", "vegan"]), &LikeMatcher::new()));
        assert!(!filter.test(&json!({ "id": 2, "tags": [] }), &json!("vegan"), &LikeMatcher::new()));
    }

    #[test]
    fn test_like_patterns_compile_once() {
        let matcher = LikeMatcher::new();
        let filter = shop()
            .filter(&declaration("tags.label", FilterOperator::ILike, false))
            .unwrap();
        let record = json!({ "id": 1, "tags": [{ "id": 1, "label": "A.B (x" }, { "id": 2, "label": "vegan" }] });

        assert!(filter.test(&record, &json!("a.b (%"), &matcher));
        assert!(!filter.test(&record, &json!("axb (%"), &matcher));
        assert!(filter.test(&record, &json!("VEG%"), &matcher));
        assert!(filter.test(&record, &json!("a.b (%"), &matcher));
        assert_eq!(matcher.compiled_count(), 3);
    }

    #[test]
    fn test_ilike_rejected_on_numbers() {
        let err = shop()
            .filter(&declaration("rating", FilterOperator::ILike, false))
            .unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::Configuration);
        assert!(err.to_string().contains("ILIKE"));
    }

    #[test]
    fn test_unresolved_filter_path_fails() {
        assert!(shop().filter(&declaration("missing", FilterOperator::Eq, false)).is_err());
        assert!(shop().filter(&declaration("tags", FilterOperator::Eq, false)).is_err());
    }

    #[test]
    fn test_declaration_from_json() {
        let declaration: FilterDeclaration = serde_json::from_value(json!({
            "source": "search",
            "sourceAttribute": "q",
            "localAttribute": "name",
            "operator": "ILIKE"
        }))
        .unwrap();
        assert_eq!(declaration.operator, FilterOperator::ILike);
        assert!(!declaration.is_required);
    }
}

//! Directive tuple tokenizer
//!
//! Classifies each tuple element into a tagged [`Token`]. Keywords taking an
//! operand (`min`, `max`, `onValidate`, `onTransform`, `ref`, aggregate
//! kinds) consume it here, so the flattener never reasons about positions.

use serde_json::Value;

use super::descriptor::{Descriptor, Directive, Handler};
use super::meta::Hook;
use super::types::{Conversion, ScalarType};
use crate::aggregates::AggregateOp;

/// Operand-free keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    Array,
    Object,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    Validate,
    Transform,
}

#[derive(Debug)]
pub(crate) enum Token<'d> {
    Type(ScalarType),
    Conversion(Conversion),
    Keyword(Keyword),
    Bound {
        max: bool,
        value: Value,
    },
    Aggregate {
        op: AggregateOp,
        path: String,
        transformer: Option<&'d Handler>,
    },
    Column {
        name: String,
        primary: bool,
    },
    Join {
        store: String,
        path: Option<String>,
    },
    Reference {
        store: String,
    },
    Hook {
        kind: HookKind,
        hook: Hook,
    },
    /// A handler not consumed by any keyword
    Handler(&'d Handler),
    Literal(Value),
    Nested(&'d Descriptor),
}

pub(crate) struct Tokenizer<'d> {
    directives: &'d [Directive],
    position: usize,
}

impl<'d> Tokenizer<'d> {
    pub(crate) fn new(directives: &'d [Directive]) -> Self {
        Self {
            directives,
            position: 0,
        }
    }

    fn take(&mut self) -> Option<&'d Directive> {
        let directive = self.directives.get(self.position)?;
        self.position += 1;
        Some(directive)
    }

    fn peek(&self) -> Option<&'d Directive> {
        self.directives.get(self.position)
    }

    fn classify(&mut self, token: &'d str) -> Result<Token<'d>, String> {
        match token {
            "array" => return Ok(Token::Keyword(Keyword::Array)),
            "object" => return Ok(Token::Keyword(Keyword::Object)),
            "optional" => return Ok(Token::Keyword(Keyword::Optional)),
            "onValidate" => return self.hook(HookKind::Validate, token),
            "onTransform" => return self.hook(HookKind::Transform, token),
            "ref" => return self.reference(),
            "min" | "max" => return self.bound_or_aggregate(token),
            _ => {}
        }

        if let Some(op) = AggregateOp::parse(token) {
            return self.aggregate(op);
        }
        if let Some(name) = delimited(token, "<<", ">>") {
            return Ok(Token::Column {
                name: name.to_string(),
                primary: true,
            });
        }
        if let Some(name) = delimited(token, "<", ">") {
            return Ok(Token::Column {
                name: name.to_string(),
                primary: false,
            });
        }
        if let Some(marker) = token.strip_prefix('@') {
            let (store, path) = split_join_marker(marker)?;
            return Ok(Token::Join { store, path });
        }
        if let Some(scalar) = ScalarType::parse(token) {
            return Ok(Token::Type(scalar));
        }
        if let Some(conversion) = Conversion::parse(token) {
            return Ok(Token::Conversion(conversion));
        }
        Ok(Token::Literal(Value::String(token.to_string())))
    }

    fn hook(&mut self, kind: HookKind, keyword: &str) -> Result<Token<'d>, String> {
        let hook = match self.take() {
            Some(Directive::Handler(handler)) => Hook::Handler(handler.clone()),
            Some(Directive::Literal(value)) => Hook::Literal(value.clone()),
            Some(Directive::Token(token)) => Hook::Literal(Value::String(token.clone())),
            Some(Directive::Nested(_)) | None => {
                return Err(format!("'{}' must be followed by a handler or a literal", keyword))
            }
        };
        Ok(Token::Hook { kind, hook })
    }

    fn reference(&mut self) -> Result<Token<'d>, String> {
        match self.take() {
            Some(Directive::Token(token)) => match token.strip_prefix('@') {
                Some(store) if !store.is_empty() && !store.contains('.') => Ok(Token::Reference {
                    store: store.to_string(),
                }),
                _ => Err(format!("'ref' must be followed by '@store', found '{}'", token)),
            },
            _ => Err("'ref' must be followed by '@store'".into()),
        }
    }

    fn bound_or_aggregate(&mut self, keyword: &str) -> Result<Token<'d>, String> {
        let max = keyword == "max";
        match self.peek() {
            Some(Directive::Token(operand)) if operand.trim().parse::<f64>().is_err() => {
                let op = if max { AggregateOp::Max } else { AggregateOp::Min };
                self.aggregate(op)
            }
            Some(Directive::Token(operand)) => {
                self.position += 1;
                let value = operand
                    .trim()
                    .parse::<f64>()
                    .map(crate::schema::types::number_value)
                    .unwrap_or(Value::Null);
                Ok(Token::Bound { max, value })
            }
            Some(Directive::Literal(value)) => {
                self.position += 1;
                Ok(Token::Bound {
                    max,
                    value: value.clone(),
                })
            }
            _ => Err(format!("'{}' must be followed by a bound or a source path", keyword)),
        }
    }

    fn aggregate(&mut self, op: AggregateOp) -> Result<Token<'d>, String> {
        let path = match self.take() {
            Some(Directive::Token(path)) if !path.is_empty() => path.clone(),
            _ => return Err(format!("aggregate '{}' must be followed by a source path", op)),
        };
        let transformer = match self.peek() {
            Some(Directive::Handler(handler)) => {
                self.position += 1;
                Some(handler)
            }
            _ => None,
        };
        Ok(Token::Aggregate {
            op,
            path,
            transformer,
        })
    }
}

impl<'d> Iterator for Tokenizer<'d> {
    type Item = Result<Token<'d>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let directive = self.take()?;
        Some(match directive {
            Directive::Token(token) => self.classify(token),
            Directive::Literal(value) => Ok(Token::Literal(value.clone())),
            Directive::Handler(handler) => Ok(Token::Handler(handler)),
            Directive::Nested(descriptor) => Ok(Token::Nested(descriptor)),
        })
    }
}

fn delimited<'t>(token: &'t str, open: &str, close: &str) -> Option<&'t str> {
    let inner = token.strip_prefix(open)?.strip_suffix(close)?;
    if inner.is_empty() || inner.contains('<') || inner.contains('>') {
        return None;
    }
    Some(inner)
}

/// Splits `orders.amount` into `("orders", Some("amount"))`.
pub(crate) fn split_join_marker(marker: &str) -> Result<(String, Option<String>), String> {
    let (store, path) = match marker.split_once('.') {
        Some((store, path)) => (store, Some(path.to_string())),
        None => (marker, None),
    };
    if store.is_empty() || path.as_deref() == Some("") {
        return Err(format!("malformed join marker '@{}'", marker));
    }
    Ok((store.to_string(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(directives: Vec<Directive>) -> Vec<Token<'static>> {
        let leaked: &'static [Directive] = Box::leak(directives.into_boxed_slice());
        Tokenizer::new(leaked).collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_columns_and_types() {
        let result = tokens(vec!["int".into(), "<<idMenu>>".into(), "<label>".into()]);
        assert!(matches!(result[0], Token::Type(ScalarType::Int)));
        assert!(matches!(&result[1], Token::Column { name, primary: true } if name == "idMenu"));
        assert!(matches!(&result[2], Token::Column { name, primary: false } if name == "label"));
    }

    #[test]
    fn test_bounds_consume_their_operand() {
        let result = tokens(vec!["int".into(), "min".into(), 2_i64.into(), "max".into(), "10".into(), 7_i64.into()]);
        assert_eq!(result.len(), 4);
        assert!(matches!(&result[1], Token::Bound { max: false, value } if *value == json!(2)));
        assert!(matches!(&result[2], Token::Bound { max: true, value } if *value == json!(10)));
        assert!(matches!(&result[3], Token::Literal(value) if *value == json!(7)));
    }

    #[test]
    fn test_min_with_path_is_an_aggregate() {
        let result = tokens(vec!["number".into(), "min".into(), "items.price".into()]);
        assert!(matches!(
            &result[1],
            Token::Aggregate { op: AggregateOp::Min, path, transformer: None } if path == "items.price"
        ));
    }

    #[test]
    fn test_aggregate_takes_optional_transformer() {
        let result = tokens(vec![
            "sum".into(),
            "@orders.amount".into(),
            Directive::handler(|v, _| Ok(v.clone())),
            Directive::handler(|v, _| Ok(v.clone())),
        ]);
        assert_eq!(result.len(), 2);
        assert!(matches!(&result[0], Token::Aggregate { transformer: Some(_), .. }));
        // the second handler is free
        assert!(matches!(result[1], Token::Handler(_)));
    }

    #[test]
    fn test_join_and_reference() {
        let result = tokens(vec!["@orders.amount".into(), "ref".into(), "@category".into()]);
        assert!(matches!(&result[0], Token::Join { store, path: Some(p) } if store == "orders" && p == "amount"));
        assert!(matches!(&result[1], Token::Reference { store } if store == "category"));
    }

    #[test]
    fn test_reference_without_store_fails() {
        let directives = vec![Directive::from("ref"), Directive::from("category")];
        let result: Result<Vec<_>, _> = Tokenizer::new(&directives).collect();
        assert!(result.unwrap_err().contains("@store"));
    }

    #[test]
    fn test_unknown_string_is_literal() {
        let result = tokens(vec!["string".into(), "hello".into()]);
        assert!(matches!(&result[1], Token::Literal(Value::String(s)) if s == "hello"));
    }

    #[test]
    fn test_hooks_take_handlers_or_literals() {
        let result = tokens(vec![
            "onValidate".into(),
            Directive::handler(|v, _| Ok(v.clone())),
            "onTransform".into(),
            json!(3).into(),
        ]);
        assert!(matches!(&result[0], Token::Hook { kind: HookKind::Validate, hook: Hook::Handler(_) }));
        assert!(matches!(&result[1], Token::Hook { kind: HookKind::Transform, hook: Hook::Literal(_) }));
    }

    #[test]
    fn test_split_join_marker() {
        assert_eq!(split_join_marker("orders").unwrap(), ("orders".to_string(), None));
        assert!(split_join_marker("orders.").is_err());
        assert!(split_join_marker(".amount").is_err());
    }
}

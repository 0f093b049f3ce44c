//! The context tree that templates evaluate against.
//!
//! Each entity exposes itself through [`ContextObject`], a property bag with
//! case-insensitive lookup, and a [`Context`] is the root mapping of names
//! (`contact`, `run`, `results`, ...) visible to templates.

use std::collections::HashMap;

use crate::values::Value;

/// A read-only view of an entity for expression lookup.
pub trait ContextObject {
    /// The property names this object exposes.
    fn properties(&self) -> Vec<&'static str>;

    /// Resolves a single property, case-insensitively. Returns `None` when
    /// the property doesn't exist.
    fn get(&self, key: &str) -> Option<Value>;

    /// The value this object renders as when referenced without a property.
    fn default_value(&self) -> Value {
        let map: HashMap<String, Value> = self
            .properties()
            .into_iter()
            .filter_map(|p| self.get(p).map(|v| (p.to_string(), v)))
            .collect();
        Value::Object(map)
    }
}

/// The root of the lookup tree for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            entries: HashMap::new(),
        }
    }

    pub fn put(&mut self, name: &str, value: Value) {
        self.entries.insert(name.to_lowercase(), value);
    }

    pub fn put_object(&mut self, name: &str, object: &dyn ContextObject) {
        self.put(name, object.default_value());
    }

    /// Resolves a dotted path against the root. A missing name at any depth
    /// produces an error value that renders as an empty string.
    pub fn resolve(&self, path: &[&str]) -> Value {
        let Some((first, rest)) = path.split_first() else {
            return Value::Nil;
        };

        let mut current = match self.entries.get(&first.to_lowercase()) {
            Some(v) => v.clone(),
            None => return Value::error(format!("unable to resolve '{}'", first)),
        };

        for segment in rest {
            if current.is_error() {
                return current;
            }
            current = match current.property(segment) {
                Some(v) => v,
                None => return Value::error(format!("unable to resolve '{}'", segment)),
            };
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing;

    impl ContextObject for Thing {
        fn properties(&self) -> Vec<&'static str> {
            vec!["name", "size"]
        }

        fn get(&self, key: &str) -> Option<Value> {
            match key.to_lowercase().as_str() {
                "name" => Some(Value::text("widget")),
                "size" => Some(Value::Number(3.0)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_resolve_path() {
        let mut ctx = Context::new();
        ctx.put_object("thing", &Thing);

        assert_eq!(ctx.resolve(&["thing", "name"]), Value::text("widget"));
        assert_eq!(ctx.resolve(&["THING", "Size"]), Value::Number(3.0));

        let missing = ctx.resolve(&["thing", "weight"]);
        assert!(missing.is_error());
        assert_eq!(missing.to_repr(), "unable to resolve 'weight'");

        let missing_root = ctx.resolve(&["bogus"]);
        assert!(missing_root.is_error());
        assert_eq!(missing_root.to_repr(), "unable to resolve 'bogus'");
    }
}

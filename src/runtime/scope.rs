/// Data scope for path resolution and templating
///
/// A run's scope carries the origin, the request context, the output store
/// (node id -> produced value) and an overlay of loose variables used by
/// fan-out items and composed templates. Secrets are attached only for
/// header compilation.
///
/// Dotted paths resolve their first segment in this order:
/// overlay variables, `origin`, `context`, `outputs`, `secrets`, then bare
/// context keys.

use crate::runtime::path;
use crate::workflow::types::Origin;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, Default)]
pub struct Scope {
    origin: Option<Origin>,
    context: Map<String, Value>,
    outputs: Map<String, Value>,
    vars: Map<String, Value>,
    secrets: Option<Arc<BTreeMap<String, String>>>,
}

impl Scope {
    pub fn new(origin: Option<Origin>, context: Map<String, Value>) -> Self {
        Self { origin, context, ..Default::default() }
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    /// Store a node's output (append-only during a run)
    pub fn set_output(&mut self, node_id: &str, value: Value) {
        self.outputs.insert(node_id.to_string(), value);
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    /// Set one overlay variable in place
    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Copy of this scope with extra overlay variables
    pub fn with_vars(&self, vars: Map<String, Value>) -> Scope {
        let mut scope = self.clone();
        scope.vars.extend(vars);
        scope
    }

    /// Copy of this scope that can also see `secrets.*`
    pub fn with_secrets(&self, secrets: Arc<BTreeMap<String, String>>) -> Scope {
        let mut scope = self.clone();
        scope.secrets = Some(secrets);
        scope
    }

    /// Resolve an expression; non-strings pass through unchanged
    pub fn resolve(&self, expr: &Value) -> Option<Value> {
        match expr {
            Value::String(path) => self.resolve_path(path),
            literal => Some(literal.clone()),
        }
    }

    /// Resolve a dotted or JSON-path expression
    pub fn resolve_path(&self, expr: &str) -> Option<Value> {
        let expr = expr.trim();
        if path::is_json_path(expr) {
            return path::select(&self.to_value(), expr);
        }

        let (head, rest) = match expr.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (expr, None),
        };

        let origin;
        let secrets;
        let root: &Value = if let Some(var) = self.vars.get(head) {
            var
        } else {
            match head {
                "origin" => {
                    origin = self.origin.map(origin_value)?;
                    &origin
                }
                "context" => return walk_map(&self.context, rest),
                "outputs" => return walk_map(&self.outputs, rest),
                "secrets" if self.secrets.is_some() => {
                    secrets = json!(self.secrets.as_deref());
                    &secrets
                }
                _ => self.context.get(head)?,
            }
        };

        match rest {
            Some(rest) => rest.split('.').try_fold(root, path::step).cloned(),
            None => Some(root.clone()),
        }
    }

    /// Materialize the scope as one JSON object (for JSON-path queries)
    pub fn to_value(&self) -> Value {
        let mut root = self.context.clone();
        if let Some(origin) = self.origin {
            root.insert("origin".into(), origin_value(origin));
        }
        root.insert("context".into(), Value::Object(self.context.clone()));
        root.insert("outputs".into(), Value::Object(self.outputs.clone()));
        if let Some(secrets) = &self.secrets {
            root.insert("secrets".into(), json!(secrets.as_ref()));
        }
        for (name, value) in &self.vars {
            root.insert(name.clone(), value.clone());
        }
        Value::Object(root)
    }
}

fn origin_value(origin: Origin) -> Value {
    json!({ "lat": origin.lat, "lon": origin.lon })
}

fn walk_map(map: &Map<String, Value>, rest: Option<&str>) -> Option<Value> {
    let Some(rest) = rest else {
        return Some(Value::Object(map.clone()));
    };
    let (head, tail) = match rest.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };
    let value = map.get(head)?;
    match tail {
        Some(tail) => path::lookup(value, tail).cloned(),
        None => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut context = Map::new();
        context.insert("radius_m".into(), json!(1500));
        let mut scope = Scope::new(Some(Origin { lat: 52.5, lon: 13.4 }), context);
        scope.set_output("places", json!({ "lat": [1, 2], "lon": [10, 20] }));
        scope
    }

    #[test]
    fn test_literals_pass_through_resolve() {
        let scope = scope();
        assert_eq!(scope.resolve(&json!(42)), Some(json!(42)));
        assert_eq!(scope.resolve(&json!([1, 2])), Some(json!([1, 2])));
        assert_eq!(scope.resolve(&json!("outputs.places.lat")), Some(json!([1, 2])));
    }

    #[test]
    fn test_reserved_roots_and_bare_context_keys() {
        let scope = scope();
        assert_eq!(scope.resolve_path("origin.lat"), Some(json!(52.5)));
        assert_eq!(scope.resolve_path("context.radius_m"), Some(json!(1500)));
        assert_eq!(scope.resolve_path("radius_m"), Some(json!(1500)));
        assert_eq!(scope.resolve_path("outputs.places.lon.1"), Some(json!(20)));
        assert_eq!(scope.resolve_path("outputs.later.lat"), None);
        assert_eq!(scope.resolve_path("nothing"), None);
    }

    #[test]
    fn test_overlay_variables_shadow_everything() {
        let mut vars = Map::new();
        vars.insert("lat".into(), json!(9.0));
        vars.insert("radius_m".into(), json!(10));
        let item = scope().with_vars(vars);

        assert_eq!(item.resolve_path("lat"), Some(json!(9.0)));
        assert_eq!(item.resolve_path("radius_m"), Some(json!(10)));
        assert_eq!(item.resolve_path("context.radius_m"), Some(json!(1500)));
    }

    #[test]
    fn test_secrets_only_visible_when_attached() {
        let mut secrets = BTreeMap::new();
        secrets.insert("token".to_string(), "s3cret".to_string());

        let plain = scope();
        assert_eq!(plain.resolve_path("secrets.token"), None);

        let with = plain.with_secrets(Arc::new(secrets));
        assert_eq!(with.resolve_path("secrets.token"), Some(json!("s3cret")));
    }

    #[test]
    fn test_json_path_sees_materialized_scope() {
        let scope = scope();
        assert_eq!(scope.resolve_path("$.outputs.places.lat"), Some(json!([1, 2])));
        assert_eq!(scope.resolve_path("$.origin.lon"), Some(json!(13.4)));
    }
}

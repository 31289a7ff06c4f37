/// Path expression resolution over JSON values
///
/// Two syntaxes are understood:
/// - JSON-path (`$.a.b`, `$[0]`, `$.items[*].name`) evaluated with jsonpath_lib
/// - dotted field paths (`a.b.c`, `rows.0.name`) walked segment by segment
///
/// Resolution never fails loudly: anything unresolvable is `None`.

use serde_json::Value;

/// Whether an expression uses JSON-path syntax
pub fn is_json_path(expr: &str) -> bool {
    expr.starts_with("$.") || expr.starts_with("$[")
}

/// Resolve a string path expression against a root value
pub fn resolve_str(root: &Value, expr: &str) -> Option<Value> {
    if is_json_path(expr) {
        select(root, expr)
    } else {
        lookup(root, expr).cloned()
    }
}

/// Walk a dotted path; numeric segments index arrays
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, step)
}

/// One segment of a dotted walk
pub(crate) fn step<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Evaluate a JSON-path query
///
/// Zero matches is `None`. A definite path yields its single match; anything
/// that can select several nodes yields every match as an array.
pub fn select(root: &Value, expr: &str) -> Option<Value> {
    let matches = match jsonpath_lib::select(root, expr) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::debug!("🧭 JSON-path '{}' failed to evaluate: {:?}", expr, e);
            return None;
        }
    };

    if matches.is_empty() {
        return None;
    }
    if is_definite(expr) && matches.len() == 1 {
        return Some(matches[0].clone());
    }
    Some(Value::Array(matches.into_iter().cloned().collect()))
}

/// A path without wildcards, recursion, filters, unions or slices
fn is_definite(expr: &str) -> bool {
    !(expr.contains('*')
        || expr.contains("..")
        || expr.contains('?')
        || expr.contains(',')
        || expr.contains(':'))
}

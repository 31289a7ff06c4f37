/// `{{ ... }}` template interpolation
///
/// Each placeholder is trimmed and evaluated against the scope. The only
/// built-in function is `join_coords(latPath, lonPath)`; every other
/// placeholder is a path expression. Missing values render as "".

use crate::runtime::scope::Scope;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Expand every placeholder in `template`
pub fn interpolate(template: &str, scope: &Scope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        out.push_str(&rest[..start]);
        out.push_str(&evaluate(after_open[..end].trim(), scope));
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

fn evaluate(code: &str, scope: &Scope) -> String {
    if let Some(args) = call_args(code, "join_coords") {
        return match args.as_slice() {
            [lat, lon] => join_coords(scope, lat, lon),
            _ => String::new(),
        };
    }

    scope.resolve_path(code).map(|v| render(&v)).unwrap_or_default()
}

/// Split `name(a, b)` into its trimmed arguments
fn call_args<'a>(code: &'a str, name: &str) -> Option<Vec<&'a str>> {
    let inner = code.strip_prefix(name)?.trim_start().strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.split(',').map(str::trim).collect())
}

/// Build a `;`-joined list of `lon,lat` pairs, origin first when known
///
/// Routing table endpoints select sources by index, so the origin sits at
/// index 0.
pub fn join_coords(scope: &Scope, lat_path: &str, lon_path: &str) -> String {
    let (Some(Value::Array(lats)), Some(Value::Array(lons))) =
        (scope.resolve_path(lat_path), scope.resolve_path(lon_path))
    else {
        return String::new();
    };

    let mut pairs = Vec::with_capacity(lats.len().min(lons.len()) + 1);
    if let Some(origin) = scope.origin() {
        pairs.push(format!("{},{}", origin.lon, origin.lat));
    }
    pairs.extend(
        lats.iter()
            .zip(lons.iter())
            .map(|(lat, lon)| format!("{},{}", render(lon), render(lat))),
    );
    pairs.join(";")
}

/// Stringify a resolved value for inclusion in a template
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

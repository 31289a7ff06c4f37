/// Transform library
///
/// Pure functions over normalized rows plus the closed `Transform` enum that
/// a transform node's `fn`/`args` decode into. Argument paths are resolved
/// against the run scope; a path pointing at a missing or failed node's
/// output reads as an empty collection.

use crate::runtime::{error::ExecError, path, rows::as_rows, scope::Scope};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Baseline quality for any place that made it into the result set
const BASE_QUALITY: f64 = 3.5;
const MAX_QUALITY: f64 = 5.0;
/// ETA reference window: every 10 minutes of travel costs one rating point
const ETA_WINDOW_SECS: f64 = 600.0;
const PRECIP_PENALTY_PER_MM: f64 = 0.1;
const MAX_PRECIP_PENALTY: f64 = 1.0;
const MIN_DENOMINATOR: f64 = 1e-6;

/// Every transform the engine knows, with typed arguments
#[derive(Debug, Clone)]
pub enum Transform {
    JoinOnIndex(JoinArgs),
    OsmQuality(QualityArgs),
    Score(ScoreArgs),
    TopN(TopNArgs),
    Correlation(CorrelationArgs),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinArgs {
    /// Path to the left-hand rows, or the rows themselves
    pub left: Value,
    /// Paths to arrays zipped onto the left rows (or literal arrays)
    #[serde(default)]
    pub right: Vec<Value>,
    /// Field name for each right array
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityArgs {
    pub rows: Value,
    #[serde(default)]
    pub fields: QualityFields,
}

/// Where each quality signal lives on a row (dotted paths allowed)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityFields {
    pub cuisine: String,
    pub opening_hours: String,
    pub outdoor_seating: String,
    pub wheelchair: String,
}

impl Default for QualityFields {
    fn default() -> Self {
        Self {
            cuisine: "cuisine".into(),
            opening_hours: "opening_hours".into(),
            outdoor_seating: "outdoor_seating".into(),
            wheelchair: "wheelchair".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreArgs {
    pub rows: Value,
    #[serde(default)]
    pub keys: ScoreKeys,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreKeys {
    pub rating_key: String,
    pub eta_key: String,
    pub precip_key: String,
}

impl Default for ScoreKeys {
    fn default() -> Self {
        Self {
            rating_key: "quality".into(),
            eta_key: "eta_s".into(),
            precip_key: "precip_mm".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopNArgs {
    pub rows: Value,
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_by")]
    pub by: String,
    #[serde(default = "default_desc")]
    pub desc: bool,
}

fn default_n() -> usize {
    5
}

fn default_by() -> String {
    "score".into()
}

fn default_desc() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationArgs {
    /// Path yielding the x series, or the series itself
    pub x: Value,
    /// Path yielding the y series, or the series itself
    pub y: Value,
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
}

/// Pearson correlation result as stored in the output store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRecord {
    pub x: String,
    pub y: String,
    pub pearson_r: f64,
    pub n: usize,
}

impl Transform {
    /// Decode a transform node's `fn` and `args`
    pub fn parse(function: &str, args: &Value) -> Result<Self, ExecError> {
        match function {
            "join_on_index" => decode(function, args).map(Transform::JoinOnIndex),
            "compute_osm_quality" => decode(function, args).map(Transform::OsmQuality),
            "compute_score" => decode(function, args).map(Transform::Score),
            "top_n" => decode(function, args).map(Transform::TopN),
            "correlation" => decode(function, args).map(Transform::Correlation),
            other => Err(ExecError::UnknownTransform(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transform::JoinOnIndex(_) => "join_on_index",
            Transform::OsmQuality(_) => "compute_osm_quality",
            Transform::Score(_) => "compute_score",
            Transform::TopN(_) => "top_n",
            Transform::Correlation(_) => "correlation",
        }
    }

    /// Resolve arguments against the scope and run the transform
    pub fn apply(&self, scope: &Scope) -> Result<Value, ExecError> {
        match self {
            Transform::JoinOnIndex(args) => {
                if args.right.len() != args.keys.len() {
                    return Err(ExecError::Transform {
                        function: self.name().into(),
                        reason: format!(
                            "{} right input(s) but {} key(s)",
                            args.right.len(),
                            args.keys.len()
                        ),
                    });
                }
                let left = scope.resolve(&args.left).unwrap_or(Value::Null);
                let right: Vec<Value> = args
                    .right
                    .iter()
                    .map(|expr| scope.resolve(expr).unwrap_or(Value::Null))
                    .collect();
                Ok(Value::Array(join_on_index(&left, &right, &args.keys)))
            }
            Transform::OsmQuality(args) => {
                let rows = resolve_rows(scope, &args.rows);
                Ok(Value::Array(compute_osm_quality(rows, &args.fields)))
            }
            Transform::Score(args) => {
                let rows = resolve_rows(scope, &args.rows);
                Ok(Value::Array(compute_score(rows, &args.keys)))
            }
            Transform::TopN(args) => {
                let rows = resolve_rows(scope, &args.rows);
                Ok(Value::Array(top_n(rows, args.n, &args.by, args.desc)))
            }
            Transform::Correlation(args) => {
                let xs = resolve_series(scope, &args.x);
                let ys = resolve_series(scope, &args.y);
                let (pearson_r, n) = correlation(&xs, &ys);
                let record = CorrelationRecord {
                    x: args.x_label.clone().unwrap_or_else(|| series_label(&args.x, "x")),
                    y: args.y_label.clone().unwrap_or_else(|| series_label(&args.y, "y")),
                    pearson_r,
                    n,
                };
                Ok(json!(record))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(function: &str, args: &Value) -> Result<T, ExecError> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| ExecError::TransformArgs {
        function: function.to_string(),
        reason: e.to_string(),
    })
}

fn resolve_rows(scope: &Scope, expr: &Value) -> Vec<Value> {
    scope.resolve(expr).map(|v| as_rows(&v)).unwrap_or_default()
}

fn resolve_series(scope: &Scope, expr: &Value) -> Vec<Value> {
    match scope.resolve(expr) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// The path itself names a series; inline data gets a generic label
fn series_label(expr: &Value, fallback: &str) -> String {
    expr.as_str().unwrap_or(fallback).to_string()
}

/// Zip right-hand arrays onto left rows by position
///
/// Positions past the end of a right array are filled with null.
pub fn join_on_index(left: &Value, right: &[Value], keys: &[String]) -> Vec<Value> {
    as_rows(left)
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = into_object(row);
            for (column, key) in right.iter().zip(keys) {
                let cell = column.as_array().and_then(|c| c.get(i)).cloned().unwrap_or(Value::Null);
                row.insert(key.clone(), cell);
            }
            Value::Object(row)
        })
        .collect()
}

/// Heuristic place quality in [3.5, 5.0] from OpenStreetMap tags
pub fn compute_osm_quality(rows: Vec<Value>, fields: &QualityFields) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            let mut quality = BASE_QUALITY;
            if is_present(path::lookup(&row, &fields.cuisine)) {
                quality += 0.6;
            }
            if is_present(path::lookup(&row, &fields.opening_hours)) {
                quality += 0.4;
            }
            if is_yes(path::lookup(&row, &fields.outdoor_seating)) {
                quality += 0.2;
            }
            if is_yes(path::lookup(&row, &fields.wheelchair)) {
                quality += 0.2;
            }
            let quality = round_to(quality.min(MAX_QUALITY), 2);

            let mut row = into_object(row);
            row.insert("quality".into(), json!(quality));
            Value::Object(row)
        })
        .collect()
}

/// `score = rating - eta/600 - min(1, precip * 0.1)`
pub fn compute_score(rows: Vec<Value>, keys: &ScoreKeys) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            let rating = to_number(path::lookup(&row, &keys.rating_key));
            let eta = to_number(path::lookup(&row, &keys.eta_key));
            let precip = to_number(path::lookup(&row, &keys.precip_key));
            let penalty = (precip * PRECIP_PENALTY_PER_MM).min(MAX_PRECIP_PENALTY);
            let score = rating - eta / ETA_WINDOW_SECS - penalty;

            let mut row = into_object(row);
            row.insert("score".into(), json!(score));
            Value::Object(row)
        })
        .collect()
}

/// Stable sort by a numeric field and keep the first `n`
pub fn top_n(mut rows: Vec<Value>, n: usize, by: &str, desc: bool) -> Vec<Value> {
    rows.sort_by(|a, b| {
        let (a, b) = (to_number(path::lookup(a, by)), to_number(path::lookup(b, by)));
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if desc { ord.reverse() } else { ord }
    });
    rows.truncate(n);
    rows
}

/// Pearson correlation over index-aligned pairs
///
/// Pairs are formed by original index first; a pair is dropped if either
/// side is non-numeric. Returns `(r, usable_pairs)`, with r = 0 for fewer
/// than two pairs or a zero-variance series.
pub fn correlation(xs: &[Value], ys: &[Value]) -> (f64, usize) {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some((as_finite(x)?, as_finite(y)?)))
        .collect();

    let n = pairs.len();
    if n < 2 {
        return (0.0, n);
    }

    let len = n as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / len;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / len;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denominator = (var_x * var_y).sqrt();
    if denominator < MIN_DENOMINATOR {
        return (0.0, n);
    }
    ((cov / denominator).clamp(-1.0, 1.0), n)
}

fn into_object(row: Value) -> Map<String, Value> {
    match row {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            let mut fields = Map::new();
            fields.insert("value".into(), other);
            fields
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

fn is_yes(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("yes"),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Numeric coercion; anything unusable is 0
fn to_number(value: Option<&Value>) -> f64 {
    value.and_then(as_finite).unwrap_or(0.0)
}

fn as_finite(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_on_index_fills_short_arrays_with_null() {
        let left = json!({ "name": ["a", "b", "c"] });
        let right = vec![json!([60, 120, 180]), json!([0.5])];
        let rows = join_on_index(&left, &right, &keys(&["eta_s", "precip_mm"]));

        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row["eta_s"], right[0][i]);
            assert!(row.get("precip_mm").is_some());
        }
        assert_eq!(rows[0]["precip_mm"], json!(0.5));
        assert_eq!(rows[2]["precip_mm"], Value::Null);
    }

    #[test]
    fn test_join_on_index_tolerates_missing_inputs() {
        let rows = join_on_index(&Value::Null, &[json!([1])], &keys(&["x"]));
        assert!(rows.is_empty());

        let rows = join_on_index(&json!([{ "a": 1 }]), &[Value::Null], &keys(&["x"]));
        assert_eq!(rows, vec![json!({ "a": 1, "x": null })]);
    }

    #[test]
    fn test_quality_bounds_and_monotonicity() {
        let fields = QualityFields::default();
        let rows = vec![
            json!({}),
            json!({ "cuisine": "thai" }),
            json!({ "cuisine": "thai", "opening_hours": "Mo-Su 10:00-22:00" }),
            json!({ "cuisine": "thai", "opening_hours": "24/7", "outdoor_seating": "YES" }),
            json!({ "cuisine": "thai", "opening_hours": "24/7", "outdoor_seating": "yes", "wheelchair": "Yes" }),
        ];
        let scored = compute_osm_quality(rows, &fields);
        let qualities: Vec<f64> = scored.iter().map(|r| r["quality"].as_f64().unwrap()).collect();

        assert_eq!(qualities, vec![3.5, 4.1, 4.5, 4.7, 4.9]);
        assert!(qualities.windows(2).all(|w| w[0] <= w[1]));
        assert!(qualities.iter().all(|q| (3.5..=5.0).contains(q)));
    }

    #[test]
    fn test_quality_reads_nested_field_paths() {
        let fields = QualityFields {
            cuisine: "tags.cuisine".into(),
            opening_hours: "tags.opening_hours".into(),
            outdoor_seating: "tags.outdoor_seating".into(),
            wheelchair: "tags.wheelchair".into(),
        };
        let rows = vec![json!({ "name": "x", "tags": { "cuisine": "pizza", "wheelchair": "no" } })];
        let scored = compute_osm_quality(rows, &fields);
        assert_eq!(scored[0]["quality"], json!(4.1));
        assert_eq!(scored[0]["name"], json!("x"));
    }

    #[test]
    fn test_score_formula_and_precip_cap() {
        let rows = vec![
            json!({ "quality": 4.5, "eta_s": 300, "precip_mm": 2 }),
            json!({ "quality": "4.0", "eta_s": 600, "precip_mm": 40 }),
            json!({ "quality": null, "eta_s": "n/a" }),
        ];
        let scored = compute_score(rows, &ScoreKeys::default());

        let score = |i: usize| scored[i]["score"].as_f64().unwrap();
        assert!((score(0) - 3.8).abs() < 1e-9);
        assert_eq!(score(1), 2.0);
        assert_eq!(score(2), 0.0);
    }

    #[test]
    fn test_near_equal_scores_keep_their_order() {
        let rows = vec![
            json!({ "id": "first", "quality": 4.0, "eta_s": 60.2 }),
            json!({ "id": "second", "quality": 4.0, "eta_s": 60.0 }),
        ];
        let ranked = top_n(compute_score(rows, &ScoreKeys::default()), 2, "score", true);
        assert_eq!(ranked[0]["id"], json!("second"));
        assert_eq!(ranked[1]["id"], json!("first"));
    }

    #[test]
    fn test_top_n_is_stable_and_descending() {
        let rows = vec![
            json!({ "id": "a", "score": 1.0 }),
            json!({ "id": "b", "score": 3.0 }),
            json!({ "id": "c", "score": 1.0 }),
            json!({ "id": "d" }),
            json!({ "id": "e", "score": 3.0 }),
        ];
        let top = top_n(rows.clone(), 3, "score", true);
        let ids: Vec<&str> = top.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "e", "a"]);

        let asc = top_n(rows.clone(), 10, "score", false);
        assert_eq!(asc.len(), 5);
        assert_eq!(asc[0]["id"], json!("d"));

        assert!(top_n(rows, 0, "score", true).is_empty());
    }

    #[test]
    fn test_correlation_properties() {
        let xs = vec![json!(1), json!(2), json!(3)];
        let ys = vec![json!(2), json!(4), json!(6)];
        assert_eq!(correlation(&xs, &ys), (1.0, 3));

        let inverse = vec![json!(3), json!(2), json!(1)];
        assert_eq!(correlation(&xs, &inverse).0, -1.0);

        let a = vec![json!(1.0), json!(4.0), json!(2.5), json!(7.0)];
        let b = vec![json!(3.0), json!(1.0), json!(2.0), json!(9.5)];
        let (r_ab, _) = correlation(&a, &b);
        let (r_ba, _) = correlation(&b, &a);
        assert!((r_ab - r_ba).abs() < 1e-12);
        assert!((-1.0..=1.0).contains(&r_ab));
    }

    #[test]
    fn test_correlation_degenerate_inputs_are_zero() {
        assert_eq!(correlation(&[json!(1)], &[json!(2)]), (0.0, 1));
        assert_eq!(correlation(&[], &[]), (0.0, 0));
        let flat = vec![json!(5), json!(5), json!(5)];
        let ys = vec![json!(1), json!(2), json!(3)];
        assert_eq!(correlation(&flat, &ys).0, 0.0);
    }

    #[test]
    fn test_correlation_keeps_pairs_aligned() {
        // Filtering each series on its own would pair 10 with 2 and 20 with 3.
        let xs = vec![json!(1), Value::Null, json!(3), json!(4)];
        let ys = vec![json!(10), json!(20), Value::Null, json!(40)];
        let (r, n) = correlation(&xs, &ys);
        assert_eq!(n, 2);
        assert_eq!(r, 1.0);
    }

    #[test]
    fn test_parse_rejects_unknown_functions_and_bad_args() {
        assert!(matches!(
            Transform::parse("median", &json!({})),
            Err(ExecError::UnknownTransform(name)) if name == "median"
        ));
        assert!(matches!(
            Transform::parse("top_n", &json!({ "n": 3 })),
            Err(ExecError::TransformArgs { .. })
        ));
        assert!(matches!(
            Transform::parse("top_n", &json!({ "rows": "outputs.scored" })),
            Ok(Transform::TopN(TopNArgs { n: 5, desc: true, .. }))
        ));
    }

    #[test]
    fn test_apply_resolves_arguments_from_scope() {
        let mut scope = Scope::new(None, Map::new());
        scope.set_output("xs", json!({ "v": [1, 2, 3], "w": [2, 4, 6] }));

        let t = Transform::parse(
            "correlation",
            &json!({ "x": "outputs.xs.v", "y": "outputs.xs.w", "x_label": "v" }),
        )
        .unwrap();
        let out = t.apply(&scope).unwrap();
        assert_eq!(out, json!({ "x": "v", "y": "outputs.xs.w", "pearson_r": 1.0, "n": 3 }));

        let join = Transform::parse(
            "join_on_index",
            &json!({ "left": "outputs.xs", "right": ["outputs.gone.eta"], "keys": ["eta"] }),
        )
        .unwrap();
        let joined = join.apply(&scope).unwrap();
        assert_eq!(joined[2], json!({ "v": 3, "w": 6, "eta": null }));

        let inline = Transform::parse(
            "correlation",
            &json!({ "x": [1, 2, 3], "y": "outputs.xs.w" }),
        )
        .unwrap();
        let out = inline.apply(&scope).unwrap();
        assert_eq!(out, json!({ "x": "x", "y": "outputs.xs.w", "pearson_r": 1.0, "n": 3 }));

        let bad = Transform::parse(
            "join_on_index",
            &json!({ "left": "outputs.xs", "right": ["a", "b"], "keys": ["a"] }),
        )
        .unwrap();
        assert!(matches!(bad.apply(&scope), Err(ExecError::Transform { .. })));
    }
}

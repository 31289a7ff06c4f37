/// Row normalization
///
/// Node outputs come either as row lists (`[{..}, {..}]`) or columnar
/// objects (`{colA: [..], colB: [..]}`). Transforms always work on rows.

use serde_json::{Map, Value};

/// Normalize any value into a list of rows
///
/// Lists pass through, columnar objects are transposed (truncated to the
/// shortest column), everything else becomes an empty list.
pub fn as_rows(input: &Value) -> Vec<Value> {
    match input {
        Value::Array(rows) => rows.clone(),
        Value::Object(columns) if is_columnar(columns) => transpose(columns),
        _ => Vec::new(),
    }
}

fn is_columnar(columns: &Map<String, Value>) -> bool {
    !columns.is_empty() && columns.values().all(Value::is_array)
}

fn transpose(columns: &Map<String, Value>) -> Vec<Value> {
    let len = columns
        .values()
        .filter_map(Value::as_array)
        .map(Vec::len)
        .min()
        .unwrap_or(0);

    (0..len)
        .map(|i| {
            let row: Map<String, Value> = columns
                .iter()
                .map(|(name, column)| (name.clone(), column[i].clone()))
                .collect();
            Value::Object(row)
        })
        .collect()
}

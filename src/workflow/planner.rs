/// Pipeline planner
///
/// Turns a run request into a concrete `PipelineSpec` plus a decision log.
/// The plan is fixed in shape (places -> routes -> weather -> join ->
/// quality -> score -> rank -> correlate); the goal text only tunes it.
/// A request that carries its own `spec` skips planning entirely.

use crate::runtime::error::ExecError;
use crate::workflow::types::{Edge, Origin, PipelineSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DEFAULT_RADIUS_M: u64 = 1500;
const MIN_RADIUS_M: u64 = 200;
const MAX_RADIUS_M: u64 = 5000;
const DEFAULT_TOP_N: usize = 5;
const MAX_TOP_N: usize = 20;
const WEATHER_FANOUT_MAX: usize = 10;
const PLACES_LIMIT: usize = 20;

/// A run request as accepted by the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub context: RunContext,
    #[serde(rename = "useMocks", default, skip_serializing_if = "Option::is_none")]
    pub use_mocks: Option<bool>,
    /// Pre-built spec; bypasses the planner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// `"lat,lon"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Anything else the client sent along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A spec and the reasoning that produced it
#[derive(Debug, Clone)]
pub struct Plan {
    pub spec: PipelineSpec,
    pub decisions: Vec<String>,
}

/// Build the spec for a run request
pub fn plan(request: &RunRequest) -> Result<Plan, ExecError> {
    if let Some(raw) = &request.spec {
        let mut spec = PipelineSpec::from_value(raw.clone())?;
        if spec.origin.is_none() {
            spec.origin = parse_origin(&request.context).ok();
        }
        merge_context(&mut spec.context, &request.context);
        return Ok(Plan {
            decisions: vec![format!("using client-supplied spec with {} node(s)", spec.nodes.len())],
            spec,
        });
    }

    let origin = parse_origin(&request.context)?;
    let mut decisions = vec![format!("origin {origin}")];

    let radius_m = request
        .context
        .radius_m
        .unwrap_or(DEFAULT_RADIUS_M)
        .clamp(MIN_RADIUS_M, MAX_RADIUS_M);
    decisions.push(format!("search radius {radius_m} m"));

    let goal = request.goal.to_lowercase();
    let amenity = amenity_for(&goal);
    decisions.push(format!("amenity filter '{amenity}'"));

    let n = top_n_for(&goal).unwrap_or(DEFAULT_TOP_N);
    decisions.push(format!("rank top {n} by score"));
    decisions.push(format!("weather fan-out capped at {WEATHER_FANOUT_MAX} places"));

    let mut context = Map::new();
    merge_context(&mut context, &request.context);
    context.insert("radius_m".into(), json!(radius_m));
    context.insert("amenity".into(), json!(amenity));

    let spec = PipelineSpec::from_value(json!({
        "origin": origin,
        "context": context,
        "nodes": nodes(n),
        "edges": edges(),
    }))?;

    Ok(Plan { spec, decisions })
}

fn parse_origin(context: &RunContext) -> Result<Origin, ExecError> {
    let raw = context
        .origin
        .as_deref()
        .ok_or_else(|| ExecError::InvalidSpec("context.origin is required".into()))?;
    raw.parse().map_err(ExecError::InvalidSpec)
}

fn merge_context(target: &mut Map<String, Value>, context: &RunContext) {
    if let Ok(Value::Object(fields)) = serde_json::to_value(context) {
        for (key, value) in fields {
            target.entry(key).or_insert(value);
        }
    }
}

/// Overpass amenity regex for the goal
fn amenity_for(goal: &str) -> &'static str {
    let words = goal_words(goal);
    let mentions = |stems: &[&str]| {
        words.iter().any(|w| stems.iter().any(|s| *w == *s || w.strip_suffix('s') == Some(*s)))
    };

    if mentions(&["coffee", "cafe", "café"]) {
        "cafe"
    } else if mentions(&["bar", "pub", "beer"]) {
        "bar|pub"
    } else {
        "restaurant|cafe"
    }
}

/// Goal text split into alphanumeric words
fn goal_words(goal: &str) -> Vec<&str> {
    goal.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// "top 3", "top-3", "best 3"
fn top_n_for(goal: &str) -> Option<usize> {
    goal_words(goal)
        .windows(2)
        .find(|pair| pair[0] == "top" || pair[0] == "best")
        .and_then(|pair| pair[1].parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_TOP_N))
}

fn nodes(n: usize) -> Value {
    json!([
        {
            "id": "places",
            "name": "Find places (Overpass)",
            "type": "http",
            "method": "POST",
            "url": "https://overpass-api.de/api/interpreter",
            "headers": { "Content-Type": "application/x-www-form-urlencoded" },
            "compose": {
                "area": "around:{{context.radius_m}},{{origin.lat}},{{origin.lon}}"
            },
            "body": {
                "data": format!(
                    "[out:json][timeout:25];node({{{{area}}}})[\"amenity\"~\"{{{{context.amenity}}}}\"][\"name\"];out {PLACES_LIMIT};"
                )
            },
            "map": {
                "lat": "$.elements[*].lat",
                "lon": "$.elements[*].lon",
                "tags": "$.elements[*].tags"
            },
            "retry": { "times": 2, "backoff_ms": 500 },
            "timeout_ms": 25000
        },
        {
            "id": "routes",
            "name": "Travel times (OSRM table)",
            "type": "http",
            "method": "GET",
            "url": "https://router.project-osrm.org/table/v1/driving/{{join_coords(outputs.places.lat, outputs.places.lon)}}",
            "params": { "sources": "0", "annotations": "duration" },
            "map": { "eta_s": "$.durations[0][1:]" },
            "retry": { "times": 2, "backoff_ms": 300 },
            "timeout_ms": 10000
        },
        {
            "id": "weather",
            "name": "Precipitation (Open-Meteo)",
            "type": "http",
            "method": "GET",
            "url": "https://api.open-meteo.com/v1/forecast",
            "params": {
                "latitude": "{{lat}}",
                "longitude": "{{lon}}",
                "current": "precipitation"
            },
            "map": { "precip_mm": "$.current.precipitation" },
            "retry": { "times": 1, "backoff_ms": 200 },
            "timeout_ms": 8000,
            "fanout": {
                "over": "outputs.places",
                "max": WEATHER_FANOUT_MAX,
                "mapping": { "lat": "lat", "lon": "lon" }
            }
        },
        {
            "id": "joined",
            "name": "Join on index",
            "type": "transform",
            "fn": "join_on_index",
            "args": {
                "left": "outputs.places",
                "right": ["outputs.routes.eta_s", "outputs.weather.precip_mm"],
                "keys": ["eta_s", "precip_mm"]
            }
        },
        {
            "id": "rated",
            "name": "OSM quality",
            "type": "transform",
            "fn": "compute_osm_quality",
            "args": {
                "rows": "outputs.joined",
                "fields": {
                    "cuisine": "tags.cuisine",
                    "opening_hours": "tags.opening_hours",
                    "outdoor_seating": "tags.outdoor_seating",
                    "wheelchair": "tags.wheelchair"
                }
            }
        },
        {
            "id": "scored",
            "name": "Score",
            "type": "transform",
            "fn": "compute_score",
            "args": {
                "rows": "outputs.rated",
                "keys": { "rating_key": "quality", "eta_key": "eta_s", "precip_key": "precip_mm" }
            }
        },
        {
            "id": "ranked",
            "name": "Top N",
            "type": "transform",
            "fn": "top_n",
            "args": { "rows": "outputs.scored", "n": n, "by": "score", "desc": true }
        },
        {
            "id": "correlation",
            "name": "Quality vs ETA",
            "type": "transform",
            "fn": "correlation",
            "args": {
                "x": "$.outputs.scored[*].quality",
                "y": "$.outputs.scored[*].eta_s",
                "x_label": "quality",
                "y_label": "eta_s"
            }
        }
    ])
}

fn edges() -> Vec<Edge> {
    [
        ("places", "routes"),
        ("places", "weather"),
        ("places", "joined"),
        ("routes", "joined"),
        ("weather", "joined"),
        ("joined", "rated"),
        ("rated", "scored"),
        ("scored", "ranked"),
        ("scored", "correlation"),
    ]
    .into_iter()
    .map(|(from, to)| Edge::new(from, to))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::NodeKind;

    fn request(goal: &str, origin: Option<&str>) -> RunRequest {
        RunRequest {
            goal: goal.to_string(),
            context: RunContext {
                origin: origin.map(str::to_string),
                radius_m: Some(50_000),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_builds_full_pipeline() {
        let plan = plan(&request("Top 3 coffee spots", Some("52.52,13.405"))).unwrap();
        let ids: Vec<&str> = plan.spec.nodes.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(ids, vec!["places", "routes", "weather", "joined", "rated", "scored", "ranked", "correlation"]);
        assert_eq!(plan.spec.origin, Some(Origin { lat: 52.52, lon: 13.405 }));
        assert_eq!(plan.spec.context["radius_m"], json!(MAX_RADIUS_M));
        assert_eq!(plan.spec.context["amenity"], json!("cafe"));
        assert!(plan.decisions.iter().any(|d| d == "rank top 3 by score"));

        match &plan.spec.node("places").unwrap().kind {
            NodeKind::Http(http) => {
                let body = &http.body.as_ref().unwrap()["data"];
                assert!(body.contains("node({{area}})"));
                assert!(body.contains("{{context.amenity}}"));
            }
            other => panic!("expected http node, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_requires_origin() {
        assert!(matches!(plan(&request("food", None)), Err(ExecError::InvalidSpec(_))));
        assert!(matches!(plan(&request("food", Some("nowhere"))), Err(ExecError::InvalidSpec(_))));
    }

    #[test]
    fn test_client_spec_bypasses_planner() {
        let mut req = request("", Some("1,2"));
        req.spec = Some(json!({
            "nodes": [{ "id": "only", "type": "transform", "fn": "top_n", "args": { "rows": "x" } }]
        }));
        let plan = plan(&req).unwrap();
        assert_eq!(plan.spec.nodes.len(), 1);
        assert_eq!(plan.spec.origin, Some(Origin { lat: 1.0, lon: 2.0 }));

        req.spec = Some(json!({ "nodes": [] }));
        assert!(matches!(super::plan(&req), Err(ExecError::InvalidSpec(_))));
    }

    #[test]
    fn test_goal_parsing() {
        assert_eq!(amenity_for("a quiet pub"), "bar|pub");
        assert_eq!(amenity_for("two bars, then cafés"), "cafe");
        assert_eq!(amenity_for("cocktail bars"), "bar|pub");
        assert_eq!(amenity_for("barbecue by the river"), "restaurant|cafe");
        assert_eq!(amenity_for("somewhere near the crowbar museum"), "restaurant|cafe");
        assert_eq!(amenity_for("dinner"), "restaurant|cafe");
        assert_eq!(top_n_for("show me the top-7 places"), Some(7));
        assert_eq!(top_n_for("best 100"), Some(MAX_TOP_N));
        assert_eq!(top_n_for("top places"), None);
    }
}

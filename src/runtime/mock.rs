/// Offline API simulations for mock mode
///
/// Mocks return raw response bodies shaped like the real services, so the
/// node's `map` runs exactly as it would against live data. Output is a pure
/// function of the compiled request and the origin; nothing touches the
/// network.

use crate::runtime::http::CompiledRequest;
use crate::workflow::types::{HttpNode, Origin};
use serde_json::{json, Value};

/// Fallback origin when a spec carries none (Berlin Mitte)
const DEFAULT_ORIGIN: Origin = Origin { lat: 52.5200, lon: 13.4050 };
/// Average urban driving speed used for simulated durations
const MOCK_SPEED_KMH: f64 = 24.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Canned venues: (name, dlat, dlon, cuisine, opening_hours, outdoor_seating, wheelchair)
const VENUES: &[(&str, f64, f64, &str, &str, &str, &str)] = &[
    ("Kaffeehaus Mitte", 0.0021, -0.0034, "coffee_shop", "Mo-Su 08:00-18:00", "yes", "yes"),
    ("Trattoria Lupo", -0.0045, 0.0012, "italian", "Tu-Su 12:00-23:00", "yes", "no"),
    ("Pho Bay", 0.0062, 0.0051, "vietnamese", "", "no", "yes"),
    ("Curry Ecke", -0.0013, -0.0078, "", "Mo-Sa 11:00-22:00", "", ""),
    ("Brotzeit", 0.0088, -0.0009, "german", "Mo-Fr 07:00-15:00", "yes", ""),
    ("Sushi Kiyomi", -0.0071, -0.0042, "japanese", "Mo-Su 12:00-22:30", "no", "limited"),
    ("Falafel Nord", 0.0103, 0.0037, "", "", "yes", "yes"),
    ("Café Lumen", -0.0026, 0.0094, "coffee_shop", "Mo-Su 09:00-19:00", "", "yes"),
];

/// Produce a raw response body for `request`
///
/// A node-level `mock` payload wins; otherwise the URL picks a simulation.
/// Unknown services answer with an empty object.
pub fn respond(node: &HttpNode, request: &CompiledRequest, origin: Option<Origin>) -> Value {
    if let Some(canned) = &node.mock {
        return canned.clone();
    }

    let url = request.url.to_ascii_lowercase();
    if url.contains("overpass") {
        places(origin.unwrap_or(DEFAULT_ORIGIN))
    } else if url.contains("/table/") || url.contains("osrm") {
        durations(&request.url)
    } else if url.contains("open-meteo") || url.contains("weather") {
        weather(request, origin.unwrap_or(DEFAULT_ORIGIN))
    } else {
        tracing::debug!("🎭 No mock simulation for {}, answering {{}}", request.url);
        json!({})
    }
}

/// Overpass-style `elements` around the origin
fn places(origin: Origin) -> Value {
    let elements: Vec<Value> = VENUES
        .iter()
        .enumerate()
        .map(|(i, (name, dlat, dlon, cuisine, hours, outdoor, wheelchair))| {
            let amenity = if cuisine.contains("coffee") { "cafe" } else { "restaurant" };
            let mut tags = serde_json::Map::new();
            tags.insert("amenity".into(), json!(amenity));
            tags.insert("name".into(), json!(name));
            for (key, value) in [
                ("cuisine", cuisine),
                ("opening_hours", hours),
                ("outdoor_seating", outdoor),
                ("wheelchair", wheelchair),
            ] {
                if !value.is_empty() {
                    tags.insert(key.into(), json!(value));
                }
            }
            json!({
                "type": "node",
                "id": 1_000_000 + i as u64,
                "lat": round6(origin.lat + dlat),
                "lon": round6(origin.lon + dlon),
                "tags": tags,
            })
        })
        .collect();

    json!({ "version": 0.6, "elements": elements })
}

/// OSRM table-style `durations` from the first coordinate to every other
///
/// Coordinates are read from the last path segment (`lon,lat;lon,lat;...`).
fn durations(url: &str) -> Value {
    let segment = url.split('?').next().unwrap_or_default().rsplit('/').next().unwrap_or_default();
    let coords: Vec<(f64, f64)> = segment
        .split(';')
        .filter_map(|pair| {
            let (lon, lat) = pair.split_once(',')?;
            Some((lon.trim().parse().ok()?, lat.trim().parse().ok()?))
        })
        .collect();

    let Some(&(origin_lon, origin_lat)) = coords.first() else {
        return json!({ "code": "InvalidQuery", "durations": [] });
    };

    let row: Vec<Value> = coords
        .iter()
        .map(|&(lon, lat)| {
            let km = haversine_km(origin_lat, origin_lon, lat, lon);
            json!((km / MOCK_SPEED_KMH * 3600.0).round())
        })
        .collect();

    json!({ "code": "Ok", "durations": [row] })
}

/// Open-Meteo-style `current.precipitation` derived from the coordinates
fn weather(request: &CompiledRequest, origin: Origin) -> Value {
    let param = |name: &str| -> Option<f64> {
        request
            .params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.trim().parse().ok())
    };
    let lat = param("latitude").unwrap_or(origin.lat);
    let lon = param("longitude").unwrap_or(origin.lon);

    let seed = ((lat * 1000.0).round() as i64).wrapping_mul(31) ^ ((lon * 1000.0).round() as i64).wrapping_mul(17);
    let precipitation = (seed.rem_euclid(40) as f64) / 10.0;

    json!({
        "latitude": lat,
        "longitude": lon,
        "current_units": { "precipitation": "mm" },
        "current": { "precipitation": precipitation },
    })
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (dlat, dlon) = ((lat2 - lat1).to_radians(), (lon2 - lon1).to_radians());
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(url: &str, params: &[(&str, &str)]) -> CompiledRequest {
        CompiledRequest {
            method: reqwest::Method::GET,
            url: url.to_string(),
            headers: Vec::new(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: None,
            form: false,
            timeout: Duration::from_secs(1),
        }
    }

    fn node(url: &str) -> HttpNode {
        serde_json::from_value(json!({ "url": url })).unwrap()
    }

    #[test]
    fn test_places_surround_origin() {
        let origin = Origin { lat: 10.0, lon: 20.0 };
        let body = respond(&node("overpass"), &request("https://overpass-api.de/api/interpreter", &[]), Some(origin));
        let elements = body["elements"].as_array().unwrap();

        assert_eq!(elements.len(), VENUES.len());
        for element in elements {
            assert!((element["lat"].as_f64().unwrap() - 10.0).abs() < 0.02);
            assert!(element["tags"]["name"].is_string());
        }
    }

    #[test]
    fn test_durations_start_at_zero_for_origin() {
        let url = "https://router.project-osrm.org/table/v1/driving/13.4,52.5;13.41,52.5;13.4,52.52";
        let body = respond(&node(url), &request(url, &[]), None);
        let row = body["durations"][0].as_array().unwrap();

        assert_eq!(row.len(), 3);
        assert_eq!(row[0], json!(0.0));
        assert!(row[2].as_f64().unwrap() > row[1].as_f64().unwrap());
    }

    #[test]
    fn test_weather_is_deterministic() {
        let url = "https://api.open-meteo.com/v1/forecast";
        let req = request(url, &[("latitude", "52.5"), ("longitude", "13.4")]);
        let a = respond(&node(url), &req, None);
        let b = respond(&node(url), &req, None);

        assert_eq!(a, b);
        let mm = a["current"]["precipitation"].as_f64().unwrap();
        assert!((0.0..4.0).contains(&mm));
    }

    #[test]
    fn test_node_mock_payload_wins() {
        let mut n = node("https://overpass-api.de/api/interpreter");
        n.mock = Some(json!({ "elements": [] }));
        let body = respond(&n, &request(&n.url, &[]), None);
        assert_eq!(body, json!({ "elements": [] }));
    }
}

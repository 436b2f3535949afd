//! API index: every registered resource with its name forms and endpoints.

use crate::registry::{Registry, RouteSpec};
use crate::response::Reply;
use crate::state::AppState;
use axum::extract::State;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Endpoint<'a> {
    name: &'a str,
    path: &'a str,
    methods: Vec<&'a str>,
    requires_auth: bool,
}

impl<'a> From<&'a RouteSpec> for Endpoint<'a> {
    fn from(route: &'a RouteSpec) -> Self {
        Endpoint {
            name: &route.name,
            path: &route.path,
            methods: route.methods.iter().map(|m| m.as_str()).collect(),
            requires_auth: route.requires_auth,
        }
    }
}

/// Index document for `registry`.
pub fn describe(registry: &Registry) -> Vec<Value> {
    registry
        .resources()
        .map(|r| {
            let mut entry = serde_json::to_value(&r.names).unwrap_or(Value::Null);
            let endpoints: Vec<Endpoint> = r.routes.iter().map(Endpoint::from).collect();
            if let Value::Object(map) = &mut entry {
                map.insert(
                    "endpoints".into(),
                    serde_json::to_value(endpoints).unwrap_or(Value::Null),
                );
            }
            entry
        })
        .collect()
}

/// `GET {base}`.
pub async fn index(State(state): State<AppState>) -> Reply {
    Reply::ok(describe(&state.registry), "api")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::model::fixtures::Contact;
    use serde_json::json;

    #[test]
    fn lists_names_and_endpoints() {
        let mut registry = Registry::new("/api").unwrap();
        registry.register::<Contact>(ResourceConfig::new()).unwrap();
        let doc = describe(&registry);
        let contact = doc.iter().find(|d| d["name"] == json!("Contact")).unwrap();
        assert_eq!(contact["kebabPluralName"], json!("contacts"));
        let paths: Vec<&str> = contact["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        assert!(paths.contains(&"/api/contacts/:id/update"));
        assert!(paths.contains(&"/api/contacts/schema"));

        let history = doc.iter().find(|d| d["name"] == json!("HistoryEntry")).unwrap();
        assert!(history["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["path"] == json!("/api/timeline")));
    }
}

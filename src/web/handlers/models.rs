//! Model listing endpoint

use std::collections::HashSet;

use axum::Json;
use axum::extract::State;

use crate::models::{ModelCard, ModelList};
use crate::web::AppState;

/// `GET /v1/models` — every distinct model across the fleet.
///
/// A model served by several endpoints is listed once, stamped with the
/// `added_timestamp` of the first endpoint that carries it.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let endpoints = state.context.discovery.get_endpoints();

    let mut seen: HashSet<String> = HashSet::new();
    let mut cards = Vec::new();
    for endpoint in endpoints {
        for model in &endpoint.model_names {
            if seen.insert(model.clone()) {
                cards.push(ModelCard {
                    id: model.clone(),
                    object: "model".to_string(),
                    created: endpoint.added_timestamp,
                    owned_by: "vllm".to_string(),
                });
            }
        }
    }

    Json(ModelList {
        object: "list".to_string(),
        data: cards,
    })
}

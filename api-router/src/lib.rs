use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    chat::{cancel_message, send_message},
    conversations::{create_conversation, get_conversation},
    liveness::live,
    materials::{get_material, list_materials, upload_material},
    questions::{answer_question, delete_question, due_reviews, generate_questions, get_question},
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id/messages", post(send_message))
        .route("/conversations/:id/cancel", post(cancel_message))
        .route(
            "/materials",
            post(upload_material).get(list_materials).layer(DefaultBodyLimit::max(
                usize::try_from(app_state.config.max_upload_bytes).unwrap_or(usize::MAX),
            )),
        )
        .route("/materials/:id", get(get_material))
        .route("/questions/generate", post(generate_questions))
        .route("/questions/due/reviews", get(due_reviews))
        .route("/questions/:id", get(get_question).delete(delete_question))
        .route("/questions/:id/answer", post(answer_question))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}

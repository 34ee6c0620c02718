use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, HttpSettings};
use crate::handlers::{
    claim_courtesy, confirm_payment, create_order, health_check, preview_discount, redeem_scan,
    ticket_detail, verify_courtesy, AppState,
};

pub fn create_routes(state: AppState, http: &HttpSettings) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(create_order))
        .route("/orders/:id/confirm", post(confirm_payment))
        .route("/discounts/preview", post(preview_discount))
        .route("/courtesy/:code", get(verify_courtesy))
        .route("/courtesy/:code/claim", post(claim_courtesy))
        .route("/tickets/:id_or_code", get(ticket_detail))
        .route("/scans", post(redeem_scan))
        .with_state(state);

    create_security_headers_layer(router, http.include_hsts).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer(&http.allowed_origins)),
    )
}

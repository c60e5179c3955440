use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    error::AppError,
    request_tracing,
    server_config::{RateLimitConfig, ServerSettings},
    ServerState,
};

use super::handlers::{analyze, auth, digest, health, summaries};

const RETAIN_INTERVAL: Duration = Duration::from_secs(60);

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let config = state.config.clone();

        let router = Router::new()
            .route("/", get(health::handler_service_info).fallback(handler_405))
            .route(
                "/api/health",
                get(health::handler_health).fallback(handler_405),
            )
            .route(
                "/api/health/model",
                get(health::handler_model_health).fallback(handler_405),
            )
            .nest(
                "/api/auth",
                Router::new()
                    .route(
                        "/signup",
                        post(auth::handler_signup).fallback(handler_405),
                    )
                    .route(
                        "/signin",
                        post(auth::handler_signin).fallback(handler_405),
                    )
                    .route("/me", get(auth::handler_me).fallback(handler_405)),
            )
            .nest(
                "/api/emails",
                Router::new()
                    .route(
                        "/analyze",
                        post(analyze::handler_analyze).fallback(handler_405),
                    )
                    .route(
                        "/digest",
                        post(digest::handler_digest).fallback(handler_405),
                    )
                    .route(
                        "/summaries",
                        get(summaries::handler_list_summaries).fallback(handler_405),
                    )
                    .layer(DefaultBodyLimit::max(config.server.body_limit_bytes)),
            )
            .fallback(handler_404)
            .with_state(state);

        with_ip_limiter(router, &config.rate_limit)
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer(&config.server))
    }
}

fn with_ip_limiter(router: Router, rate_limit: &RateLimitConfig) -> Router {
    if !rate_limit.enabled {
        tracing::info!("Per-IP rate limiting disabled");
        return router;
    }

    let Some(ip_limiter_conf) = GovernorConfigBuilder::default()
        .per_second(rate_limit.per_second)
        .burst_size(rate_limit.burst_size)
        .finish()
    else {
        tracing::warn!(
            "Invalid rate limit settings {:?}, per-IP rate limiting disabled",
            rate_limit
        );
        return router;
    };

    let ip_limiter_conf = Arc::new(ip_limiter_conf);
    let ip_limiter = ip_limiter_conf.limiter().clone();
    // a separate background task to clean up
    tokio::task::spawn(async move {
        loop {
            tokio::time::sleep(RETAIN_INTERVAL).await;
            ip_limiter.retain_recent();
        }
    });

    router
        .layer(GovernorLayer {
            config: ip_limiter_conf,
        })
        .layer(middleware::map_response(json_too_many_requests))
}

fn cors_layer(settings: &ServerSettings) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static(analyze::ANALYSIS_SOURCE_HEADER),
            HeaderName::from_static("x-request-id"),
        ]);

    if settings.allowed_origins.iter().any(|o| o == "*") {
        // Browsers refuse credentials with a wildcard origin
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    cors.allow_origin(origins).allow_credentials(true)
}

async fn json_too_many_requests(response: Response) -> Response {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }

    let mut json_response = AppError::TooManyRequests.into_response();
    for name in [header::RETRY_AFTER, HeaderName::from_static("x-ratelimit-after")] {
        if let Some(value) = response.headers().get(&name) {
            json_response.headers_mut().insert(name, value.clone());
        }
    }
    json_response
}

pub async fn handler_404() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

pub async fn handler_405() -> AppError {
    AppError::MethodNotAllowed
}

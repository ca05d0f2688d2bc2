use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sharecircle::db::models::Role;
use sharecircle::db::{self, DbPool, NewUser};
use sharecircle::{auth, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    // Ensure critical environment variables are set
    env::var("JWT_SECRET").expect("JWT_SECRET must be set");

    // Initialize Tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sharecircle=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ShareCircle application...");

    tracing::info!("Initializing database connection pool...");
    let db_pool = db::init_pool().await?;
    tracing::info!("Database connection pool initialized successfully");

    seed_admin(&db_pool).await?;

    let state = AppState { db: db_pool };

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(
                env::var("RATE_LIMIT_PER_SECOND")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1200),
            )
            .burst_size(
                env::var("RATE_LIMIT_BURST")
                    .ok()
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(2400),
            )
            .finish()
            .expect("governor config"),
    );

    // CORS configuration (no permissive mode)
    let cors = {
        let env_mode = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        let origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .filter_map(|s| {
                        let trimmed = s.trim();
                        if trimmed.is_empty() {
                            return None;
                        }
                        match trimmed.parse::<HeaderValue>() {
                            Ok(value) => Some(value),
                            Err(_) => {
                                tracing::warn!("Ignoring invalid ALLOWED_ORIGINS entry: {}", trimmed);
                                None
                            }
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let origins = if origins.is_empty() {
            if env_mode == "production" {
                panic!("ALLOWED_ORIGINS must contain at least one valid origin in production")
            }
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        } else {
            origins
        };

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .allow_credentials(true)
    };

    // Router Setup
    let app = Router::new()
        .route("/health", get(health_check))
        // Auth Routes
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/api/me", get(auth::me))
        // Donation Routes
        .route(
            "/api/donations",
            get(routes::donations::list_donations).post(routes::donations::create_donation),
        )
        .route("/api/donations/nearby", get(routes::donations::nearby_donations))
        .route("/api/donations/{id}", get(routes::donations::get_donation))
        .route("/api/donations/{id}/accept", post(routes::donations::accept_donation))
        .route("/api/donations/{id}/collect", post(routes::donations::collect_donation))
        .route("/api/donations/{id}/deliver", post(routes::donations::deliver_donation))
        // Statistics / Gamification Routes
        .route("/api/stats", get(routes::stats::stats))
        .route("/api/leaderboard", get(routes::stats::leaderboard))
        .route("/api/certificates", get(routes::certificates::list_certificates))
        .route("/api/impact", get(routes::certificates::impact_summary))
        .layer(cors)
        .layer(GovernorLayer { config: governor_config })
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Creates the admin account on first boot when ADMIN_USERNAME and
/// ADMIN_PASSWORD are both configured.
async fn seed_admin(pool: &DbPool) -> anyhow::Result<()> {
    let (Ok(username), Ok(password)) = (env::var("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD"))
    else {
        return Ok(());
    };

    if db::find_user_by_username(pool, &username).await?.is_some() {
        return Ok(());
    }

    let email =
        env::var("ADMIN_EMAIL").unwrap_or_else(|_| format!("{}@sharecircle.local", username));
    let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
    let admin = db::create_user(
        pool,
        &NewUser {
            username,
            email,
            password_hash,
            role: Role::Admin,
            phone: None,
            city: None,
            area: None,
            latitude: None,
            longitude: None,
        },
        Utc::now(),
    )
    .await?;
    tracing::info!(user_id = admin.id, "seeded admin user");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

async fn health_check() -> &'static str {
    "OK"
}

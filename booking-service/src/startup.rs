//! Application startup and lifecycle management.

use crate::config::{Config, StorageBackend};
use crate::handlers::{self, bookings, payments, tours};
use crate::services::{
    BookingLifecycle, BookingStore, InMemoryBookingStore, InMemoryPaymentLedger,
    MongoBookingStore, MongoPaymentLedger, PaymentGateway, PaymentLedger, StripeClient,
};
use axum::body::Body;
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    request_id::{http_request_span, request_id_middleware},
    security_headers::security_headers_middleware,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub lifecycle: Arc<BookingLifecycle>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    router: Router,
}

async fn connect_stores(
    config: &Config,
) -> Result<(Arc<dyn BookingStore>, Arc<dyn PaymentLedger>), AppError> {
    let unique_intents = config.ledger.unique_payment_intents;

    match config.database.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage - data is lost on restart");
            Ok((
                Arc::new(InMemoryBookingStore::new()),
                Arc::new(InMemoryPaymentLedger::new(unique_intents)),
            ))
        }
        StorageBackend::Mongo => {
            let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to parse MongoDB connection string: {}", e);
                    AppError::from(e)
                })?;
            client_options.app_name = Some(config.service_name.clone());

            let client = Client::with_options(client_options).map_err(|e| {
                tracing::error!("Failed to create MongoDB client: {}", e);
                AppError::from(e)
            })?;
            let db = client.database(&config.database.db_name);

            let bookings = MongoBookingStore::new(&db);
            let ledger = MongoPaymentLedger::new(&db, unique_intents);
            bookings.init_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize booking indexes: {}", e);
                AppError::DatabaseError(e)
            })?;
            ledger.init_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize ledger indexes: {}", e);
                AppError::DatabaseError(e)
            })?;

            Ok((Arc::new(bookings), Arc::new(ledger)))
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = config.server.origins();
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/user/:email", get(bookings::bookings_for_user))
        .route("/bookings/:id", delete(bookings::delete_booking))
        .route("/bookings/:id/cancel", patch(bookings::cancel_booking))
        // Guide assignments; the segment is a guide email or a booking id
        .route("/assigned-tours/:key", get(tours::assigned_tours))
        .route("/assigned-tours/:key/status", put(tours::update_tour_status))
        // Payments
        .route(
            "/payment/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route("/payment/confirm-payment", post(payments::confirm_payment))
        .route("/payment/history/:booking_id", get(payments::payment_history))
        .route("/payments", get(payments::list_payments))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(http_request_span::<Body>))
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let (bookings, ledger) = connect_stores(&config).await?;

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe secret key not configured - payment routes will fail");
        }

        let lifecycle = BookingLifecycle::new(
            bookings,
            ledger,
            PaymentGateway::new(Arc::new(stripe)),
            config.stripe.default_currency.clone(),
        );

        let state = AppState {
            config: config.clone(),
            lifecycle: Arc::new(lifecycle),
        };

        // Port 0 binds a random port for testing
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(
            backend = ?config.database.backend,
            "Booking service: HTTP on port {}",
            http_port
        );

        Ok(Self {
            http_port,
            listener,
            router: build_router(state),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run until the server fails or Ctrl+C is received.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

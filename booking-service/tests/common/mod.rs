#![allow(dead_code)]

use booking_service::config::{
    Config, DatabaseConfig, LedgerConfig, ObservabilityConfig, ServerConfig, StorageBackend,
    StripeConfig,
};
use booking_service::startup::Application;
use secrecy::Secret;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_SECRET_KEY: &str = "sk_test_booking";
pub const TOURIST_EMAIL: &str = "rahim@example.com";
pub const GUIDE_EMAIL: &str = "karim@example.com";

pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub stripe: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_ledger(false).await
    }

    /// Spawn with the ledger rejecting repeated payment intents.
    pub async fn spawn_with_ledger(unique_payment_intents: bool) -> Self {
        let stripe = MockServer::start().await;

        let config = Config {
            service_name: "booking-service-test".to_string(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
                allowed_origins: "*".to_string(),
            },
            database: DatabaseConfig {
                backend: StorageBackend::Memory,
                url: Secret::new("mongodb://unused".to_string()),
                db_name: "booking_test".to_string(),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(TEST_SECRET_KEY.to_string()),
                api_base_url: stripe.uri(),
                default_currency: "usd".to_string(),
            },
            ledger: LedgerConfig {
                unique_payment_intents,
            },
            observability: ObservabilityConfig {
                log_level: "debug".to_string(),
                otlp_endpoint: None,
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            stripe,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub fn booking_body(&self) -> Value {
        json!({
            "packageName": "Sundarbans Safari",
            "touristName": "Rahim",
            "touristEmail": TOURIST_EMAIL,
            "touristImage": "https://img.example.com/rahim.png",
            "price": 250.00,
            "tourDate": "2026-12-01",
            "selectedGuide": {
                "_id": "665f1c2b9d3e4a0012345678",
                "name": "Karim",
                "photo": "https://img.example.com/karim.png",
                "email": GUIDE_EMAIL
            }
        })
    }

    /// Create a booking and return its `data` object.
    pub async fn create_booking(&self) -> Value {
        let response = self
            .client
            .post(self.url("/bookings"))
            .json(&self.booking_body())
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);

        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["data"].clone()
    }

    pub async fn post_json(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .expect("Failed to parse JSON")
    }

    pub async fn bookings_of_tourist(&self) -> Vec<Value> {
        let body = self.get_json(&format!("/bookings/user/{}", TOURIST_EMAIL)).await;
        body["data"].as_array().cloned().unwrap_or_default()
    }

    /// Stripe answers intent creation with `pi_id`.
    pub async fn mock_intent_creation(&self, id: &str) {
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "client_secret": format!("{}_secret_test", id),
                "status": "requires_payment_method",
                "amount": 25000,
                "currency": "usd"
            })))
            .mount(&self.stripe)
            .await;
    }

    /// Stripe reports intent `id` with `status` and an expanded card charge.
    pub async fn mock_intent_status(&self, id: &str, status: &str) {
        self.mock_intent_for_booking(id, status, None).await;
    }

    /// Like [`Self::mock_intent_status`], tagged with the booking it was created for.
    pub async fn mock_intent_for_booking(&self, id: &str, status: &str, booking_id: Option<&str>) {
        let metadata = match booking_id {
            Some(booking_id) => json!({ "bookingId": booking_id }),
            None => json!({}),
        };
        Mock::given(method("GET"))
            .and(path(format!("/payment_intents/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "object": "payment_intent",
                "status": status,
                "amount": 25000,
                "currency": "usd",
                "payment_method": "pm_card_visa",
                "metadata": metadata,
                "latest_charge": {
                    "id": "ch_test_1",
                    "payment_method_details": {
                        "type": "card",
                        "card": { "brand": "visa", "last4": "4242" }
                    }
                }
            })))
            .mount(&self.stripe)
            .await;
    }
}

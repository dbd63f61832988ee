use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use auth::Authenticator;
use auth::HashPolicy;
use identity_service::config::RateLimitConfig;
use identity_service::domain::identity::errors::EventPublisherError;
use identity_service::domain::identity::events::UserCreatedEvent;
use identity_service::domain::identity::ports::EventPublisher;
use identity_service::domain::identity::service::IdentityService;
use identity_service::inbound::http::rate_limit::ClientRateLimiter;
use identity_service::inbound::http::router::create_router;
use identity_service::outbound::cache::InMemorySessionCache;
use identity_service::outbound::repositories::InMemoryIdentityStore;
use serde_json::json;
use serde_json::Value;

pub const PASSWORD: &str = "Pa55word!";

/// Event publisher that keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<UserCreatedEvent>>,
}

impl RecordingEventPublisher {
    pub fn published(&self) -> Vec<UserCreatedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_user_created(
        &self,
        event: &UserCreatedEvent,
    ) -> Result<(), EventPublisherError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Test application that spawns a real server over in-memory adapters
pub struct TestApp {
    pub address: String,
    pub store: InMemoryIdentityStore,
    pub events: Arc<RecordingEventPublisher>,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(None).await
    }

    pub async fn spawn_with_rate_limit(config: RateLimitConfig) -> Self {
        Self::spawn_with(Some(Arc::new(ClientRateLimiter::new(&config)))).await
    }

    async fn spawn_with(rate_limiter: Option<Arc<ClientRateLimiter>>) -> Self {
        // Use random port (0 = OS assigns)
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let address = format!("http://127.0.0.1:{}", port);

        let store = InMemoryIdentityStore::new();
        let events = Arc::new(RecordingEventPublisher::default());

        // Cheap hashing keeps the suite fast
        let authenticator = Authenticator::with_policy(HashPolicy {
            memory_cost_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        })
        .expect("Failed to build authenticator");

        let identity_service = IdentityService::new(
            Arc::new(store.clone()),
            Arc::clone(&events),
            Arc::new(InMemorySessionCache::new()),
        )
        .with_authenticator(authenticator);

        let router = create_router(
            Arc::new(identity_service),
            rate_limiter,
            false,
            &["http://localhost:3000".to_string()],
        );

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server error");
        });

        Self {
            address,
            store,
            events,
            api_client: reqwest::Client::builder()
                .build()
                .expect("Failed to create reqwest client"),
        }
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.get(format!("{}{}", self.address, path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.post(format!("{}{}", self.address, path))
    }

    pub fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.put(format!("{}{}", self.address, path))
    }

    pub fn get_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.get(path).bearer_auth(token)
    }

    pub fn delete_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.api_client
            .delete(format!("{}{}", self.address, path))
            .bearer_auth(token)
    }

    /// Register a user and return the activation token from the reply.
    pub async fn register(&self, username: &str) -> String {
        let response = self
            .post("/api/v1/users/register")
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let body: Value = response.json().await.expect("Failed to parse response");
        body["data"]["token"]
            .as_str()
            .expect("Missing activation token")
            .to_string()
    }

    pub async fn activate(&self, token: &str) -> reqwest::Response {
        self.put("/api/v1/users/activate")
            .json(&json!({ "token": token }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.post("/api/v1/users/login")
            .header("user-agent", "identity-tests")
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Register, activate and log in; returns the access token.
    pub async fn signed_in(&self, username: &str) -> String {
        let token = self.register(username).await;
        assert_eq!(self.activate(&token).await.status(), reqwest::StatusCode::OK);

        let body: Value = self
            .login(username, PASSWORD)
            .await
            .json()
            .await
            .expect("Failed to parse response");
        body["data"]["access_token"]
            .as_str()
            .expect("Missing access token")
            .to_string()
    }
}

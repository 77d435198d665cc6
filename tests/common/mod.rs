use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use jobboard::auth::password;
use jobboard::config::{Config, RecoveryConfig};
use jobboard::db;
use jobboard::models::OutboxItem;

/// A running test server instance with a dedicated test database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: PgPool,
    pub client: Client,
    pub db_name: String,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Insert an account directly; the account model is owned elsewhere.
    pub async fn create_account(&self, email: &str, name: &str, pw: &str, role: &str) {
        let hash = password::hash(pw).expect("hash password");
        db::accounts::create(&self.pool, email, name, &hash, role)
            .await
            .expect("create account");
    }

    pub async fn password_hash(&self, email: &str, role: &str) -> String {
        db::accounts::find_by_email_and_role(&self.pool, email, role)
            .await
            .expect("load account")
            .expect("account exists")
            .password_hash
    }

    pub async fn forgot(&self, email: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/password-reset/forgot"))
            .json(&json!({ "email": email }))
            .send()
            .await
            .expect("forgot request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn verify(&self, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(&format!("/password-reset/verify?token={token}")))
            .send()
            .await
            .expect("verify request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn reset(&self, token: &str, new_password: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/password-reset/reset"))
            .json(&json!({ "token": token, "new_password": new_password }))
            .send()
            .await
            .expect("reset request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Wait until `count` outbox items of `kind` exist for `recipient`.
    pub async fn wait_for_outbox(&self, recipient: &str, kind: &str, count: usize) -> Vec<OutboxItem> {
        for _ in 0..100 {
            let items: Vec<OutboxItem> =
                db::notification_outbox::list_for_recipient(&self.pool, recipient)
                    .await
                    .expect("list outbox")
                    .into_iter()
                    .filter(|item| item.kind == kind)
                    .collect();
            if items.len() >= count {
                return items;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {count} '{kind}' notifications to {recipient}");
    }

    /// Request a reset and pull the token out of the queued email.
    pub async fn issue_token(&self, email: &str) -> String {
        let before = db::notification_outbox::list_for_recipient(&self.pool, email)
            .await
            .expect("list outbox")
            .into_iter()
            .filter(|item| item.kind == "password_reset")
            .count();
        let (_, status) = self.forgot(email).await;
        assert_eq!(status, StatusCode::OK);
        let items = self.wait_for_outbox(email, "password_reset", before + 1).await;
        token_from_body(&items[before].body)
    }
}

pub fn token_from_body(body: &str) -> String {
    let re = regex::Regex::new(r"token=([0-9a-f]{64})").unwrap();
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .expect("reset link in email body")
}

/// Spawn a test app with a fresh temporary database.
pub async fn spawn_app() -> TestApp {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    // Create a unique test database
    let db_name = format!("jobboard_test_{}", Uuid::now_v7().to_string().replace('-', ""));

    // Connect to default postgres DB to create test DB
    let admin_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.clone());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url)
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    let config = Config {
        database_url: test_url,
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        base_url: "http://localhost:0".to_string(),
        max_body_size: 65_536,
        trusted_proxies: vec![],
        worker_count: 1,
        log_level: "warn".to_string(),
        smtp: None,
        recovery: RecoveryConfig::default(),
    };

    let (app, _state) = jobboard::build_app(pool.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    TestApp {
        addr,
        pool,
        client: Client::new(),
        db_name,
    }
}

/// Drop the test database after tests complete.
pub async fn cleanup(app: TestApp) {
    let db_name = app.db_name.clone();
    app.pool.close().await;

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");
    let admin_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.clone());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url)
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}

use crate::app::ports::RemoteSession;
use crate::common::error::{HarvesterError, Result};
use crate::config::StoreConfig;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Owns the session with the shared store: HTTP client, credentials and
/// the current auth token. Every store call goes through [`ConnectionManager::request`].
pub struct ConnectionManager {
    client: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl ConnectionManager {
    pub fn new(config: &StoreConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.admin_email.clone(),
            password: config.admin_password.clone(),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Log in with the admin credentials and keep the returned token.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<()> {
        if self.email.is_empty() {
            return Err(HarvesterError::Auth("no admin email configured".into()));
        }
        let url = format!("{}/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&login_body(&self.email, &self.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvesterError::Auth(format!("login rejected with {}: {}", status, body)));
        }
        let login: LoginResponse = response.json().await?;
        *self.token.write().await = Some(login.token);
        info!("Authenticated with store as {}", self.email);
        Ok(())
    }

    /// Drop the current session and log in again.
    pub async fn reconnect(&self) -> Result<()> {
        self.token.write().await.take();
        self.login().await
    }

    /// Issue one store call. `Ok(None)` means the store answered 404.
    ///
    /// A 401 triggers one re-login and a single retry.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        match self.request_once(method.clone(), path, body).await {
            Err(e) if e.is_unauthorized() => {
                warn!(path, "Store session rejected, re-authenticating");
                self.reconnect().await?;
                self.request_once(method, path, body).await
            }
            other => other,
        }
    }

    async fn request_once(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method.clone(), &url);
        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(%method, path, status = status.as_u16(), "Store call");
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(HarvesterError::UpstreamStatus { status: status.as_u16(), body: text });
        }
        Ok(Some(text))
    }
}

/// Lowercase hex SHA-256 of the password; the plaintext never leaves the process.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn login_body(email: &str, password: &str) -> Value {
    json!({
        "user": {"email": email},
        "password": {"digest": password_digest(password), "algorithm": "sha-256"}
    })
}

#[async_trait]
impl RemoteSession for ConnectionManager {
    async fn connect(&self) -> Result<()> {
        self.request(Method::GET, "/health", None)
            .await?
            .ok_or_else(|| HarvesterError::store("store health endpoint not found"))?;
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        self.login().await
    }

    async fn subscribe(&self, name: &str) -> Result<()> {
        let path = format!("/subscriptions/{}/ready", name);
        self.request(Method::GET, &path, None)
            .await?
            .ok_or_else(|| HarvesterError::store(format!("unknown subscription '{}'", name)))?;
        debug!("Subscription '{}' ready", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_sha256_hex() {
        assert_eq!(
            password_digest("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn login_body_never_contains_the_plaintext() {
        let body = login_body("admin@example.com", "hunter2");
        assert_eq!(body["user"]["email"], "admin@example.com");
        assert_eq!(body["password"]["algorithm"], "sha-256");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn login_without_email_is_an_auth_error() {
        let config = StoreConfig {
            base_url: "http://store.example.test/".into(),
            admin_email: String::new(),
            admin_password: String::new(),
        };
        let manager = ConnectionManager::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(manager.base_url(), "http://store.example.test");
        assert!(matches!(manager.login().await, Err(HarvesterError::Auth(_))));
        assert!(!manager.is_authenticated().await);
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RemnawaveConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const GET_ATTEMPTS: u32 = 3;

/// Access returned by the provisioning system after a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedAccess {
    pub link: String,
    pub expires_at: DateTime<Utc>,
}

/// The external system that actually grants VPN access.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Creates the user or extends the existing one by `days`.
    async fn create_or_update_user(
        &self,
        telegram_id: i64,
        traffic_limit_bytes: i64,
        days: i32,
    ) -> Result<ProvisionedAccess>;

    /// Bytes used between `start` and `end`.
    async fn get_usage(&self, user_ref: &str, start: DateTime<Utc>, end: DateTime<Utc>)
    -> Result<i64>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    uuid: String,
    expire_at: DateTime<Utc>,
    subscription_url: String,
}

#[derive(Debug, Deserialize)]
struct UsageEntry {
    total: i64,
}

pub struct RemnawaveClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RemnawaveClient {
    pub fn new(config: &RemnawaveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build provisioning HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    /// GETs are idempotent and retried with exponential backoff.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let mut delay = Duration::from_millis(500);
        let mut last_err = None;

        for attempt in 1..=GET_ATTEMPTS {
            match self.request(Method::GET, path).send().await {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(resp) => {
                    let resp = resp
                        .error_for_status()
                        .with_context(|| format!("GET {path} failed"))?;
                    let body = resp
                        .json::<Envelope<T>>()
                        .await
                        .with_context(|| format!("GET {path} returned an unexpected body"))?;
                    return Ok(Some(body.response));
                }
                Err(e) => {
                    warn!("GET {} attempt {}/{} failed: {}", path, attempt, GET_ATTEMPTS, e);
                    last_err = Some(e);
                }
            }
            if attempt < GET_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(anyhow::anyhow!(
            "GET {path} failed after {GET_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<RemoteUser> {
        let resp = self
            .request(method.clone(), path)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} {path} failed"))?
            .error_for_status()
            .with_context(|| format!("{method} {path} was rejected"))?;
        let body = resp
            .json::<Envelope<RemoteUser>>()
            .await
            .with_context(|| format!("{method} {path} returned an unexpected body"))?;
        Ok(body.response)
    }
}

/// New expiry counted from the later of now and the current expiry.
pub fn extended_expiry(
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    days: i32,
) -> DateTime<Utc> {
    let base = current.filter(|exp| *exp > now).unwrap_or(now);
    base + chrono::Duration::days(i64::from(days))
}

#[async_trait]
impl Provisioner for RemnawaveClient {
    async fn create_or_update_user(
        &self,
        telegram_id: i64,
        traffic_limit_bytes: i64,
        days: i32,
    ) -> Result<ProvisionedAccess> {
        let now = Utc::now();
        let existing: Option<Vec<RemoteUser>> = self
            .get_json(&format!("/api/users/by-telegram-id/{telegram_id}"))
            .await?;

        let user = match existing.and_then(|users| users.into_iter().next()) {
            Some(user) => {
                let expire_at = extended_expiry(Some(user.expire_at), now, days);
                debug!("Extending provisioned user {} until {}", user.uuid, expire_at);
                self.send_json(
                    Method::PATCH,
                    "/api/users",
                    json!({
                        "uuid": user.uuid,
                        "expireAt": expire_at,
                        "trafficLimitBytes": traffic_limit_bytes,
                        "status": "ACTIVE",
                    }),
                )
                .await?
            }
            None => {
                let expire_at = extended_expiry(None, now, days);
                debug!("Creating provisioned user for telegram id {}", telegram_id);
                self.send_json(
                    Method::POST,
                    "/api/users",
                    json!({
                        "username": format!("tg_{telegram_id}"),
                        "telegramId": telegram_id,
                        "expireAt": expire_at,
                        "trafficLimitBytes": traffic_limit_bytes,
                        "trafficLimitStrategy": "MONTH",
                    }),
                )
                .await?
            }
        };

        Ok(ProvisionedAccess {
            link: user.subscription_url,
            expires_at: user.expire_at,
        })
    }

    async fn get_usage(
        &self,
        user_ref: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let path = format!(
            "/api/users/stats/usage/{user_ref}/range?start={}&end={}",
            start.to_rfc3339(),
            end.to_rfc3339()
        );
        let entries: Option<Vec<UsageEntry>> = self.get_json(&path).await?;
        Ok(entries.unwrap_or_default().iter().map(|e| e.total).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_extends_from_future_expiry() {
        let now = Utc::now();
        let current = now + chrono::Duration::days(10);
        assert_eq!(extended_expiry(Some(current), now, 30), current + chrono::Duration::days(30));
    }

    #[test]
    fn expired_or_missing_expiry_extends_from_now() {
        let now = Utc::now();
        let past = now - chrono::Duration::days(3);
        assert_eq!(extended_expiry(Some(past), now, 7), now + chrono::Duration::days(7));
        assert_eq!(extended_expiry(None, now, 7), now + chrono::Duration::days(7));
    }
}

use crate::config::Settings;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "v58.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONNECTION_TYPE: &str = "REST API";

/// Salesforce session established once at process start. Status reporting
/// only; no business data flows through this client.
#[derive(Debug, Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    access_token: String,
    instance_url: String,
    username: String,
}

/// Connection report served by the status endpoint and the probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            user_count: None,
            username: None,
            instance_url: None,
            connection_type: None,
            error: Some(error.into()),
        }
    }
}

impl SalesforceClient {
    /// Logs in with the OAuth2 username-password grant. The security token
    /// is appended to the password, per Salesforce's flow.
    pub async fn connect(settings: &Settings) -> anyhow::Result<Self> {
        let username = settings.require_salesforce_username()?.to_string();
        let password = settings.require_salesforce_password()?;
        let security_token = settings.require_salesforce_token()?;
        let client_id = settings.require_salesforce_client_id()?;
        let client_secret = settings.require_salesforce_client_secret()?;
        let domain = settings.salesforce_domain.as_str();

        let timeout_secs = std::env::var("SALESFORCE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build Salesforce http client")?;

        let login_url = format!("https://{domain}.salesforce.com/services/oauth2/token");
        let password_with_token = format!("{password}{security_token}");
        let form = [
            ("grant_type", "password"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("username", username.as_str()),
            ("password", password_with_token.as_str()),
        ];

        let res = http
            .post(&login_url)
            .form(&form)
            .send()
            .await
            .context("Salesforce login request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Salesforce login response")?;
        if !status.is_success() {
            bail!("Salesforce login failed: status={status} body={text}");
        }

        let token = serde_json::from_str::<TokenResponse>(&text)
            .context("failed to decode Salesforce token response")?;

        tracing::info!(instance_url = %token.instance_url, "connected to Salesforce");

        Ok(Self {
            http,
            access_token: token.access_token,
            instance_url: token.instance_url,
            username,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn query(&self, soql: &str) -> anyhow::Result<QueryResponse> {
        let url = format!(
            "{}/services/data/{API_VERSION}/query",
            self.instance_url.trim_end_matches('/')
        );
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("q", soql)])
            .send()
            .await
            .context("Salesforce query request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Salesforce query response")?;
        if !status.is_success() {
            bail!("Salesforce query failed: status={status} body={text}");
        }

        serde_json::from_str::<QueryResponse>(&text)
            .context("failed to decode Salesforce query response")
    }

    /// Round-trips a trivial SOQL count to prove the session is usable.
    pub async fn test_connection(&self) -> ConnectionStatus {
        match self.query("SELECT COUNT() FROM User").await {
            Ok(res) => ConnectionStatus {
                connected: true,
                user_count: Some(res.total_size),
                username: Some(self.username.clone()),
                instance_url: Some(self.instance_url.clone()),
                connection_type: Some(CONNECTION_TYPE.to_string()),
                error: None,
            },
            Err(err) => {
                tracing::error!(error = %err, "Salesforce connection test failed");
                ConnectionStatus::disconnected(format!("{err:#}"))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize")]
    total_size: i64,
}

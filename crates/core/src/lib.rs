pub mod crm;
pub mod domain;
pub mod vision;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub google_api_key: Option<String>,
        pub salesforce_username: Option<String>,
        pub salesforce_password: Option<String>,
        pub salesforce_token: Option<String>,
        pub salesforce_client_id: Option<String>,
        pub salesforce_client_secret: Option<String>,
        pub salesforce_domain: String,
        pub sentry_dsn: Option<String>,
        pub max_upload_mb: u64,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let max_upload_mb = std::env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_MB);

            Ok(Self {
                google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
                salesforce_username: std::env::var("SALESFORCE_USERNAME").ok(),
                salesforce_password: std::env::var("SALESFORCE_PASSWORD").ok(),
                salesforce_token: std::env::var("SALESFORCE_TOKEN").ok(),
                salesforce_client_id: std::env::var("SALESFORCE_CLIENT_ID").ok(),
                salesforce_client_secret: std::env::var("SALESFORCE_CLIENT_SECRET").ok(),
                salesforce_domain: std::env::var("SALESFORCE_DOMAIN")
                    .unwrap_or_else(|_| "login".to_string()),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                max_upload_mb,
            })
        }

        pub fn require_google_api_key(&self) -> anyhow::Result<&str> {
            self.google_api_key
                .as_deref()
                .context("GOOGLE_API_KEY is required")
        }

        pub fn require_salesforce_username(&self) -> anyhow::Result<&str> {
            self.salesforce_username
                .as_deref()
                .context("SALESFORCE_USERNAME is required")
        }

        pub fn require_salesforce_password(&self) -> anyhow::Result<&str> {
            self.salesforce_password
                .as_deref()
                .context("SALESFORCE_PASSWORD is required")
        }

        pub fn require_salesforce_token(&self) -> anyhow::Result<&str> {
            self.salesforce_token
                .as_deref()
                .context("SALESFORCE_TOKEN is required")
        }

        pub fn require_salesforce_client_id(&self) -> anyhow::Result<&str> {
            self.salesforce_client_id
                .as_deref()
                .context("SALESFORCE_CLIENT_ID is required")
        }

        pub fn require_salesforce_client_secret(&self) -> anyhow::Result<&str> {
            self.salesforce_client_secret
                .as_deref()
                .context("SALESFORCE_CLIENT_SECRET is required")
        }
    }
}

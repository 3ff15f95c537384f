use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub http: HttpConfig,
    /// Headers sent with every request of every session
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub key: Option<String>,
    pub pass: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout: Option<u64>,
    /// User-Agent header value
    pub agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            key: None,
            pass: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Some(30),
            agent: Some(concat!("restmodel/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl ClientConfig {
    /// Configuration for the given base url with everything else defaulted
    pub fn for_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.api.url = url.into();
        config
    }

    /// Load configuration from defaults, an optional `restmodel` config
    /// file and `RESTMODEL_` environment variables, in that order.
    pub fn load() -> Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&ClientConfig::default())?);

        config = config.add_source(config::File::with_name("restmodel").required(false));

        // RESTMODEL_API_URL, RESTMODEL_API_KEY, RESTMODEL_HTTP_TIMEOUT ...
        config = config.add_source(
            config::Environment::with_prefix("RESTMODEL")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let client_config: ClientConfig = config.try_deserialize()?;

        Ok(client_config)
    }

    /// Join the base url and an endpoint path
    pub fn endpoint_url(&self, path: &str) -> String {
        let base = self.api.url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

use std::time::Duration;
use thiserror::Error;

const DEFAULT_FIRECRAWL_URL: &str = "https://api.firecrawl.dev";
const DEFAULT_MARKETPLACE_URL: &str = "https://listado.mercadolibre.com.co";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Process-wide settings, read once at start-up and handed to the adapters.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub llm: LlmConfig,
    pub search: SearchDefaults,
    pub http: HttpConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_key: String,
    pub base_url: String,
    pub marketplace_url: String,
    pub max_age: Duration,
    pub wait_for: Duration,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct SearchDefaults {
    pub results_cap: usize,
    pub currency: String,
    pub stream_capacity: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            results_cap: 10,
            currency: "COP".into(),
            stream_capacity: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub body_limit: usize,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let fetch = FetchConfig {
            api_key: required("FIRECRAWL_API_KEY")?,
            base_url: base_url(get("FIRECRAWL_BASE_URL"), DEFAULT_FIRECRAWL_URL),
            marketplace_url: base_url(get("MARKETPLACE_BASE_URL"), DEFAULT_MARKETPLACE_URL),
            max_age: Duration::from_secs(
                parse_or(get("FETCH_MAX_AGE_HOURS"), "FETCH_MAX_AGE_HOURS", 48u64)? * 3600,
            ),
            wait_for: Duration::from_millis(parse_or(
                get("FETCH_WAIT_FOR_MS"),
                "FETCH_WAIT_FOR_MS",
                3000u64,
            )?),
        };

        let llm = LlmConfig {
            api_key: required("OPENAI_API_KEY")?,
            base_url: base_url(get("OPENAI_BASE_URL"), DEFAULT_OPENAI_URL),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
        };

        let defaults = SearchDefaults::default();
        let search = SearchDefaults {
            results_cap: positive(
                parse_or(get("SEARCH_RESULTS_CAP"), "SEARCH_RESULTS_CAP", defaults.results_cap)?,
                "SEARCH_RESULTS_CAP",
            )?,
            currency: get("SEARCH_DEFAULT_CURRENCY").unwrap_or(defaults.currency),
            stream_capacity: positive(
                parse_or(
                    get("STREAM_CHANNEL_CAPACITY"),
                    "STREAM_CHANNEL_CAPACITY",
                    defaults.stream_capacity,
                )?,
                "STREAM_CHANNEL_CAPACITY",
            )?,
        };

        let http = HttpConfig {
            timeout: Duration::from_secs(parse_or(
                get("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                90u64,
            )?),
            connect_timeout: Duration::from_secs(parse_or(
                get("HTTP_CONNECT_TIMEOUT_SECS"),
                "HTTP_CONNECT_TIMEOUT_SECS",
                5u64,
            )?),
        };

        let server = ServerConfig {
            port: parse_or(get("PORT"), "PORT", 8000u16)?,
            body_limit: positive(
                parse_or(get("REQUEST_MAX_BYTES"), "REQUEST_MAX_BYTES", 64 * 1024usize)?,
                "REQUEST_MAX_BYTES",
            )?,
            metrics_key: get("METRICS_KEY"),
            openapi_key: get("OPENAPI_KEY"),
        };

        Ok(Self {
            fetch,
            llm,
            search,
            http,
            server,
        })
    }
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn positive(value: usize, key: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

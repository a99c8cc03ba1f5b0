use anyhow::Result;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub http_timeout: Duration,
    pub page_size: u32,
    pub query: QueryDefaults,
    pub search: SearchConfig,
}

/// Defaults applied to every read that does not override them
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefaults {
    /// Age below which cached data is served without refetching
    pub stale_time: Duration,
    /// Age above which cached data is no longer served
    pub cache_time: Duration,
    /// Extra attempts for transient read failures
    pub retry: u32,
    /// Delay before the first retry, doubled for every following one
    pub retry_delay: Duration,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            cache_time: Duration::from_secs(5 * 60),
            retry: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Search engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub debounce: Duration,
    pub min_query_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            min_query_length: 2,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (don't fail if it doesn't)
        let _ = dotenvy::dotenv();

        let api_url = std::env::var("ONEBOX_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        let http_timeout = Duration::from_secs(
            std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        );

        let page_size = std::env::var("INBOX_PAGE_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()?;
        if page_size == 0 {
            anyhow::bail!("INBOX_PAGE_SIZE must be greater than zero");
        }

        let defaults = QueryDefaults::default();
        let query = QueryDefaults {
            stale_time: env_millis("QUERY_STALE_TIME_MS", defaults.stale_time)?,
            cache_time: env_millis("QUERY_CACHE_TIME_MS", defaults.cache_time)?,
            retry: std::env::var("QUERY_RETRY")
                .unwrap_or_else(|_| defaults.retry.to_string())
                .parse()?,
            retry_delay: env_millis("QUERY_RETRY_DELAY_MS", defaults.retry_delay)?,
        };

        if query.cache_time < query.stale_time {
            anyhow::bail!("QUERY_CACHE_TIME_MS must not be smaller than QUERY_STALE_TIME_MS");
        }

        let search_defaults = SearchConfig::default();
        let search = SearchConfig {
            debounce: env_millis("SEARCH_DEBOUNCE_MS", search_defaults.debounce)?,
            min_query_length: std::env::var("SEARCH_MIN_QUERY_LENGTH")
                .unwrap_or_else(|_| search_defaults.min_query_length.to_string())
                .parse()?,
        };

        Ok(Config {
            api_url,
            http_timeout,
            page_size,
            query,
            search,
        })
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => Ok(Duration::from_millis(value.trim().parse()?)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let query = QueryDefaults::default();
        assert_eq!(query.stale_time, Duration::from_secs(30));
        assert_eq!(query.cache_time, Duration::from_secs(300));
        assert_eq!(query.retry, 3);

        let search = SearchConfig::default();
        assert_eq!(search.debounce, Duration::from_millis(300));
        assert_eq!(search.min_query_length, 2);
    }

    #[test]
    fn test_env_millis_falls_back_to_default() {
        let value = env_millis("ONEBOX_TEST_UNSET_VARIABLE", Duration::from_millis(42)).unwrap();
        assert_eq!(value, Duration::from_millis(42));
    }
}

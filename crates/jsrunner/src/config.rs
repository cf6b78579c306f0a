//! Configuration for sessions and event-loop runners.

use std::fmt;
use std::time::Duration;

/// Default timeout for the fetch helpers.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Network access granted to scripts.
///
/// Enabling it installs `fetchText(url)` and `fetchJSON(url)`.
#[derive(Clone)]
pub struct WebAccessConfig {
    /// Client used for requests. When `None` a client is built with `timeout`.
    pub client: Option<reqwest::blocking::Client>,

    /// Per-request timeout for the built-in client.
    /// Default: 10 seconds
    pub timeout: Duration,
}

impl Default for WebAccessConfig {
    fn default() -> Self {
        Self {
            client: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl fmt::Debug for WebAccessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebAccessConfig")
            .field("client", &self.client.as_ref().map(|_| "custom"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebAccessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (retries, TLS, proxies).
    pub fn client(mut self, client: reqwest::blocking::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the timeout for the built-in client.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Engine settings shared by [`Session`](crate::Session) and
/// [`EventLoopRunner`](crate::EventLoopRunner).
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Heap limit in bytes. `None` leaves the engine default.
    pub memory_limit: Option<usize>,

    /// Stack limit in bytes. `None` leaves the engine default.
    pub max_stack_size: Option<usize>,

    /// Network helpers. `None` installs helpers that refuse every call.
    pub web_access: Option<WebAccessConfig>,
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Enable the fetch helpers.
    pub fn web_access(mut self, web: WebAccessConfig) -> Self {
        self.web_access = Some(web);
        self
    }

    pub fn web_access_enabled(&self) -> bool {
        self.web_access.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert!(config.memory_limit.is_none());
        assert!(config.max_stack_size.is_none());
        assert!(!config.web_access_enabled());
        assert_eq!(WebAccessConfig::default().timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = RunnerConfig::new()
            .memory_limit(64 * 1024 * 1024)
            .max_stack_size(512 * 1024)
            .web_access(WebAccessConfig::new().timeout(Duration::from_secs(2)));

        assert_eq!(config.memory_limit, Some(64 * 1024 * 1024));
        assert_eq!(config.max_stack_size, Some(512 * 1024));
        let web = config.web_access.as_ref().map(|w| w.timeout);
        assert_eq!(web, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_debug_hides_client() {
        let web = WebAccessConfig::new().client(reqwest::blocking::Client::new());
        let rendered = format!("{:?}", web);
        assert!(rendered.contains("custom"));
    }
}

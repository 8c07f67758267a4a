//! HTTP client shared by the release resolver and the asset fetcher

use reqwest::RequestBuilder;

/// Public GitHub API endpoint
pub const GITHUB_API: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("kiln/", env!("CARGO_PKG_VERSION"));

/// GitHub release client
///
/// Every request carries `authorization: bearer <token>` when a token is
/// configured.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl ReleaseClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(GITHUB_API, token)
    }

    /// Point the client at another API root (GitHub Enterprise, tests)
    pub fn with_base_url(api_base: impl Into<String>, token: Option<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            api_base,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        let request = self.http.get(url).header("user-agent", USER_AGENT);
        match &self.token {
            Some(token) => request.header("authorization", format!("bearer {}", token)),
            None => request,
        }
    }
}

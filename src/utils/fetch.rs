use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::constants::HTTP_TIMEOUT_SECS;

/// Blocking HTTP GET seam, so collectors and the metadata lookup can be
/// exercised without network access.
pub trait HttpFetcher: Send + Sync {
    /// Fetch `url` and return the response body.
    ///
    /// Non-success HTTP statuses are errors.
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>>;
}

/// Real fetcher backed by `reqwest`'s blocking client.
///
/// Requests go through the environment's proxy settings, except those to
/// hosts named as direct, which are always reached without a proxy.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
    direct: reqwest::blocking::Client,
    direct_hosts: Vec<String>,
}

impl ReqwestFetcher {
    /// `direct_urls` name the endpoints that must bypass any proxy
    pub fn new(direct_urls: &[&str]) -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT_SECS, direct_urls)
    }

    pub fn with_timeout(timeout_secs: u64, direct_urls: &[&str]) -> Result<Self> {
        let builder = || {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .user_agent(concat!("hpc-diag/", env!("CARGO_PKG_VERSION")))
        };
        let client = builder().build().context("Failed to create HTTP client")?;
        let direct = builder()
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        let direct_hosts = direct_urls.iter().filter_map(|url| host_of(url)).collect();
        Ok(Self {
            client,
            direct,
            direct_hosts,
        })
    }

    fn client_for(&self, url: &str) -> &reqwest::blocking::Client {
        match host_of(url) {
            Some(host) if self.direct_hosts.contains(&host) => &self.direct,
            _ => &self.client,
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!("GET {}", url);

        let mut request = self.client_for(url).get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .context(format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP {} from {}", response.status(), url));
        }

        let body = response
            .bytes()
            .context(format!("Failed to read response body from {}", url))?;
        Ok(body.to_vec())
    }
}

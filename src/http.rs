//! The single outbound HTTP client shared by every adapter.
//!
//! Builds exactly one `reqwest::Client` and reuses it for every call rather
//! than letting each call site construct its own. Adapters never build a
//! `reqwest::Client` themselves; they go through [`AcquirerHttp::post_*`].

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};

/// Outbound HTTP client for acquirer calls, built once per orchestrator and
/// shared across every concurrent request task.
///
/// A small number of legacy acquirer test endpoints ship expired or
/// self-signed certificates; [`OrchestratorConfig::tls_verify_relaxed_hosts`]
/// opts specific hostnames into a second client with certificate
/// verification disabled, so the relaxation never leaks to hosts that didn't
/// ask for it.
#[derive(Debug, Clone)]
pub struct AcquirerHttp {
    strict: Client,
    relaxed: Client,
    config: OrchestratorConfig,
}

impl AcquirerHttp {
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let strict = Client::builder()
            .timeout(config.acquirer_timeout)
            .build()
            .map_err(Error::Http)?;
        let relaxed = Client::builder()
            .timeout(config.acquirer_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { strict, relaxed, config })
    }

    fn client_for(&self, url: &str) -> &Client {
        let host = reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
        match host {
            Some(h) if self.config.tls_relaxed_for(&h) => &self.relaxed,
            _ => &self.strict,
        }
    }

    /// POST a raw body with an explicit content type, returning the response body as bytes.
    pub async fn post_raw(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        debug!(url, content_type, "posting to acquirer");
        let client = self.client_for(url);
        let result = client
            .post(url)
            .header("Content-Type", content_type)
            .body(body)
            .timeout(self.config.acquirer_timeout)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(url, "acquirer request timed out");
                return Err(Error::Network(format!("timeout contacting {url}")));
            }
            Err(e) => return Err(Error::Network(e.to_string())),
        };

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| Error::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(url, %status, "acquirer returned a non-2xx status");
        }
        Ok(bytes.to_vec())
    }

    /// POST a form-encoded body.
    pub async fn post_form(&self, url: &str, body: &str) -> Result<String> {
        let bytes = self.post_raw(url, "application/x-www-form-urlencoded; charset=utf-8", body.as_bytes().to_vec()).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// POST an ISO-8859-9-declared XML body (Garanti/Payten/YKB/VakıfBank).
    pub async fn post_xml_bytes(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        self.post_raw(url, "text/xml; charset=ISO-8859-9", body).await
    }

    /// POST a JSON body with extra headers (iyzico's `IYZWS`/`x-iyzi-rnd` auth).
    pub async fn post_json_with_headers(&self, url: &str, body: &[u8], headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!(url, "posting JSON to acquirer");
        let client = self.client_for(url);
        let mut request = client.post(url).header("Content-Type", "application/json").timeout(self.config.acquirer_timeout);
        for (k, v) in headers {
            request = request.header(*k, *v);
        }
        let result = request.body(body.to_vec()).send().await;
        let response = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(Error::Network(format!("timeout contacting {url}"))),
            Err(e) => return Err(Error::Network(e.to_string())),
        };
        let bytes = response.bytes().await.map_err(|e| Error::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    pub fn timeout(&self) -> Duration {
        self.config.acquirer_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_client_chosen_only_for_opted_in_host() {
        let config = OrchestratorConfig::new("key", "https://pay.example.com").with_relaxed_tls_host("legacy.bank.example");
        let http = AcquirerHttp::new(config).unwrap();
        assert!(std::ptr::eq(http.client_for("https://legacy.bank.example/x"), &http.relaxed));
        assert!(std::ptr::eq(http.client_for("https://other.bank.example/x"), &http.strict));
    }
}

//! Orchestrator-wide configuration.

use std::time::Duration;

/// Configuration shared by the orchestrator, stores, and adapters.
///
/// Built once at process startup and passed down by reference/`Arc`; nothing
/// in this crate re-reads the environment per request.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Master key used to derive per-field encryption keys for credentials and card data.
    ///
    /// Expected to come from `VPOS_MASTER_KEY`. Never logged, never serialized.
    pub master_key: String,

    /// Base URL the callback endpoint is reachable at from the public internet,
    /// e.g. `https://pay.example.com`. Used to build `<base>/payment/<id>/callback`.
    pub callback_base_url: String,

    /// Base URL of the injected BIN-lookup resolver, when using the HTTP-backed resolver.
    pub bin_api_url: Option<String>,

    /// Timeout for outbound acquirer HTTP calls.
    pub acquirer_timeout: Duration,

    /// Timeout for BIN-lookup calls.
    pub bin_lookup_timeout: Duration,

    /// Hostnames for which TLS certificate verification is relaxed.
    ///
    /// This is a documented security concession for legacy acquirer test
    /// endpoints; it must be opted into per host, never globally.
    pub tls_verify_relaxed_hosts: Vec<String>,
}

impl OrchestratorConfig {
    /// Build a configuration from a master key and callback base URL, with
    /// the documented defaults for the rest (30s acquirer timeout, 5s BIN
    /// lookup timeout, no relaxed-TLS hosts).
    pub fn new(master_key: impl Into<String>, callback_base_url: impl Into<String>) -> Self {
        Self {
            master_key: master_key.into(),
            callback_base_url: callback_base_url.into(),
            bin_api_url: None,
            acquirer_timeout: Duration::from_secs(30),
            bin_lookup_timeout: Duration::from_secs(5),
            tls_verify_relaxed_hosts: Vec::new(),
        }
    }

    /// Set the BIN resolver's base URL.
    pub fn with_bin_api_url(mut self, url: impl Into<String>) -> Self {
        self.bin_api_url = Some(url.into());
        self
    }

    /// Opt a specific acquirer hostname into relaxed TLS verification.
    pub fn with_relaxed_tls_host(mut self, host: impl Into<String>) -> Self {
        self.tls_verify_relaxed_hosts.push(host.into());
        self
    }

    /// Build the callback URL for a given transaction id.
    pub fn callback_url(&self, transaction_id: &str) -> String {
        format!(
            "{}/payment/{}/callback",
            self.callback_base_url.trim_end_matches('/'),
            transaction_id
        )
    }

    pub(crate) fn tls_relaxed_for(&self, host: &str) -> bool {
        self.tls_verify_relaxed_hosts.iter().any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_strips_trailing_slash() {
        let cfg = OrchestratorConfig::new("k", "https://pay.example.com/");
        assert_eq!(
            cfg.callback_url("tx_123"),
            "https://pay.example.com/payment/tx_123/callback"
        );
    }

    #[test]
    fn relaxed_tls_host_opt_in() {
        let cfg = OrchestratorConfig::new("k", "https://pay.example.com")
            .with_relaxed_tls_host("legacy.bank.example");
        assert!(cfg.tls_relaxed_for("legacy.bank.example"));
        assert!(!cfg.tls_relaxed_for("other.bank.example"));
    }
}

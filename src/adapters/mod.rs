//! Provider-adapter framework: the shared contract every acquirer-specific
//! adapter implements, plus the registry that dispatches a [`ProviderTag`] to
//! a concrete adapter.

mod garanti;
mod iyzico;
mod payten;
mod qnb;
mod vakifbank;
mod ykb;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::terminal::ProviderTag;
use crate::types::{NewCard, Terminal, Transaction};
use crate::config::OrchestratorConfig;

/// Static descriptor of which optional [`ProviderAdapter`] operations a
/// concrete adapter actually implements, surfaced by `capabilities()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub three_ds: bool,
    pub direct_payment: bool,
    pub refund: bool,
    pub cancel: bool,
    pub status: bool,
    pub history: bool,
    pub pre_auth: bool,
}

/// The capability interface every acquirer adapter implements.
///
/// Concrete adapters override the operations they support and advertise the
/// rest via [`ProviderAdapter::capabilities`]; the unsupported defaults below
/// all fail with [`Error::NotImplemented`], the same way an unregistered
/// provider tag fails early rather than silently falling through.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Prepares the 3-D flow, persisting an adapter-opaque envelope into
    /// `tx.secure`. Mutates `tx.status` to `processing` on success or
    /// `failed` on a hard rejection (e.g. VakıfBank enrollment denial);
    /// leaves it untouched on a retryable error so the caller can retry.
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()>;

    /// Renders the auto-submitting HTML redirect to the issuer ACS. Fails
    /// with `Error::State` if `tx.secure` carries no envelope for this adapter.
    fn get_form_html(&self, tx: &Transaction, terminal: &Terminal) -> Result<String>;

    /// Validates the bank's callback POST and, on a passing 3-D status, goes
    /// on to provision. Sets `tx.status`/`tx.result` to the final outcome.
    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()>;

    /// Sends the financial authorization call. On success, clears the CVV
    /// and records `authCode`/`refNumber`; on failure records `{code, message}`.
    async fn process_provision(&self, _tx: &mut Transaction, _terminal: &Terminal, _http: &AcquirerHttp, _config: &OrchestratorConfig) -> Result<()> {
        Err(Error::NotImplemented("process_provision".into()))
    }

    /// Non-3-D authorization, posting card fields directly.
    async fn direct_payment(&self, _tx: &mut Transaction, _terminal: &Terminal, _card: &NewCard, _http: &AcquirerHttp, _config: &OrchestratorConfig) -> Result<()> {
        Err(Error::NotImplemented("direct_payment".into()))
    }

    /// Inverse financial operation keyed by `original`'s `refNumber`; on
    /// success sets `original.refunded_at`.
    async fn refund(&self, _original: &mut Transaction, _terminal: &Terminal, _http: &AcquirerHttp) -> Result<()> {
        Err(Error::NotImplemented("refund".into()))
    }

    /// Inverse financial operation keyed by `original`'s `refNumber`; on
    /// success sets `original.cancelled_at`.
    async fn cancel(&self, _original: &mut Transaction, _terminal: &Terminal, _http: &AcquirerHttp) -> Result<()> {
        Err(Error::NotImplemented("cancel".into()))
    }

    /// Read-only status query against the acquirer.
    async fn status(&self, _order_id: &str, _terminal: &Terminal, _http: &AcquirerHttp) -> Result<serde_json::Value> {
        Err(Error::NotImplemented("status".into()))
    }

    /// Read-only history query against the acquirer.
    async fn history(&self, _order_id: &str, _terminal: &Terminal, _http: &AcquirerHttp) -> Result<serde_json::Value> {
        Err(Error::NotImplemented("history".into()))
    }

    /// First phase of a two-phase capture, where the acquirer supports it.
    async fn pre_auth(&self, _tx: &mut Transaction, _terminal: &Terminal, _card: &NewCard, _http: &AcquirerHttp, _config: &OrchestratorConfig) -> Result<()> {
        Err(Error::NotImplemented("pre_auth".into()))
    }

    /// Second phase of a two-phase capture, completing a prior `pre_auth`.
    async fn post_auth(&self, _tx: &mut Transaction, _terminal: &Terminal, _http: &AcquirerHttp, _config: &OrchestratorConfig) -> Result<()> {
        Err(Error::NotImplemented("post_auth".into()))
    }

    fn capabilities(&self) -> Capabilities;
}

/// Resolve a [`ProviderTag`] to its concrete adapter.
///
/// `paytr`, `sigmapay`, and `kuveytturk` are registered tags with no
/// bit-exact adapter in this core; they are registry stubs, not silently
/// passing no-ops, so dispatch fails early with [`Error::NotImplemented`].
pub fn build_adapter(tag: ProviderTag) -> Result<Box<dyn ProviderAdapter>> {
    match tag {
        ProviderTag::Garanti => Ok(Box::new(garanti::GarantiAdapter)),
        ProviderTag::Payten | ProviderTag::Akbank | ProviderTag::Denizbank => Ok(Box::new(payten::PaytenAdapter)),
        ProviderTag::Ykb => Ok(Box::new(ykb::YkbAdapter)),
        ProviderTag::Vakifbank => Ok(Box::new(vakifbank::VakifbankAdapter)),
        ProviderTag::Qnb => Ok(Box::new(qnb::QnbAdapter)),
        ProviderTag::Iyzico => Ok(Box::new(iyzico::IyzicoAdapter)),
        ProviderTag::Paytr | ProviderTag::Sigmapay | ProviderTag::Kuveytturk => {
            Err(Error::NotImplemented(format!("no adapter registered for provider tag {:?}", tag)))
        }
    }
}

/// Render a minimal auto-submitting HTML form, the shared shape every
/// form-redirect adapter (Garanti/Payten/YKB/VakıfBank) serves from
/// `get_form_html`.
pub(crate) fn render_autosubmit_form(action: &str, fields: &[(&str, &str)]) -> String {
    let inputs: String = fields
        .iter()
        .map(|(k, v)| format!("<input type=\"hidden\" name=\"{}\" value=\"{}\">", html_escape(k), html_escape(v)))
        .collect();
    format!(
        "<!DOCTYPE html><html><body onload=\"document.forms[0].submit()\">\
<form method=\"POST\" action=\"{}\">{}</form></body></html>",
        html_escape(action),
        inputs
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_tags_fail_early() {
        assert!(matches!(build_adapter(ProviderTag::Paytr), Err(Error::NotImplemented(_))));
        assert!(matches!(build_adapter(ProviderTag::Sigmapay), Err(Error::NotImplemented(_))));
        assert!(matches!(build_adapter(ProviderTag::Kuveytturk), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn payten_family_shares_one_adapter() {
        assert!(build_adapter(ProviderTag::Akbank).is_ok());
        assert!(build_adapter(ProviderTag::Denizbank).is_ok());
        assert!(build_adapter(ProviderTag::Payten).is_ok());
    }

    #[test]
    fn autosubmit_form_escapes_field_values() {
        let html = render_autosubmit_form("https://bank.example/3d", &[("secure3dhash", "AB\"CD")]);
        assert!(html.contains("&quot;"));
        assert!(html.contains("onload=\"document.forms[0].submit()\""));
    }
}

//! Payten/NestPay adapter: shared by Akbank, Denizbank-class resellers, and
//! directly-branded Payten terminals.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{render_autosubmit_form, Capabilities, ProviderAdapter};
use crate::codec::form_urlencode;
use crate::config::OrchestratorConfig;
use crate::crypto::{aes_decrypt_field, sha512_pack_base64};
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::transaction::{SecureEnvelope, TransactionResult, TransactionStatus};
use crate::types::{LogType, NewCard, Terminal, Transaction};

const TEST_GATE_URL: &str = "https://entegrasyon.nestpay.com.tr/fim/est3Dgate";
const PROD_GATE_URL: &str = "https://sanalpos.bankasi.com.tr/fim/est3Dgate";
const TEST_API_URL: &str = "https://entegrasyon.nestpay.com.tr/fim/api";
const PROD_API_URL: &str = "https://sanalpos.bankasi.com.tr/fim/api";

fn gate_url(terminal: &Terminal) -> &'static str {
    if terminal.test_mode {
        TEST_GATE_URL
    } else {
        PROD_GATE_URL
    }
}

fn api_url(terminal: &Terminal) -> &'static str {
    if terminal.test_mode {
        TEST_API_URL
    } else {
        PROD_API_URL
    }
}

fn escape_payten(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

/// Hash chain v3: keys sorted case-insensitively, `hash`/`encoding` excluded,
/// each escaped value followed by `|`, then the escaped store key, then
/// `base64(hex(sha512(...)).as_bytes())`.
fn hash_v3(fields: &[(&str, String)], store_key: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = fields
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("hash") && !k.eq_ignore_ascii_case("encoding"))
        .collect();
    sorted.sort_by(|(a, _), (b, _)| a.to_lowercase().cmp(&b.to_lowercase()));

    let mut hash_val = String::new();
    for (_, v) in sorted {
        hash_val.push_str(&escape_payten(v));
        hash_val.push('|');
    }
    hash_val.push_str(&escape_payten(store_key));
    sha512_pack_base64(hash_val.as_bytes())
}

fn installment_field(count: u8) -> String {
    if count <= 1 {
        String::new()
    } else {
        count.to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "CC5Request")]
struct Cc5Request {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "ClientId")]
    client_id: String,
    #[serde(rename = "OrderId")]
    order_id: String,
    #[serde(rename = "Type")]
    r#type: String,
    #[serde(rename = "Number", skip_serializing_if = "Option::is_none")]
    number: Option<String>,
    #[serde(rename = "Expires", skip_serializing_if = "Option::is_none")]
    expires: Option<String>,
    #[serde(rename = "Cvv2Val", skip_serializing_if = "Option::is_none")]
    cvv2: Option<String>,
    #[serde(rename = "Total")]
    total: String,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Taksit", skip_serializing_if = "String::is_empty")]
    taksit: String,
    #[serde(rename = "PayerTxnId", skip_serializing_if = "Option::is_none")]
    payer_txn_id: Option<String>,
    #[serde(rename = "PayerSecurityLevel", skip_serializing_if = "Option::is_none")]
    payer_security_level: Option<String>,
    #[serde(rename = "PayerAuthenticationCode", skip_serializing_if = "Option::is_none")]
    payer_authentication_code: Option<String>,
    #[serde(rename = "Mode")]
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "CC5Response")]
struct Cc5Response {
    #[serde(rename = "Response", default)]
    response: Option<String>,
    #[serde(rename = "ProcReturnCode", default)]
    proc_return_code: Option<String>,
    #[serde(rename = "ErrMsg", default)]
    err_msg: Option<String>,
    #[serde(rename = "AuthCode", default)]
    auth_code: Option<String>,
    #[serde(rename = "HostRefNum", default)]
    host_ref_num: Option<String>,
}

pub struct PaytenAdapter;

#[async_trait]
impl ProviderAdapter for PaytenAdapter {
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, _card: &NewCard, _http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let store_key = aes_decrypt_field(&terminal.three_ds.store_key, &config.master_key)?;
        let callback_url = config.callback_url(tx.id.as_str());
        let amount = tx.amount.to_decimal_str();
        let installment = installment_field(tx.installment.value());

        let mut fields: Vec<(&str, String)> = vec![
            ("clientid", terminal.credentials.merchant_id.clone()),
            ("oid", tx.id.as_str().to_string()),
            ("amount", amount.clone()),
            ("okUrl", callback_url.clone()),
            ("failUrl", callback_url.clone()),
            ("islemtipi", "Auth".to_string()),
            ("taksit", installment.clone()),
            ("currency", tx.amount.currency.numeric().to_string()),
            ("storetype", "3d".to_string()),
            ("lang", "tr".to_string()),
            ("rnd", crate::crypto::base64_encode(tx.id.as_str().as_bytes())),
        ];
        let hash = hash_v3(&fields, &store_key);
        fields.push(("hash", hash));

        let payload: serde_json::Value = serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                .collect(),
        );

        tx.append_log(LogType::Init, serde_json::json!({ "clientId": terminal.credentials.merchant_id }), payload.clone());
        tx.secure.envelope = Some(SecureEnvelope::Payten(payload));
        tx.transition(TransactionStatus::Processing)?;
        Ok(())
    }

    fn get_form_html(&self, tx: &Transaction, terminal: &Terminal) -> Result<String> {
        let envelope = tx.secure.envelope.as_ref().ok_or_else(|| Error::State("no 3-D form data for this transaction".into()))?;
        let SecureEnvelope::Payten(payload) = envelope else {
            return Err(Error::State("secure envelope is not a Payten payload".into()));
        };
        let object = payload.as_object().ok_or_else(|| Error::State("malformed Payten form payload".into()))?;
        let fields: Vec<(&str, &str)> = object.iter().map(|(k, v)| (k.as_str(), v.as_str().unwrap_or_default())).collect();
        Ok(render_autosubmit_form(gate_url(terminal), &fields))
    }

    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let empty = String::new();
        let md_status = fields.get("mdStatus").unwrap_or(&empty);
        tx.append_log(LogType::ThreeDCallback, serde_json::json!(fields), serde_json::json!({ "mdStatus": md_status }));

        let accepted = terminal.spec.payten_accepted_md_status();
        if !accepted.iter().any(|s| s == md_status) {
            let response = fields.get("Response").cloned().unwrap_or_else(|| "Error".to_string());
            let err_msg = fields.get("ErrMsg").cloned().unwrap_or_else(|| format!("unexpected mdStatus {md_status}"));
            let proc_return_code = fields.get("ProcReturnCode").cloned().unwrap_or_default();
            tx.result = Some(TransactionResult::failure(proc_return_code, format!("{response}: {err_msg}")));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        // Carry the issuer's liability-shift evidence from the callback into
        // the envelope: process_provision reads it from here, never from the
        // initialize-time payload, which never had these fields.
        let xid = fields.get("xid").cloned().unwrap_or_default();
        let cavv = fields.get("cavv").cloned().unwrap_or_default();
        let eci = fields.get("eci").cloned();
        tx.secure.eci = eci;
        tx.secure.cavv = Some(cavv.clone());
        tx.secure.envelope = Some(SecureEnvelope::Payten(serde_json::json!({
            "xid": xid,
            "cavv": cavv,
            "mdStatus": md_status,
        })));

        self.process_provision(tx, terminal, http, config).await
    }

    async fn process_provision(&self, tx: &mut Transaction, terminal: &Terminal, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let password = aes_decrypt_field(&terminal.credentials.password, &config.master_key)?;
        let envelope = tx.secure.envelope.clone();
        let (payer_txn_id, payer_security_level, payer_auth_code) = match envelope {
            Some(SecureEnvelope::Payten(ref payload)) => (
                payload.get("xid").and_then(|v| v.as_str()).map(str::to_string),
                payload.get("mdStatus").and_then(|v| v.as_str()).map(str::to_string),
                payload.get("cavv").and_then(|v| v.as_str()).map(str::to_string),
            ),
            _ => (None, None, None),
        };

        let request = Cc5Request {
            name: terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
            password,
            client_id: terminal.credentials.merchant_id.clone(),
            order_id: tx.id.as_str().to_string(),
            r#type: "Auth".into(),
            number: None,
            expires: None,
            cvv2: None,
            total: tx.amount.to_decimal_str(),
            currency: tx.amount.currency.numeric().to_string(),
            taksit: installment_field(tx.installment.value()),
            payer_txn_id,
            payer_security_level,
            payer_authentication_code: payer_auth_code,
            mode: if terminal.test_mode { "TEST".into() } else { "PROD".into() },
        };

        let body = crate::codec::xml_build(&request)?;
        tx.append_log(LogType::Provision, serde_json::json!({ "orderId": tx.id.as_str() }), serde_json::Value::Null);
        let response_bytes = http.post_raw(api_url(terminal), "text/xml; charset=utf-8", body.into_bytes()).await?;
        let response_str = String::from_utf8_lossy(&response_bytes);
        let response: Cc5Response = crate::codec::xml_parse(&response_str)?;

        if response.response.as_deref() == Some("Approved") {
            tx.result = Some(TransactionResult::approved(response.auth_code.unwrap_or_default(), response.host_ref_num.unwrap_or_default()));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response.proc_return_code.unwrap_or_default();
            let message = response.err_msg.unwrap_or_else(|| "Payten provisioning was declined".into());
            tx.result = Some(TransactionResult::failure(code, message));
            tx.transition(TransactionStatus::Failed)?;
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            three_ds: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_v3_excludes_hash_and_encoding_keys() {
        let fields: Vec<(&str, String)> = vec![
            ("clientid", "100".to_string()),
            ("hash", "ignored".to_string()),
            ("encoding", "utf-8".to_string()),
        ];
        let with_extra = hash_v3(&fields, "storekey");
        let without_extra = hash_v3(&fields[..1], "storekey");
        assert_eq!(with_extra, without_extra);
    }

    #[test]
    fn escape_handles_backslash_before_pipe() {
        assert_eq!(escape_payten("a\\b|c"), "a\\\\b\\|c");
    }

    #[test]
    fn s3_denial_message_shape() {
        let mut fields = HashMap::new();
        fields.insert("Response".to_string(), "Error".to_string());
        fields.insert("ErrMsg".to_string(), "Red-Kart hatali".to_string());
        fields.insert("ProcReturnCode".to_string(), "12".to_string());
        let result = TransactionResult::failure(fields["ProcReturnCode"].clone(), format!("{}: {}", fields["Response"], fields["ErrMsg"]));
        assert_eq!(result.code.as_deref(), Some("12"));
        assert!(result.message.unwrap().contains("Red-Kart hatali"));
    }
}

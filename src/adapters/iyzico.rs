//! iyzico adapter: JSON over HTTPS, aggregator-style 3-D Secure with the
//! issuer-hosted HTML content returned inline rather than via ACS redirect
//! fields.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{Capabilities, ProviderAdapter};
use crate::codec::pki_string;
use crate::config::OrchestratorConfig;
use crate::crypto::{aes_decrypt_field, base64_decode, base64_encode, sha1_base64};
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::transaction::{SecureEnvelope, TransactionResult, TransactionStatus};
use crate::types::{LogType, NewCard, Terminal, Transaction};

const TEST_BASE_URL: &str = "https://sandbox-api.iyzipay.com";
const PROD_BASE_URL: &str = "https://api.iyzipay.com";

fn base_url(terminal: &Terminal) -> &'static str {
    if terminal.test_mode {
        TEST_BASE_URL
    } else {
        PROD_BASE_URL
    }
}

fn random_string() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect()
}

/// `IYZWS <apiKey>:<hash>` where `hash = sha1_base64(apiKey + randomString + apiSecret + pki_string(body))`.
fn auth_header(api_key: &str, api_secret: &str, random: &str, body: &serde_json::Value) -> (String, String) {
    let hash_input = format!("{api_key}{random}{api_secret}{}", pki_string(body));
    let hash = sha1_base64(hash_input.as_bytes());
    (format!("IYZWS {api_key}:{hash}"), random.to_string())
}

pub struct IyzicoAdapter;

impl IyzicoAdapter {
    fn initialize_body(&self, tx: &Transaction, terminal: &Terminal, config: &OrchestratorConfig, card: &NewCard) -> serde_json::Value {
        let callback_url = config.callback_url(tx.id.as_str());
        let expiry: Vec<&str> = card.expiry.split('/').collect();
        let month = expiry.first().copied().unwrap_or_default();
        let year = expiry.get(1).map(|yy| format!("20{yy}")).unwrap_or_default();

        serde_json::json!({
            "locale": "tr",
            "conversationId": tx.id.as_str(),
            "price": tx.amount.to_decimal_str(),
            "paidPrice": tx.amount.to_decimal_str(),
            "currency": tx.amount.currency.alpha3(),
            "installment": tx.installment.value(),
            "basketId": tx.id.as_str(),
            "paymentChannel": "WEB",
            "paymentGroup": "PRODUCT",
            "callbackUrl": callback_url,
            "paymentCard": {
                "cardHolderName": card.holder,
                "cardNumber": card.number,
                "expireMonth": month,
                "expireYear": year,
                "cvc": card.cvv,
            },
            "buyer": {
                "id": tx.company,
                "name": tx.customer.name.clone().unwrap_or_else(|| card.holder.clone()),
                "email": tx.customer.email.clone().unwrap_or_default(),
                "ip": tx.customer.ip.clone().unwrap_or_default(),
            },
        })
    }
}

#[async_trait]
impl ProviderAdapter for IyzicoAdapter {
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let api_key = terminal.credentials.merchant_id.clone();
        let api_secret = aes_decrypt_field(
            terminal.credentials.secret_key.as_deref().ok_or_else(|| Error::Validation("iyzico terminal is missing a secretKey".into()))?,
            &config.master_key,
        )?;

        let body = self.initialize_body(tx, terminal, config, card);
        let random = random_string();
        let (authorization, rnd) = auth_header(&api_key, &api_secret, &random, &body);

        let url = format!("{}/payment/3dsecure/initialize", base_url(terminal));
        tx.append_log(LogType::Init, serde_json::json!({ "conversationId": tx.id.as_str() }), serde_json::Value::Null);
        let response_bytes = http
            .post_json_with_headers(&url, serde_json::to_vec(&body)?.as_slice(), &[("Authorization", &authorization), ("x-iyzi-rnd", &rnd)])
            .await?;
        let response: serde_json::Value = serde_json::from_slice(&response_bytes)?;

        if response["status"].as_str() != Some("success") {
            let message = response["errorMessage"].as_str().unwrap_or("iyzico 3-D Secure initialization failed").to_string();
            let code = response["errorCode"].as_str().unwrap_or_default().to_string();
            tx.result = Some(TransactionResult::failure(code, message));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        let html_content = response["threeDSHtmlContent"].as_str().unwrap_or_default().to_string();
        tx.secure.envelope = Some(SecureEnvelope::Iyzico(serde_json::json!({
            "htmlContent": html_content,
            "conversationId": tx.id.as_str(),
        })));
        tx.transition(TransactionStatus::Processing)?;
        Ok(())
    }

    fn get_form_html(&self, tx: &Transaction, _terminal: &Terminal) -> Result<String> {
        let envelope = tx.secure.envelope.as_ref().ok_or_else(|| Error::State("no 3-D form data for this transaction".into()))?;
        let SecureEnvelope::Iyzico(payload) = envelope else {
            return Err(Error::State("secure envelope is not an iyzico payload".into()));
        };
        let encoded = payload["htmlContent"].as_str().ok_or_else(|| Error::State("iyzico envelope has no htmlContent".into()))?;
        let html_bytes = base64_decode(encoded)?;
        String::from_utf8(html_bytes).map_err(|e| Error::State(format!("iyzico htmlContent is not valid utf-8: {e}")))
    }

    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let empty = String::new();
        let status = fields.get("status").unwrap_or(&empty);
        tx.append_log(LogType::ThreeDCallback, serde_json::json!(fields), serde_json::json!({ "status": status }));

        if status != "success" {
            tx.result = Some(TransactionResult::failure("3ds_auth_failed", "iyzico 3-D Secure authentication was not successful"));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        tx.secure.envelope = Some(SecureEnvelope::Iyzico(serde_json::json!({
            "paymentId": fields.get("paymentId").cloned().unwrap_or_default(),
            "conversationData": fields.get("conversationData").cloned().unwrap_or_default(),
            "conversationId": tx.id.as_str(),
        })));

        self.process_provision(tx, terminal, http, config).await
    }

    async fn process_provision(&self, tx: &mut Transaction, terminal: &Terminal, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let api_key = terminal.credentials.merchant_id.clone();
        let api_secret = aes_decrypt_field(
            terminal.credentials.secret_key.as_deref().ok_or_else(|| Error::Validation("iyzico terminal is missing a secretKey".into()))?,
            &config.master_key,
        )?;

        let envelope = tx.secure.envelope.clone();
        let Some(SecureEnvelope::Iyzico(payload)) = envelope else {
            return Err(Error::State("iyzico provisioning requires a completed callback envelope".into()));
        };
        let payment_id = payload["paymentId"].as_str().unwrap_or_default().to_string();
        let conversation_data = payload["conversationData"].as_str().unwrap_or_default().to_string();

        let body = serde_json::json!({
            "locale": "tr",
            "conversationId": tx.id.as_str(),
            "paymentId": payment_id,
            "conversationData": conversation_data,
        });
        let random = random_string();
        let (authorization, rnd) = auth_header(&api_key, &api_secret, &random, &body);

        let url = format!("{}/payment/3dsecure/auth", base_url(terminal));
        tx.append_log(LogType::Provision, serde_json::json!({ "paymentId": payment_id }), serde_json::Value::Null);
        let response_bytes = http
            .post_json_with_headers(&url, serde_json::to_vec(&body)?.as_slice(), &[("Authorization", &authorization), ("x-iyzi-rnd", &rnd)])
            .await?;
        let response: serde_json::Value = serde_json::from_slice(&response_bytes)?;

        if response["status"].as_str() == Some("success") {
            tx.result = Some(TransactionResult::approved(
                response["authCode"].as_str().unwrap_or_default(),
                response["paymentId"].as_str().unwrap_or_default(),
            ));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response["errorCode"].as_str().unwrap_or_default().to_string();
            let message = response["errorMessage"].as_str().unwrap_or("iyzico provisioning was declined").to_string();
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
    fn auth_header_is_reproducible_for_fixed_inputs() {
        let body = serde_json::json!({ "locale": "tr", "price": "1.0" });
        let (a, _) = auth_header("key", "secret", "fixed-random", &body);
        let (b, _) = auth_header("key", "secret", "fixed-random", &body);
        assert_eq!(a, b);
        assert!(a.starts_with("IYZWS key:"));
    }

    #[test]
    fn auth_header_changes_with_random_string() {
        let body = serde_json::json!({ "locale": "tr" });
        let (a, _) = auth_header("key", "secret", "rnd1", &body);
        let (b, _) = auth_header("key", "secret", "rnd2", &body);
        assert_ne!(a, b);
    }

    #[test]
    fn html_content_round_trips_through_base64() {
        let html = "<!DOCTYPE html><html><body>3DS challenge</body></html>";
        let encoded = base64_encode(html.as_bytes());
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), html);
    }
}

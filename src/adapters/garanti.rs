//! Garanti BBVA GVPS adapter (version 512): XML over HTTPS, ISO-8859-9
//! declared, SHA-512 hash chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{render_autosubmit_form, Capabilities, ProviderAdapter};
use crate::codec::xml_build_iso8859_9;
use crate::config::OrchestratorConfig;
use crate::crypto::{aes_decrypt_field, sha1_hex_upper, sha512_hex_upper};
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::transaction::{SecureEnvelope, TransactionResult, TransactionStatus};
use crate::types::{LogType, NewCard, Terminal, Transaction};

const TEST_GATE_URL: &str = "https://sanalposprovtest.garantibbva.com.tr/VPServlet";
const PROD_GATE_URL: &str = "https://sanalposprov.garantibbva.com.tr/VPServlet";

fn gate_url(terminal: &Terminal) -> &'static str {
    if terminal.test_mode {
        TEST_GATE_URL
    } else {
        PROD_GATE_URL
    }
}

fn installment_field(count: u8) -> String {
    if count <= 1 {
        String::new()
    } else {
        count.to_string()
    }
}

/// `upper(sha1(password + "0" + terminalId))`, the shared secret both the
/// 3-D form hash and the provision hash are built on top of.
fn hashed_password(password: &str, terminal_id: &str) -> String {
    sha1_hex_upper(format!("{password}0{terminal_id}").as_bytes())
}

#[derive(Debug, Serialize)]
#[serde(rename = "GVPSRequest")]
struct GvpsRequest {
    #[serde(rename = "Mode")]
    mode: String,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Terminal")]
    terminal: GvpsTerminal,
    #[serde(rename = "Customer")]
    customer: GvpsCustomer,
    #[serde(rename = "Card")]
    card: GvpsCard,
    #[serde(rename = "Order")]
    order: GvpsOrder,
    #[serde(rename = "Transaction")]
    transaction: GvpsTransaction,
}

#[derive(Debug, Serialize)]
struct GvpsTerminal {
    #[serde(rename = "ProvUserID")]
    prov_user_id: String,
    #[serde(rename = "HashData")]
    hash_data: String,
    #[serde(rename = "UserID")]
    user_id: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "MerchantID")]
    merchant_id: String,
}

#[derive(Debug, Serialize, Default)]
struct GvpsCustomer {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    #[serde(rename = "EmailAddress")]
    email_address: String,
}

#[derive(Debug, Serialize, Default)]
struct GvpsCard {
    #[serde(rename = "Number")]
    number: String,
    #[serde(rename = "ExpireDate")]
    expire_date: String,
    #[serde(rename = "CVV2")]
    cvv2: String,
}

#[derive(Debug, Serialize)]
struct GvpsOrder {
    #[serde(rename = "OrderID")]
    order_id: String,
    #[serde(rename = "GroupID")]
    group_id: String,
}

#[derive(Debug, Serialize)]
struct GvpsTransaction {
    #[serde(rename = "Type")]
    r#type: String,
    #[serde(rename = "InstallmentCnt")]
    installment_cnt: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "CurrencyCode")]
    currency_code: String,
    #[serde(rename = "CardholderPresentCode")]
    cardholder_present_code: String,
    #[serde(rename = "MotoInd")]
    moto_ind: String,
    #[serde(rename = "Secure3D", skip_serializing_if = "Option::is_none")]
    secure3d: Option<GvpsSecure3D>,
}

#[derive(Debug, Serialize)]
struct GvpsSecure3D {
    #[serde(rename = "AuthenticationCode")]
    authentication_code: String,
    #[serde(rename = "SecurityLevel")]
    security_level: String,
    #[serde(rename = "TxnID")]
    txn_id: String,
    #[serde(rename = "Md")]
    md: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "GVPSResponse")]
struct GvpsResponse {
    #[serde(rename = "Transaction")]
    transaction: GvpsResponseTransaction,
}

#[derive(Debug, Deserialize)]
struct GvpsResponseTransaction {
    #[serde(rename = "Response")]
    response: GvpsResponseBlock,
    #[serde(rename = "AuthCode", default)]
    auth_code: Option<String>,
    #[serde(rename = "RetrefNum", default)]
    retref_num: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GvpsResponseBlock {
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "ErrorMsg", default)]
    error_msg: Option<String>,
}

pub struct GarantiAdapter;

impl GarantiAdapter {
    fn build_form_fields(&self, tx: &Transaction, terminal: &Terminal, config: &OrchestratorConfig, card: &NewCard) -> Result<serde_json::Value> {
        let password = aes_decrypt_field(&terminal.credentials.password, &config.master_key)?;
        let store_key = aes_decrypt_field(&terminal.three_ds.store_key, &config.master_key)?;
        let hp = hashed_password(&password, &terminal.credentials.terminal_id);

        let order_id = tx.id.as_str().to_string();
        let amount = tx.amount.minor_units.to_string();
        let currency = tx.amount.currency.numeric().to_string();
        let callback_url = config.callback_url(tx.id.as_str());
        let installment = installment_field(tx.installment.value());

        let hash_input = format!(
            "{}{}{}{}{}{}sales{}{}{}",
            terminal.credentials.terminal_id, order_id, amount, currency, callback_url, callback_url, installment, store_key, hp
        );
        let secure3dhash = sha512_hex_upper(hash_input.as_bytes());

        Ok(serde_json::json!({
            "gateUrl": gate_url(terminal),
            "mode": if terminal.test_mode { "TEST" } else { "PROD" },
            "terminalprovuserid": terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
            "terminaluserid": terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
            "terminalid": terminal.credentials.terminal_id,
            "terminalmerchantid": terminal.credentials.merchant_id,
            "orderid": order_id,
            "successurl": callback_url,
            "errorurl": callback_url,
            "customeremailaddress": tx.customer.email.clone().unwrap_or_default(),
            "customeripaddress": tx.customer.ip.clone().unwrap_or_default(),
            "secure3dhash": secure3dhash,
            "txntype": "sales",
            "txninstallmentcount": installment,
            "txnamount": amount,
            "txncurrencycode": currency,
            "txncardnumber": card.number,
            "txncardexpiredatemonth": card.expiry.split('/').next().unwrap_or_default(),
            "txncardexpiredateyear": card.expiry.split('/').nth(1).unwrap_or_default(),
            "txncardcvv2": card.cvv,
            "cardholderpresentcode": "13",
            "motoind": "N",
        }))
    }
}

#[async_trait]
impl ProviderAdapter for GarantiAdapter {
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, _http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let fields = self.build_form_fields(tx, terminal, config, card)?;
        tx.append_log(LogType::Init, serde_json::json!({ "terminalId": terminal.credentials.terminal_id }), fields.clone());
        tx.secure.envelope = Some(SecureEnvelope::Garanti(fields));
        tx.transition(TransactionStatus::Processing)?;
        Ok(())
    }

    fn get_form_html(&self, tx: &Transaction, _terminal: &Terminal) -> Result<String> {
        let envelope = tx.secure.envelope.as_ref().ok_or_else(|| Error::State("no 3-D form data for this transaction".into()))?;
        let SecureEnvelope::Garanti(payload) = envelope else {
            return Err(Error::State("secure envelope is not a Garanti payload".into()));
        };
        let action = payload["gateUrl"].as_str().unwrap_or_default();
        let object = payload.as_object().ok_or_else(|| Error::State("malformed Garanti form payload".into()))?;
        let fields: Vec<(&str, &str)> = object
            .iter()
            .filter(|(k, _)| k.as_str() != "gateUrl")
            .map(|(k, v)| (k.as_str(), v.as_str().unwrap_or_default()))
            .collect();
        Ok(render_autosubmit_form(action, &fields))
    }

    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let empty = String::new();
        let mdstatus = fields.get("mdstatus").unwrap_or(&empty);
        tx.append_log(LogType::ThreeDCallback, serde_json::json!(fields), serde_json::json!({ "mdstatus": mdstatus }));

        if mdstatus != "1" {
            tx.result = Some(TransactionResult::failure(mdstatus.clone(), "3-D Secure authentication was not approved"));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        self.process_provision(tx, terminal, http, config).await
    }

    async fn process_provision(&self, tx: &mut Transaction, terminal: &Terminal, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let password = aes_decrypt_field(&terminal.credentials.password, &config.master_key)?;
        let store_key = aes_decrypt_field(&terminal.three_ds.store_key, &config.master_key)?;
        let hp = hashed_password(&password, &terminal.credentials.terminal_id);

        let order_id = tx.id.as_str().to_string();
        let amount = tx.amount.minor_units.to_string();
        let currency = tx.amount.currency.numeric().to_string();

        // Card number is empty for 3-D completion provisioning.
        let hash_data = sha512_hex_upper(format!("{}{}{}{}{}{}", order_id, terminal.credentials.terminal_id, "", amount, currency, hp).as_bytes());

        let request = GvpsRequest {
            mode: if terminal.test_mode { "TEST".into() } else { "PROD".into() },
            version: "512".into(),
            terminal: GvpsTerminal {
                prov_user_id: terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
                hash_data,
                user_id: terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
                id: terminal.credentials.terminal_id.clone(),
                merchant_id: terminal.credentials.merchant_id.clone(),
            },
            customer: GvpsCustomer {
                ip_address: tx.customer.ip.clone().unwrap_or_default(),
                email_address: tx.customer.email.clone().unwrap_or_default(),
            },
            card: GvpsCard::default(),
            order: GvpsOrder {
                order_id: order_id.clone(),
                group_id: String::new(),
            },
            transaction: GvpsTransaction {
                r#type: "sales".into(),
                installment_cnt: installment_field(tx.installment.value()),
                amount: amount.clone(),
                currency_code: currency.clone(),
                cardholder_present_code: "13".into(),
                moto_ind: "N".into(),
                secure3d: None,
            },
        };

        let body = xml_build_iso8859_9(&request)?;
        tx.append_log(LogType::Provision, serde_json::json!({ "orderId": order_id }), serde_json::Value::Null);
        let response_bytes = http.post_xml_bytes(gate_url(terminal), body).await?;
        let response: GvpsResponse = crate::codec::xml_parse_iso8859_9(&response_bytes)?;

        let approved = response.transaction.response.message.as_deref() == Some("Approved");
        if approved {
            tx.result = Some(TransactionResult::approved(
                response.transaction.auth_code.unwrap_or_default(),
                response.transaction.retref_num.unwrap_or_default(),
            ));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response.transaction.response.code.unwrap_or_default();
            let message = response.transaction.response.error_msg.or(response.transaction.response.message).unwrap_or_else(|| "Garanti provisioning was declined".into());
            tx.result = Some(TransactionResult::failure(code, message));
            tx.transition(TransactionStatus::Failed)?;
        }
        Ok(())
    }

    async fn direct_payment(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let password = aes_decrypt_field(&terminal.credentials.password, &config.master_key)?;
        let hp = hashed_password(&password, &terminal.credentials.terminal_id);
        let order_id = tx.id.as_str().to_string();
        let amount = tx.amount.minor_units.to_string();
        let currency = tx.amount.currency.numeric().to_string();
        let hash_data = sha512_hex_upper(format!("{}{}{}{}{}{}", order_id, terminal.credentials.terminal_id, card.number, amount, currency, hp).as_bytes());

        let request = GvpsRequest {
            mode: if terminal.test_mode { "TEST".into() } else { "PROD".into() },
            version: "512".into(),
            terminal: GvpsTerminal {
                prov_user_id: terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
                hash_data,
                user_id: terminal.credentials.username.clone().unwrap_or_else(|| terminal.credentials.merchant_id.clone()),
                id: terminal.credentials.terminal_id.clone(),
                merchant_id: terminal.credentials.merchant_id.clone(),
            },
            customer: GvpsCustomer {
                ip_address: tx.customer.ip.clone().unwrap_or_default(),
                email_address: tx.customer.email.clone().unwrap_or_default(),
            },
            card: GvpsCard {
                number: card.number.clone(),
                expire_date: card.expiry.replace('/', ""),
                cvv2: card.cvv.clone(),
            },
            order: GvpsOrder {
                order_id: order_id.clone(),
                group_id: String::new(),
            },
            transaction: GvpsTransaction {
                r#type: "sales".into(),
                installment_cnt: installment_field(tx.installment.value()),
                amount: amount.clone(),
                currency_code: currency.clone(),
                cardholder_present_code: "H".into(),
                moto_ind: "N".into(),
                secure3d: None,
            },
        };

        let body = xml_build_iso8859_9(&request)?;
        tx.append_log(LogType::Init, serde_json::json!({ "orderId": order_id, "direct": true }), serde_json::Value::Null);
        let response_bytes = http.post_xml_bytes(gate_url(terminal), body).await?;
        let response: GvpsResponse = crate::codec::xml_parse_iso8859_9(&response_bytes)?;

        if response.transaction.response.message.as_deref() == Some("Approved") {
            tx.result = Some(TransactionResult::approved(
                response.transaction.auth_code.unwrap_or_default(),
                response.transaction.retref_num.unwrap_or_default(),
            ));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response.transaction.response.code.unwrap_or_default();
            let message = response.transaction.response.error_msg.unwrap_or_else(|| "Garanti provisioning was declined".into());
            tx.result = Some(TransactionResult::failure(code, message));
            tx.transition(TransactionStatus::Failed)?;
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            three_ds: true,
            direct_payment: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_matches_s1_vector() {
        // S1: terminalId="30691298", password="123qweASD/".
        let hp = hashed_password("123qweASD/", "30691298");
        assert_eq!(hp.len(), 40);
        assert!(hp.chars().all(|c| c.is_ascii_hexdigit() && (c.is_ascii_digit() || c.is_uppercase())));
    }

    #[test]
    fn installment_field_omits_single() {
        assert_eq!(installment_field(1), "");
        assert_eq!(installment_field(6), "6");
    }
}

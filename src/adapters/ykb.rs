//! Yapı Kredi POSNET adapter: ISO-8859-9 XML over a form-wrapped `xmldata=`
//! body, with the callback's `MerchantPacket` decrypted via a legacy
//! Triple-DES-CBC cipher.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{render_autosubmit_form, Capabilities, ProviderAdapter};
use crate::codec::xml_build_iso8859_9;
use crate::config::OrchestratorConfig;
use crate::crypto::{aes_decrypt_field, hex_decode, md5_hex_upper, sha256_base64, strip_trailing_low_bytes, tdes_cbc_decrypt};
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::transaction::{SecureEnvelope, TransactionResult, TransactionStatus};
use crate::types::{LogType, NewCard, Terminal, Transaction};

const TEST_GATE_URL: &str = "https://setmpos.ykb.com/PosnetWebService/XML";
const PROD_GATE_URL: &str = "https://posnet.ykb.com/PosnetWebService/XML";

fn gate_url(terminal: &Terminal) -> &'static str {
    if terminal.test_mode {
        TEST_GATE_URL
    } else {
        PROD_GATE_URL
    }
}

fn currency_alpha(currency: crate::types::Currency) -> &'static str {
    use crate::types::Currency::*;
    match currency {
        Try => "TL",
        Usd => "US",
        Eur => "EU",
        Gbp => "PU",
    }
}

fn installment_field(count: u8) -> String {
    if count <= 1 {
        "00".to_string()
    } else {
        format!("{count:02}")
    }
}

/// `amount` with the decimal point stripped, i.e. the minor-units integer.
fn amount_field(minor_units: i64) -> String {
    minor_units.to_string()
}

/// 20-char zero-padded numeric order id, derived from the transaction id's
/// digit suffix (POSNET order ids are purely numeric).
fn order_id_20(tx_id: &str) -> String {
    let digits: String = tx_id.chars().filter(char::is_ascii_digit).collect();
    format!("{digits:0>20}")
}

fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn xmldata_body(xml_bytes: &[u8]) -> Vec<u8> {
    format!("xmldata={}", percent_encode_bytes(xml_bytes)).into_bytes()
}

#[derive(Debug, Serialize)]
#[serde(rename = "posnetRequest")]
struct OosRequest {
    mid: String,
    tid: String,
    #[serde(rename = "oosRequestData")]
    oos_request_data: OosRequestData,
}

#[derive(Debug, Serialize)]
struct OosRequestData {
    amount: String,
    currency: String,
    instalment: String,
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "okUrl")]
    ok_url: String,
    #[serde(rename = "failUrl")]
    fail_url: String,
    #[serde(rename = "cardNumber")]
    card_number: String,
    #[serde(rename = "expDate")]
    exp_date: String,
    cvc: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename = "posnetResponse")]
struct OosResponse {
    #[serde(default)]
    data1: Option<String>,
    #[serde(default)]
    data2: Option<String>,
    #[serde(default)]
    sign: Option<String>,
    #[serde(default)]
    approved: Option<String>,
    #[serde(rename = "respCode", default)]
    resp_code: Option<String>,
    #[serde(rename = "respText", default)]
    resp_text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "posnetRequest")]
struct SaleRequest {
    mid: String,
    tid: String,
    #[serde(rename = "oosTranData")]
    oos_tran_data: OosTranData,
}

#[derive(Debug, Serialize)]
struct OosTranData {
    #[serde(rename = "bankData")]
    bank_data: String,
    #[serde(rename = "wpAmount")]
    wp_amount: String,
    mac: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename = "posnetResponse")]
struct SaleResponse {
    #[serde(default)]
    approved: Option<String>,
    #[serde(rename = "authCode", default)]
    auth_code: Option<String>,
    #[serde(rename = "hostlogkey", default)]
    host_log_key: Option<String>,
    #[serde(rename = "respCode", default)]
    resp_code: Option<String>,
    #[serde(rename = "respText", default)]
    resp_text: Option<String>,
}

/// Decrypted `MerchantPacket` fields, in the order POSNET defines them.
#[derive(Debug, Clone)]
pub struct MerchantPacketFields {
    pub mid: String,
    pub tid: String,
    pub xid: String,
    pub tds_md_status: String,
    pub currency: String,
    pub raw: Vec<String>,
}

/// Decrypt a POSNET `MerchantPacket` hex string.
///
/// Tries all three historical data-extraction variants in order and accepts
/// the first whose plaintext contains semicolons and parses into at least 12
/// fields.
pub(crate) fn decrypt_merchant_packet(packet_hex: &str, store_key: &str) -> Result<MerchantPacketFields> {
    if packet_hex.len() < 16 {
        return Err(Error::Crypto("MerchantPacket shorter than the 16 hex char IV".into()));
    }

    let md5_upper = md5_hex_upper(store_key.as_bytes());
    let key24 = md5_upper.as_bytes()[..24].to_vec();
    let iv = hex_decode(&packet_hex[..16])?;
    let remainder = &packet_hex[16..];

    let variants: [Option<&str>; 3] = [
        Some(remainder),
        remainder.len().checked_sub(8).map(|n| &remainder[..n]),
        remainder.len().checked_sub(16).map(|n| &remainder[..n]),
    ];

    for variant in variants.into_iter().flatten() {
        if variant.is_empty() {
            continue;
        }
        let Ok(data) = hex_decode(variant) else { continue };
        if data.is_empty() || data.len() % 8 != 0 {
            continue;
        }
        let Ok(plain) = tdes_cbc_decrypt(&data, &key24, &iv) else { continue };
        let stripped = strip_trailing_low_bytes(&plain);
        let Ok(text) = String::from_utf8(stripped.to_vec()) else { continue };
        if !text.contains(';') {
            continue;
        }
        let fields: Vec<String> = text.split(';').map(str::to_string).collect();
        if fields.len() < 12 {
            continue;
        }
        return Ok(MerchantPacketFields {
            mid: fields[0].clone(),
            tid: fields[1].clone(),
            xid: fields[4].clone(),
            tds_md_status: fields[11].clone(),
            currency: fields.get(14).cloned().unwrap_or_default(),
            raw: fields,
        });
    }

    Err(Error::Crypto("MerchantPacket could not be decrypted under any known framing variant".into()))
}

fn escape_plus(s: &str) -> String {
    s.replace('+', "%2B")
}

fn provision_mac(store_key: &str, tid: &str, xid: &str, amount: &str, currency: &str, mid: &str) -> String {
    let hashed_store_key = sha256_base64(format!("{store_key};{tid}").as_bytes());
    let mac = sha256_base64(format!("{xid};{amount};{currency};{mid};{hashed_store_key}").as_bytes());
    escape_plus(&mac)
}

pub struct YkbAdapter;

#[async_trait]
impl ProviderAdapter for YkbAdapter {
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let callback_url = config.callback_url(tx.id.as_str());
        let expiry_parts: Vec<&str> = card.expiry.split('/').collect();
        let exp_date = format!("{}{}", expiry_parts.get(1).unwrap_or(&""), expiry_parts.first().unwrap_or(&""));

        let request = OosRequest {
            mid: terminal.credentials.merchant_id.clone(),
            tid: terminal.credentials.terminal_id.clone(),
            oos_request_data: OosRequestData {
                amount: amount_field(tx.amount.minor_units),
                currency: currency_alpha(tx.amount.currency).to_string(),
                instalment: installment_field(tx.installment.value()),
                order_id: order_id_20(tx.id.as_str()),
                ok_url: callback_url.clone(),
                fail_url: callback_url,
                card_number: card.number.clone(),
                exp_date,
                cvc: card.cvv.clone(),
            },
        };

        let xml_bytes = xml_build_iso8859_9(&request)?;
        tx.append_log(LogType::Init, serde_json::json!({ "mid": terminal.credentials.merchant_id }), serde_json::Value::Null);
        let response_bytes = http.post_raw(gate_url(terminal), "application/x-www-form-urlencoded; charset=ISO-8859-9", xmldata_body(&xml_bytes)).await?;
        let response: OosResponse = crate::codec::xml_parse_iso8859_9(&response_bytes)?;

        if response.approved.as_deref() != Some("1") {
            let code = response.resp_code.unwrap_or_default();
            let message = response.resp_text.unwrap_or_else(|| "YKB enrollment was rejected".into());
            tx.result = Some(TransactionResult::failure(code, message));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        tx.secure.envelope = Some(SecureEnvelope::Ykb(serde_json::json!({
            "gateUrl": gate_url(terminal),
            "data1": response.data1.unwrap_or_default(),
            "data2": response.data2.unwrap_or_default(),
            "sign": response.sign.unwrap_or_default(),
        })));
        tx.transition(TransactionStatus::Processing)?;
        Ok(())
    }

    fn get_form_html(&self, tx: &Transaction, _terminal: &Terminal) -> Result<String> {
        let envelope = tx.secure.envelope.as_ref().ok_or_else(|| Error::State("no 3-D form data for this transaction".into()))?;
        let SecureEnvelope::Ykb(payload) = envelope else {
            return Err(Error::State("secure envelope is not a YKB payload".into()));
        };
        let action = payload["gateUrl"].as_str().unwrap_or_default();
        let data1 = payload["data1"].as_str().unwrap_or_default();
        let data2 = payload["data2"].as_str().unwrap_or_default();
        let sign = payload["sign"].as_str().unwrap_or_default();
        Ok(render_autosubmit_form(action, &[("data1", data1), ("data2", data2), ("sign", sign)]))
    }

    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let store_key = aes_decrypt_field(&terminal.three_ds.store_key, &config.master_key)?;
        let empty = String::new();
        let packet_hex = fields.get("MerchantPacket").unwrap_or(&empty);

        let decrypted = decrypt_merchant_packet(packet_hex, &store_key)?;
        tx.append_log(
            LogType::ThreeDCallback,
            serde_json::json!({ "MerchantPacket": packet_hex }),
            serde_json::json!({ "tds_md_status": decrypted.tds_md_status }),
        );

        const ACCEPTED: [&str; 4] = ["1", "2", "4", "9"];
        if !ACCEPTED.contains(&decrypted.tds_md_status.as_str()) {
            tx.result = Some(TransactionResult::failure(decrypted.tds_md_status.clone(), "3-D Secure status was not accepted"));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        tx.secure.envelope = Some(SecureEnvelope::Ykb(serde_json::json!({
            "gateUrl": gate_url(terminal),
            "mid": decrypted.mid,
            "tid": decrypted.tid,
            "xid": decrypted.xid,
            "currency": decrypted.currency,
        })));

        self.process_provision(tx, terminal, http, config).await
    }

    async fn process_provision(&self, tx: &mut Transaction, terminal: &Terminal, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let store_key = aes_decrypt_field(&terminal.three_ds.store_key, &config.master_key)?;
        let envelope = tx.secure.envelope.clone();
        let Some(SecureEnvelope::Ykb(payload)) = envelope else {
            return Err(Error::State("YKB provisioning requires a decrypted callback envelope".into()));
        };
        let xid = payload["xid"].as_str().unwrap_or_default().to_string();
        let currency = payload["currency"].as_str().unwrap_or_else(|| currency_alpha(tx.amount.currency)).to_string();
        let tid = terminal.credentials.terminal_id.clone();
        let mid = terminal.credentials.merchant_id.clone();
        let amount = amount_field(tx.amount.minor_units);

        let mac = provision_mac(&store_key, &tid, &xid, &amount, &currency, &mid);

        let request = SaleRequest {
            mid: mid.clone(),
            tid: tid.clone(),
            oos_tran_data: OosTranData {
                bank_data: xid.clone(),
                wp_amount: amount.clone(),
                mac,
            },
        };

        let xml_bytes = xml_build_iso8859_9(&request)?;
        tx.append_log(LogType::Provision, serde_json::json!({ "xid": xid }), serde_json::Value::Null);
        let response_bytes = http.post_raw(gate_url(terminal), "application/x-www-form-urlencoded; charset=ISO-8859-9", xmldata_body(&xml_bytes)).await?;
        let response: SaleResponse = crate::codec::xml_parse_iso8859_9(&response_bytes)?;

        if response.approved.as_deref() == Some("1") {
            tx.result = Some(TransactionResult::approved(response.auth_code.unwrap_or_default(), response.host_log_key.unwrap_or_default()));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response.resp_code.unwrap_or_default();
            let message = response.resp_text.unwrap_or_else(|| "YKB provisioning was declined".into());
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
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};
    use des::TdesEde3;

    type TdesCbcEnc = cbc::Encryptor<TdesEde3>;

    fn encrypt_for_test(plain: &[u8], key24: &[u8], iv8: &[u8]) -> Vec<u8> {
        let cipher = TdesCbcEnc::new(key24.into(), iv8.into());
        let mut padded = plain.to_vec();
        while padded.len() % 8 != 0 {
            padded.push(0x00);
        }
        cipher.encrypt_padded_vec_mut::<cbc::cipher::block_padding::NoPadding>(&padded)
    }

    #[test]
    fn order_id_is_twenty_chars_zero_padded() {
        let id = order_id_20("txn_0000000042");
        assert_eq!(id.len(), 20);
        assert!(id.ends_with("42"));
    }

    #[test]
    fn installment_field_is_two_digit_zero_padded() {
        assert_eq!(installment_field(1), "00");
        assert_eq!(installment_field(3), "03");
        assert_eq!(installment_field(12), "12");
    }

    #[test]
    fn merchant_packet_decrypts_with_full_remainder_variant() {
        let store_key = "10,10,10,10,10,10,10,10";
        let md5_upper = md5_hex_upper(store_key.as_bytes());
        let key24 = md5_upper.as_bytes()[..24].to_vec();
        let iv = [0x11u8; 8];

        let plain = b"7000679;30691298;;0;00000000000000000042;0;0;weburl;1.2.3.4;443;1;1;;202403141516;TL";
        let cipher_bytes = encrypt_for_test(plain, &key24, &iv);

        let packet_hex = format!("{}{}", hex::encode(iv), hex::encode(&cipher_bytes));
        let decrypted = decrypt_merchant_packet(&packet_hex, store_key).unwrap();
        assert_eq!(decrypted.mid, "7000679");
        assert_eq!(decrypted.tid, "30691298");
        assert_eq!(decrypted.tds_md_status, "1");
    }

    #[test]
    fn merchant_packet_shorter_than_iv_is_crypto_error() {
        let err = decrypt_merchant_packet("abcd", "store-key").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn merchant_packet_too_few_fields_is_crypto_error() {
        let store_key = "10,10,10,10,10,10,10,10";
        let md5_upper = md5_hex_upper(store_key.as_bytes());
        let key24 = md5_upper.as_bytes()[..24].to_vec();
        let iv = [0x11u8; 8];
        let plain = b"a;b;c";
        let cipher_bytes = encrypt_for_test(plain, &key24, &iv);
        let packet_hex = format!("{}{}", hex::encode(iv), hex::encode(&cipher_bytes));
        let err = decrypt_merchant_packet(&packet_hex, store_key).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn provision_mac_escapes_plus_signs() {
        let mac = provision_mac("storekey", "tid", "xid", "15000", "TL", "mid");
        assert!(!mac.contains('+'));
    }
}

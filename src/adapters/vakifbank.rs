//! VakıfBank VPOS adapter: a two-call 3-D flow — enrollment check against the
//! gate, then a second API call carrying the ACS evidence forward.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{render_autosubmit_form, Capabilities, ProviderAdapter};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::types::transaction::{SecureEnvelope, TransactionResult, TransactionStatus};
use crate::types::{LogType, NewCard, Terminal, Transaction};

const TEST_GATE_URL: &str = "https://onaylama.vakifbank.com.tr/VposService/v3/Vposreq.aspx";
const PROD_GATE_URL: &str = "https://onaylama.vakifbank.com.tr/VposService/v3/Vposreq.aspx";
const TEST_API_URL: &str = "https://onaylama.vakifbank.com.tr/VposService/v3/Vposreq.aspx";
const PROD_API_URL: &str = "https://onaylama.vakifbank.com.tr/VposService/v3/Vposreq.aspx";

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

fn brand_code(brand: crate::codec::CardBrand) -> &'static str {
    use crate::codec::CardBrand::*;
    match brand {
        Visa => "100",
        Mastercard => "200",
        Amex => "300",
        Troy | Unknown => "100",
    }
}

/// `YYMM`, the expiry format VakıfBank's enrollment check expects.
fn expiry_yymm(expiry_mmyy: &str) -> String {
    let parts: Vec<&str> = expiry_mmyy.split('/').collect();
    match (parts.first(), parts.get(1)) {
        (Some(mm), Some(yy)) => format!("{yy}{mm}"),
        _ => String::new(),
    }
}

/// `YYYYMM`, the expiry format the payment call expects.
fn expiry_yyyymm(expiry_mmyy: &str) -> String {
    let parts: Vec<&str> = expiry_mmyy.split('/').collect();
    match (parts.first(), parts.get(1)) {
        (Some(mm), Some(yy)) => format!("20{yy}{mm}"),
        _ => String::new(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "VposRequest")]
struct EnrollmentRequest {
    #[serde(rename = "MerchantId")]
    merchant_id: String,
    #[serde(rename = "Pan")]
    pan: String,
    #[serde(rename = "ExpiryDate")]
    expiry_date: String,
    #[serde(rename = "PurchAmount")]
    purch_amount: String,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "OrderId")]
    order_id: String,
    #[serde(rename = "SuccessUrl")]
    success_url: String,
    #[serde(rename = "FailureUrl")]
    failure_url: String,
    #[serde(rename = "BrandCode")]
    brand_code: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "InstallmentCount")]
    installment_count: String,
}

#[derive(Debug, Deserialize, Default)]
struct VeRes {
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "PaReq", default)]
    pa_req: Option<String>,
    #[serde(rename = "TermUrl", default)]
    term_url: Option<String>,
    #[serde(rename = "MD", default)]
    md: Option<String>,
    #[serde(rename = "ACSUrl", default)]
    acs_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename = "VposResponse")]
struct EnrollmentResponse {
    #[serde(rename = "VERes", default)]
    ve_res: VeRes,
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "VposRequest")]
struct SaleRequest {
    #[serde(rename = "MerchantId")]
    merchant_id: String,
    #[serde(rename = "PurchAmount")]
    purch_amount: String,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "OrderId")]
    order_id: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "InstallmentCount")]
    installment_count: String,
    #[serde(rename = "Eci")]
    eci: String,
    #[serde(rename = "Cavv")]
    cavv: String,
    #[serde(rename = "MD")]
    md: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename = "VposResponse")]
struct SaleResponse {
    #[serde(rename = "ResultCode", default)]
    result_code: Option<String>,
    #[serde(rename = "ResultDetail", default)]
    result_detail: Option<String>,
    #[serde(rename = "AuthCode", default)]
    auth_code: Option<String>,
    #[serde(rename = "TransactionId", default)]
    transaction_id: Option<String>,
}

pub struct VakifbankAdapter;

#[async_trait]
impl ProviderAdapter for VakifbankAdapter {
    async fn initialize(&self, tx: &mut Transaction, terminal: &Terminal, card: &NewCard, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let callback_url = config.callback_url(tx.id.as_str());
        let brand = crate::codec::brand_from_pan(&card.number);

        let request = EnrollmentRequest {
            merchant_id: terminal.credentials.merchant_id.clone(),
            pan: card.number.clone(),
            expiry_date: expiry_yymm(&card.expiry),
            purch_amount: tx.amount.to_decimal_str(),
            currency: tx.amount.currency.numeric().to_string(),
            order_id: tx.id.as_str().to_string(),
            success_url: callback_url.clone(),
            failure_url: callback_url,
            brand_code: brand_code(brand).to_string(),
            transaction_type: "Sale".to_string(),
            installment_count: tx.installment.value().to_string(),
        };

        let body = crate::codec::xml_build(&request)?;
        tx.append_log(LogType::Init, serde_json::json!({ "orderId": tx.id.as_str() }), serde_json::Value::Null);
        let response_bytes = http.post_raw(gate_url(terminal), "text/xml; charset=utf-8", body.into_bytes()).await?;
        let response_str = String::from_utf8_lossy(&response_bytes);
        let response: EnrollmentResponse = crate::codec::xml_parse(&response_str)?;

        if response.ve_res.status.as_deref() != Some("Y") {
            let message = response.error_message.unwrap_or_else(|| "enrollment was not confirmed".into());
            tx.result = Some(TransactionResult::failure("enrollment_denied", message));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        tx.secure.envelope = Some(SecureEnvelope::Vakifbank(serde_json::json!({
            "paReq": response.ve_res.pa_req.unwrap_or_default(),
            "termUrl": response.ve_res.term_url.unwrap_or_default(),
            "md": response.ve_res.md.unwrap_or_default(),
            "acsUrl": response.ve_res.acs_url.unwrap_or_default(),
        })));
        tx.transition(TransactionStatus::Processing)?;
        Ok(())
    }

    fn get_form_html(&self, tx: &Transaction, _terminal: &Terminal) -> Result<String> {
        let envelope = tx.secure.envelope.as_ref().ok_or_else(|| Error::State("no 3-D form data for this transaction".into()))?;
        let SecureEnvelope::Vakifbank(payload) = envelope else {
            return Err(Error::State("secure envelope is not a VakıfBank payload".into()));
        };
        let action = payload["acsUrl"].as_str().unwrap_or_default();
        let pa_req = payload["paReq"].as_str().unwrap_or_default();
        let term_url = payload["termUrl"].as_str().unwrap_or_default();
        let md = payload["md"].as_str().unwrap_or_default();
        Ok(render_autosubmit_form(action, &[("PaReq", pa_req), ("TermUrl", term_url), ("MD", md)]))
    }

    async fn process_callback(&self, tx: &mut Transaction, terminal: &Terminal, fields: &HashMap<String, String>, http: &AcquirerHttp, config: &OrchestratorConfig) -> Result<()> {
        let empty = String::new();
        let status = fields.get("Status").unwrap_or(&empty);
        tx.append_log(LogType::ThreeDCallback, serde_json::json!(fields), serde_json::json!({ "status": status }));

        if status != "Y" {
            tx.result = Some(TransactionResult::failure("acs_denied", "ACS authentication was not successful"));
            tx.transition(TransactionStatus::Failed)?;
            return Ok(());
        }

        let envelope = tx.secure.envelope.clone();
        let md = match envelope {
            Some(SecureEnvelope::Vakifbank(ref payload)) => payload["md"].as_str().unwrap_or_default().to_string(),
            _ => fields.get("MD").cloned().unwrap_or_default(),
        };

        tx.secure.eci = fields.get("Eci").cloned();
        tx.secure.cavv = fields.get("Cavv").cloned();
        tx.secure.envelope = Some(SecureEnvelope::Vakifbank(serde_json::json!({ "md": md })));

        self.process_provision(tx, terminal, http, config).await
    }

    async fn process_provision(&self, tx: &mut Transaction, terminal: &Terminal, http: &AcquirerHttp, _config: &OrchestratorConfig) -> Result<()> {
        let envelope = tx.secure.envelope.clone();
        let md = match envelope {
            Some(SecureEnvelope::Vakifbank(ref payload)) => payload["md"].as_str().unwrap_or_default().to_string(),
            _ => String::new(),
        };

        let request = SaleRequest {
            merchant_id: terminal.credentials.merchant_id.clone(),
            purch_amount: tx.amount.to_decimal_str(),
            currency: tx.amount.currency.numeric().to_string(),
            order_id: tx.id.as_str().to_string(),
            transaction_type: "Sale".to_string(),
            installment_count: tx.installment.value().to_string(),
            eci: tx.secure.eci.clone().unwrap_or_default(),
            cavv: tx.secure.cavv.clone().unwrap_or_default(),
            md,
        };

        let body = format!("prmstr={}", crate::codec::xml_build(&request)?);
        tx.append_log(LogType::Provision, serde_json::json!({ "orderId": tx.id.as_str() }), serde_json::Value::Null);
        let response_bytes = http.post_raw(api_url(terminal), "application/x-www-form-urlencoded; charset=utf-8", body.into_bytes()).await?;
        let response_str = String::from_utf8_lossy(&response_bytes);
        let response: SaleResponse = crate::codec::xml_parse(&response_str)?;

        if response.result_code.as_deref() == Some("0000") {
            tx.result = Some(TransactionResult::approved(response.auth_code.unwrap_or_default(), response.transaction_id.unwrap_or_default()));
            tx.clear_cvv();
            tx.transition(TransactionStatus::Success)?;
        } else {
            let code = response.result_code.unwrap_or_default();
            let message = response.result_detail.unwrap_or_else(|| "VakıfBank provisioning was declined".into());
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
    fn brand_code_table() {
        assert_eq!(brand_code(crate::codec::CardBrand::Visa), "100");
        assert_eq!(brand_code(crate::codec::CardBrand::Mastercard), "200");
        assert_eq!(brand_code(crate::codec::CardBrand::Amex), "300");
    }

    #[test]
    fn expiry_formats_differ_between_enrollment_and_payment() {
        assert_eq!(expiry_yymm("09/27"), "2709");
        assert_eq!(expiry_yyyymm("09/27"), "202709");
    }

    #[test]
    fn s5_enrollment_denial_does_not_produce_a_form() {
        let response = EnrollmentResponse {
            ve_res: VeRes {
                status: Some("N".to_string()),
                ..Default::default()
            },
            error_message: Some("card not enrolled".to_string()),
        };
        assert_ne!(response.ve_res.status.as_deref(), Some("Y"));
    }
}

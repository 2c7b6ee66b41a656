//! Wire-format helpers shared across acquirer adapters: form encoding, the
//! ISO-8859-9 XML envelope used by the legacy bank gateways, iyzico's PKI
//! string format, card masking, and the small lookup tables (currency,
//! brand) that every adapter needs in some form.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

// ============================================================================
// application/x-www-form-urlencoded
// ============================================================================

fn percent_encode_form(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.as_bytes() {
        match *b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn percent_decode_form(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                    16,
                ) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Build an `application/x-www-form-urlencoded` body from ordered key/value pairs.
pub fn form_urlencode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode_form(k), percent_encode_form(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse an `application/x-www-form-urlencoded` body into key/value pairs.
pub fn form_urldecode(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (percent_decode_form(k), percent_decode_form(v)),
            None => (percent_decode_form(part), String::new()),
        })
        .collect()
}

// ============================================================================
// ISO-8859-9 (Turkish Latin-5) transcoding
// ============================================================================

/// Encode a UTF-8 string as ISO-8859-9 bytes.
///
/// Identical to ISO-8859-1 except for six Turkish letters. Returns an error
/// if the string contains a character outside the ISO-8859-9 repertoire.
pub fn utf8_to_iso8859_9(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    for ch in s.chars() {
        let cp = ch as u32;
        let byte = match ch {
            '\u{011E}' => 0xD0,
            '\u{0130}' => 0xDD,
            '\u{015E}' => 0xDE,
            '\u{011F}' => 0xF0,
            '\u{0131}' => 0xFD,
            '\u{015F}' => 0xFE,
            _ if cp < 0x80 => cp as u8,
            _ if (0xA0..=0xFF).contains(&cp) => cp as u8,
            _ => {
                return Err(Error::Xml(format!(
                    "character {ch:?} is not representable in ISO-8859-9"
                )))
            }
        };
        out.push(byte);
    }
    Ok(out)
}

/// Decode ISO-8859-9 bytes into a UTF-8 string.
pub fn iso8859_9_to_utf8(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0xD0 => '\u{011E}',
            0xDD => '\u{0130}',
            0xDE => '\u{015E}',
            0xF0 => '\u{011F}',
            0xFD => '\u{0131}',
            0xFE => '\u{015F}',
            other => other as char,
        })
        .collect()
}

// ============================================================================
// XML envelopes
// ============================================================================

/// Serialize `value` to an ISO-8859-9-declared XML document, as sent over the
/// wire to Garanti/Payten/VakıfBank.
pub fn xml_build_iso8859_9<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = quick_xml::se::to_string(value).map_err(|e| Error::Xml(e.to_string()))?;
    let document = format!("<?xml version=\"1.0\" encoding=\"ISO-8859-9\"?>{body}");
    utf8_to_iso8859_9(&document)
}

/// Parse an ISO-8859-9-declared XML document into `T`.
pub fn xml_parse_iso8859_9<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let utf8 = iso8859_9_to_utf8(bytes);
    quick_xml::de::from_str(&utf8).map_err(|e| Error::Xml(e.to_string()))
}

/// Serialize `value` to a plain UTF-8 XML document.
pub fn xml_build(value: &impl Serialize) -> Result<String> {
    quick_xml::se::to_string(value).map_err(|e| Error::Xml(e.to_string()))
}

/// Parse a plain UTF-8 XML document into `T`.
pub fn xml_parse<T: DeserializeOwned>(xml: &str) -> Result<T> {
    quick_xml::de::from_str(xml).map_err(|e| Error::Xml(e.to_string()))
}

// ============================================================================
// iyzico PKI string
// ============================================================================

/// Build iyzico's canonical `PKIString` representation of a JSON request body,
/// the input to the HMAC-SHA1 authorization hash.
///
/// Objects render as `[k1=v1,k2=v2,...]`; arrays render as `[v1, v2, ...]`;
/// scalars render as their plain string form. Null fields are omitted by the
/// caller before this is invoked (iyzico does not include absent fields).
pub fn pki_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let body = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{k}={}", pki_string(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("[{body}]")
        }
        serde_json::Value::Array(items) => {
            let body = items
                .iter()
                .map(pki_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{body}]")
        }
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
    }
}

// ============================================================================
// Card formatting
// ============================================================================

/// Mask a PAN as `"1234 56** **** 7890"`: the first 6 and last 4 digits
/// visible, everything between masked, grouped into space-separated
/// 4-character blocks — the only form a PAN may appear in logs.
pub fn mask_pan(pan: &str) -> String {
    let digits: String = pan.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return "*".repeat(digits.len());
    }
    let first6 = &digits[..6];
    let last4 = &digits[digits.len() - 4..];
    let masked_len = digits.len() - 10;
    let flat = format!("{first6}{}{last4}", "*".repeat(masked_len));
    flat.as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).expect("ascii digits and '*' only"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Card brand inferred from the PAN prefix. Best-effort; acquirers still
/// perform their own BIN validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Troy,
    Unknown,
}

impl CardBrand {
    pub fn as_str(self) -> &'static str {
        match self {
            CardBrand::Visa => "VISA",
            CardBrand::Mastercard => "MASTERCARD",
            CardBrand::Amex => "AMEX",
            CardBrand::Troy => "TROY",
            CardBrand::Unknown => "UNKNOWN",
        }
    }
}

pub fn brand_from_pan(pan: &str) -> CardBrand {
    let digits: String = pan.chars().filter(char::is_ascii_digit).collect();
    if digits.starts_with('4') {
        return CardBrand::Visa;
    }
    if digits.len() >= 4 {
        if let Ok(prefix4) = digits[..4].parse::<u32>() {
            if (2221..=2720).contains(&prefix4) {
                return CardBrand::Mastercard;
            }
        }
    }
    if digits.len() >= 2 {
        if let Ok(prefix2) = digits[..2].parse::<u32>() {
            if (51..=55).contains(&prefix2) {
                return CardBrand::Mastercard;
            }
            if prefix2 == 34 || prefix2 == 37 {
                return CardBrand::Amex;
            }
        }
    }
    if digits.starts_with("9792") {
        return CardBrand::Troy;
    }
    CardBrand::Unknown
}

// ============================================================================
// Currency tables
// ============================================================================

/// ISO 4217 numeric code for the three-letter currencies this system handles.
pub fn currency_numeric(alpha3: &str) -> Option<&'static str> {
    match alpha3 {
        "TRY" => Some("949"),
        "USD" => Some("840"),
        "EUR" => Some("978"),
        "GBP" => Some("826"),
        _ => None,
    }
}

// ============================================================================
// Amount / expiry formatting
// ============================================================================

/// Convert a decimal amount string (e.g. `"12.50"`) to integer minor units
/// (e.g. `1250`). Assumes at most two fractional digits.
pub fn amount_to_minor_units(amount: &str) -> Result<i64> {
    let amount = amount.trim();
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if frac.len() > 2 {
        return Err(Error::Validation(format!(
            "amount {amount} has more than two fractional digits"
        )));
    }
    let whole: i64 = whole
        .parse()
        .map_err(|_| Error::Validation(format!("invalid amount: {amount}")))?;
    let frac_padded = format!("{frac:0<2}");
    let frac: i64 = frac_padded
        .parse()
        .map_err(|_| Error::Validation(format!("invalid amount: {amount}")))?;
    if whole < 0 {
        return Err(Error::Validation(format!("amount {amount} must not be negative")));
    }
    Ok(whole * 100 + frac)
}

/// Zero-pad an integer amount (minor units) to a fixed-width numeric field,
/// as required by the fixed-length formats (e.g. YKB POSNET's 9-digit amount).
pub fn format_amount_fixed(minor_units: i64, width: usize) -> String {
    format!("{minor_units:0width$}", width = width)
}

/// Format a card expiry as `YYMM`, given a 4-digit year and 1-2 digit month.
pub fn format_expiry_yymm(year: u16, month: u8) -> String {
    format!("{:02}{:02}", year % 100, month)
}

/// Format a card expiry as `MM/YY`.
pub fn format_expiry_mmyy_slash(year: u16, month: u8) -> String {
    format!("{:02}/{:02}", month, year % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_urlencode_escapes_reserved_chars() {
        let encoded = form_urlencode(&[("name", "Ali Veli"), ("amount", "10.50")]);
        assert_eq!(encoded, "name=Ali+Veli&amount=10.50");
    }

    #[test]
    fn form_urldecode_roundtrip() {
        let decoded = form_urldecode("name=Ali+Veli&amount=10.50");
        assert_eq!(
            decoded,
            vec![
                ("name".to_string(), "Ali Veli".to_string()),
                ("amount".to_string(), "10.50".to_string()),
            ]
        );
    }

    #[test]
    fn iso8859_9_turkish_chars_roundtrip() {
        let original = "Güleç Şirketi İşletme ığüşöç";
        let bytes = utf8_to_iso8859_9(original).unwrap();
        let back = iso8859_9_to_utf8(&bytes);
        assert_eq!(back, original);
    }

    #[test]
    fn pki_string_nested_object() {
        let value = serde_json::json!({
            "locale": "tr",
            "price": "1.0",
            "paymentCard": {
                "cardNumber": "5528790000000008",
                "expireYear": "2030"
            }
        });
        let s = pki_string(&value);
        assert!(s.starts_with('['));
        assert!(s.contains("locale=tr"));
        assert!(s.contains("paymentCard=[cardNumber=5528790000000008,expireYear=2030]"));
    }

    #[test]
    fn mask_pan_keeps_first6_last4() {
        assert_eq!(mask_pan("4282209004348016"), "4282 20** **** 8016");
    }

    #[test]
    fn brand_detection() {
        assert_eq!(brand_from_pan("4282209004348016"), CardBrand::Visa);
        assert_eq!(brand_from_pan("5528790000000008"), CardBrand::Mastercard);
        assert_eq!(brand_from_pan("374245455400126"), CardBrand::Amex);
        assert_eq!(brand_from_pan("9792300000000001"), CardBrand::Troy);
    }

    #[test]
    fn amount_to_minor_units_handles_short_fraction() {
        assert_eq!(amount_to_minor_units("12.5").unwrap(), 1250);
        assert_eq!(amount_to_minor_units("12").unwrap(), 1200);
        assert_eq!(amount_to_minor_units("12.50").unwrap(), 1250);
    }

    #[test]
    fn format_amount_fixed_zero_pads() {
        assert_eq!(format_amount_fixed(1250, 9), "000001250");
    }

    #[test]
    fn currency_numeric_known_codes() {
        assert_eq!(currency_numeric("TRY"), Some("949"));
        assert_eq!(currency_numeric("XYZ"), None);
    }
}

//! Cryptographic primitives used by the wire codecs and at-rest field encryption.
//!
//! Every adapter's hash chain is built from a small, fixed vocabulary of
//! digest/encoding primitives. Keeping them in one module means a hash bug
//! in one bank's wire format can't silently diverge from another's.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use ecb::cipher::KeyInit;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

/// Separator placed between the IV and ciphertext in at-rest field encryption.
///
/// Its presence is the idempotence sentinel: `encrypt` is a no-op on a value
/// that already contains it, and `decrypt` is a no-op on a value that doesn't.
const SENTINEL: char = ':';

// ============================================================================
// Digests
// ============================================================================

/// `upper(hex(sha1(data)))`.
pub fn sha1_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(data))
}

/// `base64(sha1(data))` over the raw digest bytes (iyzico auth hash).
pub fn sha1_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha1::digest(data))
}

/// `base64(hex(sha1(data)).as_bytes())` — QNB's "hex digits packed as bytes"
/// hash chain. Note this re-encodes the *ASCII hex string*, not the raw digest.
pub fn sha1_pack_base64(data: &[u8]) -> String {
    let hex_digest = hex::encode(Sha1::digest(data));
    STANDARD.encode(hex_digest.as_bytes())
}

/// `base64(sha256(data))` over the raw digest bytes (YKB POSNET MAC chain).
pub fn sha256_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// `upper(hex(sha512(data)))`.
pub fn sha512_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(Sha512::digest(data))
}

/// `base64(hex(sha512(data)).as_bytes())` — Payten/NestPay's "hex digits
/// packed as bytes" hash chain, the SHA-512 sibling of [`sha1_pack_base64`].
pub fn sha512_pack_base64(data: &[u8]) -> String {
    let hex_digest = hex::encode(Sha512::digest(data));
    STANDARD.encode(hex_digest.as_bytes())
}

/// `upper(hex(md5(data)))`.
pub fn md5_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(md5::Md5::digest(data))
}

// ============================================================================
// Base64 / hex
// ============================================================================

/// Base64-encode bytes (standard alphabet, with padding).
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64-decode a string (standard alphabet, with padding).
pub fn base64_decode(s: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| Error::Crypto(format!("invalid base64: {e}")))
}

/// Lowercase hex-encode bytes.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Hex-decode a string into bytes.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::Crypto(format!("invalid hex: {e}")))
}

// ============================================================================
// Field-level AES-CBC encryption at rest
// ============================================================================

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn derive_key(master_key: &str) -> [u8; 32] {
    Sha256::digest(master_key.as_bytes()).into()
}

/// Derive a deterministic 16-byte IV from the master key and plaintext.
///
/// Encryption must be reproducible across restarts given the same master
/// secret, so the IV cannot be random; it is instead a digest of the
/// key/plaintext pair (a synthetic IV), which also makes `encrypt`
/// idempotent on identical input.
fn derive_iv(master_key: &str, plaintext: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    hasher.update(b"|iv|");
    hasher.update(plaintext.as_bytes());
    let digest = hasher.finalize();
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}

fn has_sentinel(value: &str) -> bool {
    match value.split_once(SENTINEL) {
        Some((iv_hex, cipher_hex)) => {
            !iv_hex.is_empty()
                && !cipher_hex.is_empty()
                && iv_hex.len() == 32
                && iv_hex.chars().all(|c| c.is_ascii_hexdigit())
                && cipher_hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Encrypt a plaintext field for at-rest storage.
///
/// Returns `"<iv-hex>:<ciphertext-hex>"`. No-op (returns input unchanged) if
/// `clear` already carries the sentinel — re-encrypting already-encrypted
/// data is always safe.
pub fn aes_encrypt_field(clear: &str, master_key: &str) -> String {
    if has_sentinel(clear) {
        return clear.to_string();
    }

    let key = derive_key(master_key);
    let iv = derive_iv(master_key, clear);
    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(clear.as_bytes());

    format!("{}:{}", hex_encode(&iv), hex_encode(&ciphertext))
}

/// Decrypt a field produced by [`aes_encrypt_field`].
///
/// No-op (returns input unchanged) if `cipher_text` does not carry the
/// sentinel — the value was never encrypted.
pub fn aes_decrypt_field(cipher_text: &str, master_key: &str) -> Result<String> {
    if !has_sentinel(cipher_text) {
        return Ok(cipher_text.to_string());
    }

    let (iv_hex, data_hex) = cipher_text.split_once(SENTINEL).expect("sentinel checked");
    let iv = hex_decode(iv_hex)?;
    let data = hex_decode(data_hex)?;
    if iv.len() != 16 {
        return Err(Error::Crypto("malformed IV length".into()));
    }

    let key = derive_key(master_key);
    let mut buf = data;
    let cipher = Aes256CbcDec::new(key.as_slice().into(), iv.as_slice().into());
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| Error::Crypto(format!("AES decrypt failed: {e}")))?;

    String::from_utf8(plain.to_vec()).map_err(|e| Error::Crypto(format!("invalid utf8: {e}")))
}

// ============================================================================
// Triple-DES (legacy bank callback packets)
// ============================================================================

type TdesCbcDec = cbc::Decryptor<TdesEde3>;
type TdesEcbDec = ecb::Decryptor<TdesEde3>;

/// Decrypt 3DES-ECB data with a 24-byte key, no padding stripped by this call.
pub fn tdes_ecb_decrypt(data: &[u8], key24: &[u8]) -> Result<Vec<u8>> {
    if key24.len() != 24 {
        return Err(Error::Crypto("3DES key must be 24 bytes".into()));
    }
    let mut buf = data.to_vec();
    let cipher = TdesEcbDec::new(key24.into());
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map(|p| p.to_vec())
        .map_err(|e| Error::Crypto(format!("3DES-ECB decrypt failed: {e}")))
}

/// Decrypt 3DES-CBC data with a 24-byte key and 8-byte IV, no padding stripped.
///
/// Callers (e.g. the YKB POSNET adapter) are responsible for stripping the
/// acquirer's non-standard trailing 0x00-0x08 padding bytes themselves.
pub fn tdes_cbc_decrypt(data: &[u8], key24: &[u8], iv8: &[u8]) -> Result<Vec<u8>> {
    if key24.len() != 24 {
        return Err(Error::Crypto("3DES key must be 24 bytes".into()));
    }
    if iv8.len() != 8 {
        return Err(Error::Crypto("3DES IV must be 8 bytes".into()));
    }
    if data.is_empty() || data.len() % 8 != 0 {
        return Err(Error::Crypto(
            "3DES-CBC ciphertext must be a non-empty multiple of the 8-byte block size".into(),
        ));
    }
    let mut buf = data.to_vec();
    let cipher = TdesCbcDec::new(key24.into(), iv8.into());
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map(|p| p.to_vec())
        .map_err(|e| Error::Crypto(format!("3DES-CBC decrypt failed: {e}")))
}

/// Strip trailing bytes in the 0x00..=0x08 range, as used by YKB's
/// `MerchantPacket` framing instead of standard PKCS padding.
pub fn strip_trailing_low_bytes(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && data[end - 1] <= 0x08 {
        end -= 1;
    }
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_hex_upper_known_vector() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89
        assert_eq!(
            sha1_hex_upper(b"abc"),
            "A9993E364706816ABA3E25717850C26C9CD0D89"
        );
    }

    #[test]
    fn sha512_hex_upper_known_vector() {
        let digest = sha512_hex_upper(b"");
        assert_eq!(
            digest,
            "CF83E1357EEFB8BDF1542850D66D8007D620E4050B5715DC83F4A921D36CE9CE47D0D13C5D85F2B0FF8318D2877EEC2F63B931BD47417A81A538327AF927DA3"
        );
    }

    #[test]
    fn md5_hex_upper_known_vector() {
        assert_eq!(md5_hex_upper(b""), "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[test]
    fn sha1_pack_base64_roundtrip_shape() {
        // base64(hex(sha1(data))) should be decodable back to a 40-char hex string.
        let packed = sha1_pack_base64(b"hello");
        let unpacked = base64_decode(&packed).unwrap();
        assert_eq!(unpacked.len(), 40);
        assert!(unpacked.iter().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn sha512_pack_base64_roundtrip_shape() {
        let packed = sha512_pack_base64(b"hello");
        let unpacked = base64_decode(&packed).unwrap();
        assert_eq!(unpacked.len(), 128);
        assert!(unpacked.iter().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn aes_field_encryption_idempotence() {
        let key = "super-secret-master-key";
        let plain = "4282209004348016";

        let enc1 = aes_encrypt_field(plain, key);
        let enc2 = aes_encrypt_field(&enc1, key);
        assert_eq!(enc1, enc2, "encrypting an already-encrypted value is a no-op");

        let dec1 = aes_decrypt_field(&enc1, key).unwrap();
        assert_eq!(dec1, plain);

        let dec2 = aes_decrypt_field(&dec1, key).unwrap();
        assert_eq!(dec2, plain, "decrypting plaintext is a no-op");
    }

    #[test]
    fn aes_field_encryption_deterministic_across_calls() {
        let key = "another-master-key";
        let plain = "123qweASD/";
        assert_eq!(
            aes_encrypt_field(plain, key),
            aes_encrypt_field(plain, key)
        );
    }

    #[test]
    fn strip_trailing_low_bytes_removes_padding_only() {
        let data = [0x41, 0x42, 0x43, 0x02, 0x02];
        assert_eq!(strip_trailing_low_bytes(&data), [0x41, 0x42, 0x43]);

        let no_padding = [0x41, 0x42, 0x43];
        assert_eq!(strip_trailing_low_bytes(&no_padding), [0x41, 0x42, 0x43]);
    }

    #[test]
    fn tdes_cbc_rejects_misaligned_ciphertext() {
        let key = [7u8; 24];
        let iv = [1u8; 8];
        let err = tdes_cbc_decrypt(&[0u8; 10], &key, &iv).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}

//! Confirms credential encryption-at-rest holds across the actual store
//! boundary, not just the crypto primitives in isolation: a terminal created
//! with clear-text credentials must come back with ciphertext, decrypt to
//! the original value, and a second write through the same store must stay
//! idempotent.

use vpos_core::store::memory::InMemoryTerminalStore;
use vpos_core::store::TerminalStore;
use vpos_core::types::terminal::{Credentials, NewTerminal, ThreeDsConfig};
use vpos_core::{crypto, BankCode, Currency};

const MASTER_KEY: &str = "a-32-byte-master-key-aaaaaaaaaa";

fn new_terminal_spec() -> NewTerminal {
    NewTerminal {
        company: "acme".into(),
        bank_code: BankCode::Garanti,
        currencies: vec![Currency::Try],
        default_for_currencies: vec![Currency::Try],
        priority: 0,
        test_mode: true,
        credentials: Credentials {
            merchant_id: "7000679".into(),
            terminal_id: "30691298".into(),
            username: None,
            password: "123qweASD/".into(),
            secret_key: None,
            extra: serde_json::Value::Null,
        },
        three_ds: ThreeDsConfig {
            enabled: true,
            required: true,
            store_key: "12345678".into(),
        },
        installment: Default::default(),
        commission_periods: vec![],
        limits: Default::default(),
        supported_card_families: vec![],
        spec: Default::default(),
    }
}

#[tokio::test]
async fn credentials_are_encrypted_at_rest_and_decrypt_to_the_original() {
    let store = InMemoryTerminalStore::new(MASTER_KEY);
    let terminal = store.create(new_terminal_spec()).await.unwrap();

    assert_ne!(terminal.credentials.password, "123qweASD/");
    assert_ne!(terminal.three_ds.store_key, "12345678");

    let password = crypto::aes_decrypt_field(&terminal.credentials.password, MASTER_KEY).unwrap();
    let store_key = crypto::aes_decrypt_field(&terminal.three_ds.store_key, MASTER_KEY).unwrap();
    assert_eq!(password, "123qweASD/");
    assert_eq!(store_key, "12345678");
}

#[tokio::test]
async fn duplicate_company_bank_binding_is_rejected() {
    let store = InMemoryTerminalStore::new(MASTER_KEY);
    store.create(new_terminal_spec()).await.unwrap();

    let err = store.create(new_terminal_spec()).await.unwrap_err();
    assert!(matches!(err, vpos_core::Error::Conflict(_)));
}

#[tokio::test]
async fn set_default_for_currency_keeps_at_most_one_default_per_company() {
    let store = InMemoryTerminalStore::new(MASTER_KEY);
    let a = store.create(new_terminal_spec()).await.unwrap();

    let mut b_spec = new_terminal_spec();
    b_spec.bank_code = BankCode::Akbank;
    b_spec.default_for_currencies = vec![];
    let b = store.create(b_spec).await.unwrap();

    let b = store.set_default_for_currency(&b.id, Currency::Try).await.unwrap();
    assert!(b.default_for_currencies.contains(&Currency::Try));

    let a = store.find_by_id(&a.id).await.unwrap();
    assert!(!a.default_for_currencies.contains(&Currency::Try), "setting a new default must clear the previous one within the company");
}

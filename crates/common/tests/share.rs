//! Integration tests for sharing documents and opening them as a recipient

mod common;

use ::common::config::Config;
use ::common::crypto::{provider_plaintext, TAG_SIZE};
use ::common::document::{
    open_document, owner_dek, seal_document, share_document, ChainOperand, ChainOrder, DocumentError,
    IntegrityStatus, RecoveryMode, SealRequest, ShareScheme,
};
use ::common::signer::{Capability, LocalSigner, Signer};
use crate::common::{
    rechain, seal_sample, setup_test_env, FlakyWallet, LowercaseWallet, ProviderWallet, WalletOnly,
    CONTENT, COUNTER, TIMESTAMP,
};

#[tokio::test]
async fn test_signature_share() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = WalletOnly(LocalSigner::generate());
    let recipient_address = recipient.address().await.unwrap();

    let entry = share_document(
        &owner,
        &store,
        &mut metadata,
        &recipient_address,
        ShareScheme::Signature,
        &config,
    )
    .await
    .unwrap();
    assert!(entry.owner_signature.is_some());
    assert!(entry.dek_sha256_b64.is_some());
    assert_eq!(
        entry.encrypted_data_sha256_b64,
        metadata.encrypted_data_sha256_b64
    );

    let (key, _) = metadata.wrapped_deks.find(&recipient_address).unwrap();
    assert_eq!(key, recipient_address.to_lowercase());

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
    assert_eq!(opened.mode, RecoveryMode::Recipient);
    assert_eq!(opened.integrity, IntegrityStatus::Verified);
    assert_eq!(opened.owner_operand, owner.address_str());
    assert!(opened.checksum_matched);

    // sharing does not disturb the owner
    let own = open_document(&owner, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(own.mode, RecoveryMode::Owner);
}

#[tokio::test]
async fn test_share_survives_json_round_trip() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Signature,
        &config,
    )
    .await
    .unwrap();

    let stored = metadata.to_json().unwrap();
    let reloaded = ::common::document::DocumentMetadata::from_json(&stored).unwrap();
    let opened = open_document(&recipient, &store, &reloaded, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
}

#[tokio::test]
async fn test_ecdh_share() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    let entry = share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Ecdh {
            recipient_public_key: recipient.public_key().to_base64(),
        },
        &config,
    )
    .await
    .unwrap();
    assert!(entry.owner_ephemeral_pubkey.is_some());
    assert!(entry.owner_signature.is_none());

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
    assert_eq!(opened.mode, RecoveryMode::Recipient);
}

#[tokio::test]
async fn test_ecdh_share_needs_local_key() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let key = LocalSigner::generate();
    let public_key = key.public_key().to_base64();
    let address = key.address_str().to_string();
    let recipient = WalletOnly(key);

    share_document(
        &owner,
        &store,
        &mut metadata,
        &address,
        ShareScheme::Ecdh {
            recipient_public_key: public_key,
        },
        &config,
    )
    .await
    .unwrap();

    let result = open_document(&recipient, &store, &metadata, &config).await;
    match result {
        Err(DocumentError::CapabilityUnsupported {
            capability,
            address: reported,
            ..
        }) => {
            assert_eq!(capability, Capability::Ecdh);
            assert_eq!(reported, Some(address.to_lowercase()));
        }
        other => panic!("expected unsupported capability, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ecdh_share_rejects_bad_public_key() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    let result = share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Ecdh {
            recipient_public_key: "0x1234".into(),
        },
        &config,
    )
    .await;
    assert!(matches!(result, Err(DocumentError::KeyWrap(_))));
    assert_eq!(metadata.wrapped_deks.len(), 1);
}

#[tokio::test]
async fn test_provider_share() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;

    let dek = owner_dek(&owner, &metadata, &config).await.unwrap();
    let payload_json = serde_json::json!({
        "version": "x25519-xsalsa20-poly1305",
        "ciphertext": provider_plaintext(&dek),
    })
    .to_string();

    let recipient = ProviderWallet(LocalSigner::generate());
    let recipient_address = recipient.address().await.unwrap();
    let entry = share_document(
        &owner,
        &store,
        &mut metadata,
        &recipient_address,
        ShareScheme::Provider { payload_json },
        &config,
    )
    .await
    .unwrap();
    assert!(entry.wrapped_dek.is_empty());
    assert!(entry.provider_encrypted.is_some());

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);

    // the same entry, read by a wallet without eth_decrypt
    let without_provider = WalletOnly(recipient.0);
    let result = open_document(&without_provider, &store, &metadata, &config).await;
    assert!(matches!(
        result,
        Err(DocumentError::CapabilityUnsupported {
            capability: Capability::ProviderDecrypt,
            ..
        })
    ));
}

#[tokio::test]
async fn test_recipient_of_lowercase_owner() {
    let (owner, store, config) = setup_test_env();
    let owner = LowercaseWallet(owner);
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Signature,
        &config,
    )
    .await
    .unwrap();

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
    assert_eq!(opened.owner_operand, owner.address().await.unwrap());
}

#[tokio::test]
async fn test_recipient_recovers_alternate_chain_order() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Signature,
        &config,
    )
    .await
    .unwrap();

    let order = ChainOrder::new([
        ChainOperand::Timestamp,
        ChainOperand::Owner,
        ChainOperand::Counter,
    ])
    .unwrap();
    rechain(&store, &mut metadata, owner.address_str(), order).await;

    // long enough that the checksum match is accepted, not just the longest
    assert!(CONTENT.len() + TAG_SIZE >= config.min_checksum_candidate_len);
    assert!(metadata.encrypted_data_sha256_b64.is_some());

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
    assert_eq!(opened.chain_order, order);
    assert_eq!(opened.integrity, IntegrityStatus::Verified);
    assert!(opened.checksum_matched);

    let canonical_only = Config {
        widen_chain_orders: false,
        ..Config::default()
    };
    let result = open_document(&recipient, &store, &metadata, &canonical_only).await;
    assert!(matches!(result, Err(DocumentError::Format(_))));
}

#[tokio::test]
async fn test_reshare_replaces_entry() {
    let (owner, store, config) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    for _ in 0..2 {
        share_document(
            &owner,
            &store,
            &mut metadata,
            &recipient.address_str().to_uppercase().replace("0X", "0x"),
            ShareScheme::Signature,
            &config,
        )
        .await
        .unwrap();
    }
    assert_eq!(metadata.wrapped_deks.len(), 2);

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
}

#[tokio::test]
async fn test_strict_signer_verification() {
    let (owner, store, _) = setup_test_env();
    let config = Config {
        verify_signer_determinism: true,
        ..Config::default()
    };
    let mut metadata = seal_sample(&owner, &store, &config).await;
    let recipient = LocalSigner::generate();

    share_document(
        &owner,
        &store,
        &mut metadata,
        recipient.address_str(),
        ShareScheme::Signature,
        &config,
    )
    .await
    .unwrap();

    let opened = open_document(&recipient, &store, &metadata, &config)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, CONTENT);
}

#[tokio::test]
async fn test_strict_verification_rejects_flaky_signer() {
    let (key, store, _) = setup_test_env();
    let address = key.address_str().to_lowercase();
    let owner = FlakyWallet::new(key);
    let config = Config {
        verify_signer_determinism: true,
        ..Config::default()
    };

    let result = seal_document(
        &owner,
        &store,
        CONTENT,
        SealRequest::new(TIMESTAMP, COUNTER),
        &config,
    )
    .await;
    match result {
        Err(DocumentError::CapabilityUnsupported {
            capability,
            address: reported,
            hint,
        }) => {
            assert_eq!(capability, Capability::DeterministicSigning);
            assert_eq!(reported, Some(address));
            assert!(hint.contains("deterministic"));
        }
        other => panic!("expected unsupported capability, got {other:?}"),
    }

    // sharing from an existing record hits the same check
    let (owner, store, _) = setup_test_env();
    let mut metadata = seal_sample(&owner, &store, &Config::default()).await;
    let flaky_owner = FlakyWallet::new(owner);
    let result = share_document(
        &flaky_owner,
        &store,
        &mut metadata,
        LocalSigner::generate().address_str(),
        ShareScheme::Signature,
        &config,
    )
    .await;
    assert!(matches!(
        result,
        Err(DocumentError::CapabilityUnsupported {
            capability: Capability::DeterministicSigning,
            ..
        })
    ));
}

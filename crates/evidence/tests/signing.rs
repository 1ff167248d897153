use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use serde_json::json;
use sha2::Sha256;

use evidence_service::{
    CanonicalJson, EVIDENCE_CONTAINER, EvidencePipeline, EvidenceSigner, EvidenceStore,
    LocalRsaAuthority, MemoryObjectStore, StoredDocument, create_evidence,
};

fn authority() -> Arc<LocalRsaAuthority> {
    static AUTHORITY: OnceLock<Arc<LocalRsaAuthority>> = OnceLock::new();
    AUTHORITY
        .get_or_init(|| {
            Arc::new(LocalRsaAuthority::from_seed("evidence-signing-key", "signing-tests").unwrap())
        })
        .clone()
}

fn verify(canonical: &[u8], signature_b64: &str) -> bool {
    let raw = STANDARD.decode(signature_b64).unwrap();
    let signature = Signature::try_from(raw.as_slice()).unwrap();
    VerifyingKey::<Sha256>::new(authority().public_key().clone())
        .verify(canonical, &signature)
        .is_ok()
}

async fn stored_document(backend: &MemoryObjectStore, evidence_id: &str) -> StoredDocument {
    let object = backend
        .object(EVIDENCE_CONTAINER, &format!("{evidence_id}.json"))
        .await
        .expect("document should be stored");
    serde_json::from_slice(&object.body).unwrap()
}

// ── End-to-end verification ──────────────────────────────────────────

#[tokio::test]
async fn stored_signature_verifies_against_recanonicalized_evidence() {
    let backend = Arc::new(MemoryObjectStore::new());
    let pipeline = EvidencePipeline::new(
        EvidenceSigner::new(authority(), "evidence-signing-key"),
        EvidenceStore::new(backend.clone()),
        Duration::from_secs(30),
    );

    let receipt = pipeline
        .record(json!({"action": "approve", "amount": 100, "approver": {"id": 7, "name": "ops"}}))
        .await
        .unwrap();

    let document = stored_document(&backend, &receipt.evidence_id).await;
    assert_eq!(document.evidence.evidence_id(), receipt.evidence_id);

    // A verifier only has the stored document: rebuild the signed bytes from it.
    let canonical = CanonicalJson::encode(&document.evidence).unwrap();
    assert!(verify(&canonical, &document.signature));
}

#[tokio::test]
async fn stored_metadata_names_signing_key() {
    let backend = Arc::new(MemoryObjectStore::new());
    let pipeline = EvidencePipeline::new(
        EvidenceSigner::new(authority(), "evidence-signing-key"),
        EvidenceStore::new(backend.clone()),
        Duration::from_secs(30),
    );

    let receipt = pipeline.record(json!({"checkpoint": "q3-audit"})).await.unwrap();
    let object = backend
        .object(EVIDENCE_CONTAINER, &format!("{}.json", receipt.evidence_id))
        .await
        .unwrap();

    assert_eq!(object.metadata["keyid"], receipt.signed_by);
    assert_eq!(object.metadata["signed"], "true");
    assert_eq!(object.content_type, "application/json");
}

#[tokio::test]
async fn tampered_payload_fails_verification() {
    let backend = Arc::new(MemoryObjectStore::new());
    let pipeline = EvidencePipeline::new(
        EvidenceSigner::new(authority(), "evidence-signing-key"),
        EvidenceStore::new(backend.clone()),
        Duration::from_secs(30),
    );

    let receipt = pipeline.record(json!({"amount": 100})).await.unwrap();
    let document = stored_document(&backend, &receipt.evidence_id).await;

    let mut tampered = serde_json::to_value(&document.evidence).unwrap();
    tampered["payload"]["amount"] = json!(1_000_000);
    let canonical = CanonicalJson::encode_value(&tampered).unwrap();
    assert!(!verify(&canonical, &document.signature));
}

// ── Signer in isolation ─────────────────────────────────────────────

#[tokio::test]
async fn signature_is_independent_of_payload_key_order() {
    let signer = EvidenceSigner::new(authority(), "evidence-signing-key");

    let record = create_evidence(json!({"b": 1, "a": {"d": 2, "c": 3}}));
    let mut reordered = serde_json::to_value(&record).unwrap();
    reordered["payload"] = serde_json::from_str(r#"{"a": {"c": 3, "d": 2}, "b": 1}"#).unwrap();

    let canonical = CanonicalJson::encode(&record).unwrap();
    let canonical_reordered = CanonicalJson::encode_value(&reordered).unwrap();
    assert_eq!(canonical, canonical_reordered);

    let envelope = signer.sign(&canonical).await.unwrap();
    assert!(verify(&canonical_reordered, &envelope.signature));
}

#[tokio::test]
async fn keyid_is_reported_with_signature() {
    let signer = EvidenceSigner::new(authority(), "evidence-signing-key");
    let canonical = CanonicalJson::encode(&create_evidence(json!(null))).unwrap();

    let envelope = signer.sign(&canonical).await.unwrap();
    assert_eq!(envelope.keyid, authority().key_id());
    assert!(!envelope.signature.is_empty());
}

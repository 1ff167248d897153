pub mod credential;
pub mod encoding;
pub mod error;
pub mod evidence;
pub mod pipeline;
pub mod server;
pub mod signing;
pub mod store;

pub use encoding::CanonicalJson;
pub use error::{EvidenceError, Result};
pub use evidence::{EvidenceRecord, create_evidence, create_evidence_at};
pub use pipeline::{EvidencePipeline, EvidenceReceipt};
pub use server::{AppState, router, run};
pub use signing::{
    EvidenceSigner, KeyVaultAuthority, LocalRsaAuthority, SignatureEnvelope, SigningAuthority,
};
pub use store::{
    BlobObjectStore, EVIDENCE_CONTAINER, EvidenceStore, MemoryObjectStore, ObjectStore,
    StoredDocument,
};

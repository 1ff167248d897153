mod signer;
mod envelope;
mod rsa;
mod vault;

pub use signer::{AuthoritySignature, RS256, SigningAuthority};
pub use envelope::{EvidenceSigner, SignatureEnvelope};
pub use self::rsa::LocalRsaAuthority;
pub use vault::KeyVaultAuthority;

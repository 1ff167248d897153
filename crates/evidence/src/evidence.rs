use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const EVIDENCE_ID_PREFIX: &str = "EV";
const SUFFIX_LEN: usize = 8;

/// Unsigned record identifying and timestamping an event.
///
/// `evidence_id` and `timestamp` are fixed at construction; there are no
/// setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    evidence_id: String,
    timestamp: String,
    payload: Value,
}

impl EvidenceRecord {
    pub fn evidence_id(&self) -> &str {
        &self.evidence_id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Object name the signed record is stored under.
    pub fn storage_key(&self) -> String {
        format!("{}.json", self.evidence_id)
    }
}

/// Wraps `payload` into a fresh record stamped with the current UTC time.
pub fn create_evidence(payload: Value) -> EvidenceRecord {
    let suffix = Uuid::new_v4().simple().to_string();
    create_evidence_at(payload, Utc::now(), &suffix[..SUFFIX_LEN])
}

/// Builds a record from an explicit instant and random suffix.
pub fn create_evidence_at(payload: Value, now: DateTime<Utc>, suffix: &str) -> EvidenceRecord {
    EvidenceRecord {
        evidence_id: format!(
            "{EVIDENCE_ID_PREFIX}-{}-{suffix}",
            now.format("%Y%m%dT%H%M%SZ")
        ),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
        payload,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One relayed upload, persisted next to its blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayFileRecord {
    pub id: String,
    #[serde(rename = "originalname")]
    pub original_name: String,
    pub size: u64,
    pub upload_time: DateTime<Utc>,
}

/// What a downloader is told about a record.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    #[serde(rename = "originalname")]
    pub original_name: String,
    pub size: u64,
    pub upload_time: DateTime<Utc>,
}

impl RelayFileRecord {
    pub fn new(id: String, original_name: impl Into<String>, size: u64, upload_time: DateTime<Utc>) -> Self {
        Self {
            id,
            original_name: original_name.into(),
            size,
            upload_time,
        }
    }

    /// Time since upload; zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age_since(self.upload_time, now)
    }

    /// Expired strictly after `ttl` has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }

    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            original_name: self.original_name.clone(),
            size: self.size,
            upload_time: self.upload_time,
        }
    }
}

pub(crate) fn age_since(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// 32 lowercase hex characters from a v4 uuid.
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Anything else is never used to build a path.
pub fn is_record_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids() {
        let id = new_record_id();
        assert!(is_record_id(&id));
        assert!(!is_record_id("../../etc/passwd"));
        assert!(!is_record_id(&id.to_uppercase()));
        assert!(!is_record_id(&id[..31]));
    }

    #[test]
    fn test_expiry_is_strict() {
        let t0 = Utc::now();
        let record = RelayFileRecord::new(new_record_id(), "a.txt", 5, t0);
        let ttl = Duration::from_secs(600);
        assert!(!record.is_expired(t0 + chrono::Duration::seconds(600), ttl));
        assert!(record.is_expired(t0 + chrono::Duration::seconds(601), ttl));
        assert!(!record.is_expired(t0 - chrono::Duration::seconds(5), ttl));
    }

    #[test]
    fn test_wire_names() {
        let record = RelayFileRecord::new("ab".repeat(16), "photo.png", 10, Utc::now());
        let json = serde_json::to_value(record.metadata()).unwrap();
        assert_eq!(json["originalname"], "photo.png");
        assert_eq!(json["size"], 10);
        assert!(json["upload_time"].is_string());
        assert!(json.get("id").is_none());
    }
}

//! Synthetic payloads and publish batches

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Minutes between generation time and `expires_at`
pub const EXPIRY_OFFSET_MINUTES: i64 = 30;

/// Probability that a generated entity uses [`Identity::Primary`]
pub const PRIMARY_IDENTITY_WEIGHT: f64 = 0.7;

/// Inclusive category range
pub const CATEGORY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Identity class of a synthetic entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// Majority class
    Primary,
    /// Minority class
    Secondary,
}

/// The entity each message carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticEntity {
    /// Unique per generated payload
    pub id: Uuid,
    /// Uniform in [`CATEGORY_RANGE`]
    pub category: u8,
    /// 70/30 primary/secondary
    pub identity: Identity,
    /// Generation time
    pub created_at: DateTime<Utc>,
    /// `created_at` + [`EXPIRY_OFFSET_MINUTES`]
    pub expires_at: DateTime<Utc>,
}

impl SyntheticEntity {
    /// Generate a fresh entity stamped `now`
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Self {
        let identity = if rng.gen_bool(PRIMARY_IDENTITY_WEIGHT) {
            Identity::Primary
        } else {
            Identity::Secondary
        };

        Self {
            id: Uuid::new_v4(),
            category: rng.gen_range(CATEGORY_RANGE),
            identity,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(EXPIRY_OFFSET_MINUTES),
        }
    }
}

/// One message in the publish body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMessage {
    /// Base64 of the JSON entity
    pub data: String,
    /// Fixed attribute map
    pub attributes: BTreeMap<String, String>,
}

/// Publish request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Batch contents
    pub messages: Vec<PublishMessage>,
}

/// A serialized batch ready for the transport
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// JSON request body
    pub body: Vec<u8>,
    /// Messages in the batch
    pub message_count: usize,
}

impl EncodedBatch {
    /// Size on the wire
    pub fn payload_bytes(&self) -> usize {
        self.body.len()
    }
}

/// Default attributes attached to every message
pub fn default_attributes() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("content_type".to_string(), "application/json".to_string()),
        ("source".to_string(), "soak-bench".to_string()),
    ])
}

/// Replicates an entity into a batch and encodes it
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    batch_size: usize,
    attributes: BTreeMap<String, String>,
}

impl BatchEncoder {
    /// Create an encoder with the default attribute map
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            attributes: default_attributes(),
        }
    }

    /// Replace the attribute map
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Messages per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Encode `batch_size` copies of `entity`
    ///
    /// The copies are value-identical; per-message uniqueness is left to the
    /// transport envelope.
    pub fn encode(&self, entity: &SyntheticEntity) -> Result<EncodedBatch, serde_json::Error> {
        let data = STANDARD.encode(serde_json::to_vec(entity)?);
        let message = PublishMessage {
            data,
            attributes: self.attributes.clone(),
        };
        let request = PublishRequest {
            messages: vec![message; self.batch_size],
        };

        Ok(EncodedBatch {
            body: serde_json::to_vec(&request)?,
            message_count: self.batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_entity_fields_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();
        for _ in 0..500 {
            let entity = SyntheticEntity::generate(&mut rng, now);
            assert!(CATEGORY_RANGE.contains(&entity.category));
            assert_eq!(
                entity.expires_at - entity.created_at,
                chrono::Duration::minutes(30)
            );
        }
    }

    #[test]
    fn test_identity_distribution_is_roughly_seventy_thirty() {
        let mut rng = StdRng::seed_from_u64(42);
        let now = Utc::now();
        let n = 10_000;
        let primary = (0..n)
            .filter(|_| SyntheticEntity::generate(&mut rng, now).identity == Identity::Primary)
            .count();
        let share = primary as f64 / n as f64;
        assert!((0.67..0.73).contains(&share), "primary share {share}");
    }

    #[test]
    fn test_every_category_appears() {
        let mut rng = StdRng::seed_from_u64(3);
        let now = Utc::now();
        let mut seen = [false; 5];
        for _ in 0..1000 {
            let c = SyntheticEntity::generate(&mut rng, now).category;
            seen[(c - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_ids_are_unique_per_payload() {
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();
        let a = SyntheticEntity::generate(&mut rng, now);
        let b = SyntheticEntity::generate(&mut rng, now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_batch_replicates_identical_messages() {
        let mut rng = StdRng::seed_from_u64(9);
        let entity = SyntheticEntity::generate(&mut rng, Utc::now());
        let batch = BatchEncoder::new(4).encode(&entity).unwrap();
        assert_eq!(batch.message_count, 4);
        assert_eq!(batch.payload_bytes(), batch.body.len());

        let request: PublishRequest = serde_json::from_slice(&batch.body).unwrap();
        assert_eq!(request.messages.len(), 4);
        assert!(request.messages.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(request.messages[0].attributes, default_attributes());

        let decoded = STANDARD.decode(&request.messages[0].data).unwrap();
        let back: SyntheticEntity = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_custom_attributes() {
        let attrs = BTreeMap::from([("env".to_string(), "staging".to_string())]);
        let encoder = BatchEncoder::new(1).with_attributes(attrs.clone());
        let entity = SyntheticEntity::generate(&mut StdRng::seed_from_u64(0), Utc::now());
        let batch = encoder.encode(&entity).unwrap();
        let request: PublishRequest = serde_json::from_slice(&batch.body).unwrap();
        assert_eq!(request.messages[0].attributes, attrs);
    }
}

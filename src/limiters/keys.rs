//! Store key layout for one token bucket.
use serde::{Deserialize, Serialize};

const TOKENS_SUFFIX: &str = "token_num";
const LAST_REFILL_SUFFIX: &str = "token_num_last_updated_key";

/// Hash tag appended to every key of one bucket so a sharded store
/// (Redis Cluster) places them on the same slot.
/// Every limiter metering the same resource derives the same tag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct AffinityTag(String);

impl AffinityTag {
    /// Tag for a resource key; the key must not contain `{` or `}`
    pub fn for_resource(unique_key: &str) -> Self {
        Self(format!("|{{{}}}", unique_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AffinityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BucketKeys {
    pub tokens: String,
    pub last_refill: String,
}

impl BucketKeys {
    pub fn new(unique_key: &str, tag: Option<&AffinityTag>) -> Self {
        let tag = tag.map(AffinityTag::as_str).unwrap_or_default();
        Self {
            tokens: format!("{}|{}{}", unique_key, TOKENS_SUFFIX, tag),
            last_refill: format!("{}|{}{}", unique_key, LAST_REFILL_SUFFIX, tag),
        }
    }

    /// Keys in the order the bucket script reads them
    pub fn to_vec(&self) -> Vec<String> {
        vec![self.tokens.clone(), self.last_refill.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keys() {
        let keys = BucketKeys::new("qrain|get|files", None);
        assert_eq!(keys.tokens, "qrain|get|files|token_num");
        assert_eq!(keys.last_refill, "qrain|get|files|token_num_last_updated_key");
    }

    #[test]
    fn tagged_keys_share_hash_slot() {
        let tag = AffinityTag::for_resource("files");
        let keys = BucketKeys::new("files", Some(&tag));
        assert_eq!(keys.tokens, "files|token_num|{files}");
        assert_eq!(keys.last_refill, "files|token_num_last_updated_key|{files}");
        for key in keys.to_vec() {
            assert!(key.ends_with("{files}"));
        }
    }

    #[test]
    fn same_resource_same_tag() {
        assert_eq!(
            AffinityTag::for_resource("qrain|get|files"),
            AffinityTag::for_resource("qrain|get|files")
        );
        assert_ne!(
            AffinityTag::for_resource("files"),
            AffinityTag::for_resource("uploads")
        );
    }
}

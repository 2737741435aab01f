//! Cache-size message pair exchanged with the content host.

use serde::{Deserialize, Serialize};

/// Request sent to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheRequest {
    #[serde(rename = "GET_CACHE_SIZE")]
    GetCacheSize,
}

/// Reply from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheResponse {
    /// Approximate bytes held by resident translations.
    #[serde(rename = "CACHE_SIZE")]
    CacheSize { size: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_value(CacheRequest::GetCacheSize).unwrap(),
            json!({"type": "GET_CACHE_SIZE"})
        );
        assert_eq!(
            serde_json::to_value(CacheResponse::CacheSize { size: 1024 }).unwrap(),
            json!({"type": "CACHE_SIZE", "size": 1024})
        );

        let request: CacheRequest =
            serde_json::from_str(r#"{"type":"GET_CACHE_SIZE"}"#).unwrap();
        assert_eq!(request, CacheRequest::GetCacheSize);
        assert!(serde_json::from_str::<CacheRequest>(r#"{"type":"CLEAR"}"#).is_err());
    }
}

/// Key layout for the history keyspace
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> JobRow (JSON)
/// - `events`: evt:{job_id}:{row_id:020} -> EventRow (JSON)
/// - `metadata`: meta:{key} -> value (string)

pub const JOBS_PARTITION: &str = "jobs";
pub const EVENTS_PARTITION: &str = "events";
pub const METADATA_PARTITION: &str = "metadata";

pub const META_NEXT_EVENT_ID: &str = "next_event_id";

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{job_id}").into_bytes()
}

/// Encode an event key: evt:{job_id}:{row_id:020}
///
/// The zero padding keeps a job's events in row-id order under a prefix scan.
pub fn encode_event_key(job_id: &str, row_id: u64) -> Vec<u8> {
    format!("evt:{job_id}:{row_id:020}").into_bytes()
}

/// Encode an event prefix for range scan: evt:{job_id}:
pub fn encode_event_prefix(job_id: &str) -> Vec<u8> {
    format!("evt:{job_id}:").into_bytes()
}

/// Decode an event key into (job_id, row_id).
///
/// Job ids may contain ':', so the row id is taken from the last segment.
pub fn decode_event_key(key: &[u8]) -> Option<(String, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (job_id, row_id) = key_str.strip_prefix("evt:")?.rsplit_once(':')?;
    Some((job_id.to_string(), row_id.parse().ok()?))
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{key}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        assert_eq!(encode_job_key("abc"), b"job:abc");
    }

    #[test]
    fn test_event_key_encoding() {
        let key = encode_event_key("job_1", 42);
        assert_eq!(key, b"evt:job_1:00000000000000000042");
        assert_eq!(decode_event_key(&key), Some(("job_1".to_string(), 42)));
        assert!(key.starts_with(&encode_event_prefix("job_1")));
    }

    #[test]
    fn test_event_key_with_colon_in_job_id() {
        let key = encode_event_key("a:b", 7);
        assert_eq!(decode_event_key(&key), Some(("a:b".to_string(), 7)));
        assert_eq!(decode_event_key(b"evt:nope"), None);
    }

    #[test]
    fn test_event_keys_sort_by_row_id() {
        assert!(encode_event_key("j", 9) < encode_event_key("j", 10));
    }

    #[test]
    fn test_meta_key_encoding() {
        assert_eq!(encode_meta_key(META_NEXT_EVENT_ID), b"meta:next_event_id");
    }
}

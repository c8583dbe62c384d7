//! Trace id propagation through stream metadata.

use crate::hooks::StreamMetadata;

/// Metadata key carrying the trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// W3C trace context header, used as a fallback source.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Write `trace_id` into the metadata. Blank ids are ignored.
pub fn inject_trace_id(metadata: &mut StreamMetadata, trace_id: &str) {
    let trace_id = trace_id.trim();
    if trace_id.is_empty() {
        return;
    }
    let _ = metadata.insert(TRACE_ID_HEADER.to_owned(), trace_id.to_owned());
}

/// Read the trace id from the metadata.
///
/// Prefers `x-trace-id`; otherwise takes the trace-id segment of a
/// `traceparent` value (`version-traceid-spanid-flags`).
pub fn extract_trace_id(metadata: &StreamMetadata) -> Option<String> {
    if let Some(id) = metadata
        .get(TRACE_ID_HEADER)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        return Some(id.to_owned());
    }
    let parent = metadata.get(TRACEPARENT_HEADER)?;
    let mut parts = parent.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then(|| trace_id.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_then_extract() {
        let mut meta = StreamMetadata::new();
        inject_trace_id(&mut meta, "trace-1");
        assert_eq!(extract_trace_id(&meta).as_deref(), Some("trace-1"));
    }

    #[test]
    fn inject_blank_is_ignored() {
        let mut meta = StreamMetadata::new();
        inject_trace_id(&mut meta, "  ");
        assert!(meta.is_empty());
        assert_eq!(extract_trace_id(&meta), None);
    }

    #[test]
    fn falls_back_to_traceparent() {
        let mut meta = StreamMetadata::new();
        let _ = meta.insert(
            TRACEPARENT_HEADER.into(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".into(),
        );
        assert_eq!(
            extract_trace_id(&meta).as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }

    #[test]
    fn rejects_malformed_traceparent() {
        let mut meta = StreamMetadata::new();
        let _ = meta.insert(TRACEPARENT_HEADER.into(), "00-xyz-01".into());
        assert_eq!(extract_trace_id(&meta), None);

        let _ = meta.insert(
            TRACEPARENT_HEADER.into(),
            format!("00-{}-00f067aa0ba902b7-01", "0".repeat(32)),
        );
        assert_eq!(extract_trace_id(&meta), None);
    }

    #[test]
    fn explicit_header_wins() {
        let mut meta = StreamMetadata::new();
        let _ = meta.insert(
            TRACEPARENT_HEADER.into(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".into(),
        );
        inject_trace_id(&mut meta, "mine");
        assert_eq!(extract_trace_id(&meta).as_deref(), Some("mine"));
    }
}

//! Encoding probe for fallback parsing.
//!
//! The probe inspects the first 4 KB of a file: null bytes mean binary
//! (skip the file), a UTF-8 BOM is stripped, and bytes that fail UTF-8
//! validation are decoded as Latin-1 so single-byte legacy files still
//! parse.

/// How a file's bytes should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Valid UTF-8 (after BOM stripping).
    Utf8,
    /// Not valid UTF-8; decode as Latin-1.
    Latin1,
    /// Contains null bytes; skip entirely.
    Binary,
}

/// Bytes inspected by the probe.
const PROBE_WINDOW: usize = 4096;

/// UTF-8 byte-order mark.
const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Probe the first window of `bytes`.
pub fn probe(bytes: &[u8]) -> Probe {
    let window = &bytes[..bytes.len().min(PROBE_WINDOW)];
    if window.contains(&0) {
        return Probe::Binary;
    }
    if std::str::from_utf8(strip_bom(window)).is_ok() {
        Probe::Utf8
    } else {
        Probe::Latin1
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(BOM).unwrap_or(bytes)
}

/// Decode file bytes to text, or `None` for binary files.
pub fn decode(bytes: &[u8]) -> Option<String> {
    match probe(bytes) {
        Probe::Binary => None,
        Probe::Utf8 => {
            let stripped = strip_bom(bytes);
            // The probe only saw the first window; fall back to Latin-1
            // if invalid sequences appear later.
            match std::str::from_utf8(stripped) {
                Ok(text) => Some(text.to_string()),
                Err(_) => Some(latin1_to_string(stripped)),
            }
        }
        Probe::Latin1 => Some(latin1_to_string(strip_bom(bytes))),
    }
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_utf8() {
        assert_eq!(probe(b"fn main() {}"), Probe::Utf8);
        assert_eq!(decode(b"fn main() {}").as_deref(), Some("fn main() {}"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"hello");
        assert_eq!(probe(&bytes), Probe::Utf8);
        assert_eq!(decode(&bytes).as_deref(), Some("hello"));
    }

    #[test]
    fn test_null_bytes_mean_binary() {
        let bytes = b"\x7fELF\x00\x01\x02";
        assert_eq!(probe(bytes), Probe::Binary);
        assert!(decode(bytes).is_none());
    }

    #[test]
    fn test_latin1_fallback() {
        // 0xE9 is 'é' in Latin-1 and invalid as a lone UTF-8 byte.
        let bytes = b"caf\xe9";
        assert_eq!(probe(bytes), Probe::Latin1);
        assert_eq!(decode(bytes).as_deref(), Some("café"));
    }

    #[test]
    fn test_invalid_sequence_past_probe_window() {
        // Valid in the first 4KB, invalid byte later: still decodes.
        let mut bytes = vec![b'a'; 5000];
        bytes.push(0xE9);
        let decoded = decode(&bytes).expect("decodes");
        assert_eq!(decoded.len(), 5001);
    }
}

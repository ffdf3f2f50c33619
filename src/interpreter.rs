use crate::error_codes;

// bytes the runtime's stream framing leaks into captured output
const CONTROL_BYTES: [u8; 3] = [0x00, 0x01, 0x04];

/// What one finished execution amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    // the sandboxed program reported a known error code
    KnownError {
        code: i64,
        message: &'static str,
    },

    // the program printed a content address for the stored result
    Success {
        address: String,
    },
}

/// Strip the runtime's framing bytes and surrounding whitespace.
pub fn sanitize(raw: &[u8]) -> String {
    let cleaned: Vec<u8> = raw.iter()
        .copied()
        .filter(|b| !CONTROL_BYTES.contains(b))
        .collect();
    String::from_utf8_lossy(&cleaned).trim().to_string()
}

/// Classify the raw captured output of one execution.
///
/// The value is sanitized first, so feeding an already-sanitized value
/// back in yields the same classification.
pub fn interpret(raw: &[u8]) -> Outcome {
    let value = sanitize(raw);

    if let Ok(code) = value.parse::<i64>() {
        if let Some(message) = error_codes::message_for(code) {
            return Outcome::KnownError { code, message };
        }
    }

    // the store sometimes renders addresses path-formatted
    let address: String = value.chars().filter(|c| *c != '/').collect();
    if is_plausible_address(&address) {
        Outcome::Success { address }
    } else {
        // empty or unparseable output is never treated as a result
        Outcome::KnownError {
            code: error_codes::MALFORMED_OUTPUT,
            message: error_codes::message_for(error_codes::MALFORMED_OUTPUT)
                .unwrap_or("Computation produced malformed output."),
        }
    }
}

// a usable address must base-58 decode to the store's 34-byte form
// (2-byte multihash prefix + 32-byte digest), otherwise it could never
// be recorded on the ledger
fn is_plausible_address(address: &str) -> bool {
    if address.is_empty() {
        return false;
    }
    bs58::decode(address)
        .into_vec()
        .map(|decoded| decoded.len() == 34)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    #[test]
    fn control_bytes_and_whitespace_are_stripped() {
        let raw = format!("\u{1}\u{0}  {ADDRESS}\n\u{4}");
        assert_eq!(sanitize(raw.as_bytes()), ADDRESS);
    }

    #[test]
    fn known_code_with_framing_noise_is_classified() {
        let outcome = interpret(b"3\x00");
        assert_eq!(
            outcome,
            Outcome::KnownError {
                code: 3,
                message: "Software could not be read inside the sandbox.",
            }
        );
    }

    #[test]
    fn content_address_is_accepted_with_slashes_removed() {
        let raw = format!("/{ADDRESS}/");
        match interpret(raw.as_bytes()) {
            Outcome::Success { address } => assert_eq!(address, ADDRESS),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn interpretation_is_idempotent() {
        let raw = format!("\u{1}\u{0}{ADDRESS}\u{4}\n");
        let first = interpret(raw.as_bytes());
        let sanitized = sanitize(raw.as_bytes());
        let second = interpret(sanitized.as_bytes());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_output_is_a_known_error() {
        assert_eq!(
            interpret(b"\x00\x01\x04   "),
            Outcome::KnownError {
                code: error_codes::MALFORMED_OUTPUT,
                message: "Computation produced malformed output.",
            }
        );
    }

    #[test]
    fn garbage_output_is_a_known_error_not_a_result() {
        // neither a known code nor a decodable 34-byte address
        assert!(matches!(
            interpret(b"0xdeadbeef!!"),
            Outcome::KnownError { .. }
        ));
        // numeric but outside the code table and far too short to be
        // an address
        assert!(matches!(
            interpret(b"123456"),
            Outcome::KnownError { .. }
        ));
    }
}

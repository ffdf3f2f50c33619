// the known error-code table, shared by the runtime adapter and the
// result interpreter. codes below 100 are exit codes of the sandboxed
// wrapper, the rest are statuses the container runtime answers with.

/// Classification used when the sandbox prints something that is neither
/// a known code nor a usable content address.
pub const MALFORMED_OUTPUT: i64 = 1;

const ERROR_TABLE: &[(i64, &str)] = &[
    (MALFORMED_OUTPUT, "Computation produced malformed output."),
    (2, "Dataset could not be read inside the sandbox."),
    (3, "Software could not be read inside the sandbox."),
    (4, "Computation was interrupted before completion."),
    (5, "Result could not be written to the content store."),
    (300, "Dataset not found in the registry."),
    (301, "Software not found in the registry."),
    (400, "Malformed request to the container runtime."),
    (404, "Container or execution unit not found."),
    (409, "Container is not running."),
    (500, "Container runtime internal error."),
];

pub fn is_known_code(code: i64) -> bool {
    ERROR_TABLE.iter().any(|(c, _)| *c == code)
}

pub fn message_for(code: i64) -> Option<&'static str> {
    ERROR_TABLE.iter()
        .find(|(c, _)| *c == code)
        .map(|(_, msg)| *msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve_to_fixed_messages() {
        assert!(is_known_code(404));
        assert_eq!(
            message_for(404),
            Some("Container or execution unit not found.")
        );
        // same code, same message, every time
        assert_eq!(message_for(404), message_for(404));
    }

    #[test]
    fn unknown_codes_are_not_classified() {
        assert!(!is_known_code(0));
        assert!(!is_known_code(200));
        assert_eq!(message_for(200), None);
    }
}

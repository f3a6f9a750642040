//! Identifier minting and validation.
//!
//! Session ids are opaque to the gateway but arrive from untrusted clients
//! (query strings, CLI state files) and end up as store keys and URL path
//! segments, so they are restricted to a conservative charset.

/// Upper bound on a client-supplied session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Mint a new session id (`session_<32 hex chars>`).
pub fn new_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// Mint a new per-stream message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check a client-supplied session id.
///
/// Accepts ASCII alphanumerics plus `-`, `_`, `.` and `:`, 1..=128 chars.
pub fn validate_session_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("session id must not be empty");
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err("session id is too long");
    }
    let ok = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !ok {
        return Err("session id contains invalid characters");
    }
    // Ids become URL path segments for the REST store.
    if id.chars().all(|c| c == '.') {
        return Err("session id must not be only dots");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_session_id_is_valid() {
        let id = new_session_id();
        assert!(id.starts_with("session_"));
        assert_eq!(id.len(), "session_".len() + 32);
        assert!(validate_session_id(&id).is_ok());
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }

    #[test]
    fn rejects_bad_session_ids() {
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
        assert!(validate_session_id("..").is_err());
    }

    #[test]
    fn accepts_reasonable_session_ids() {
        assert!(validate_session_id("s1").is_ok());
        assert!(validate_session_id("web:user-42_tab.3").is_ok());
        assert!(validate_session_id(&"x".repeat(128)).is_ok());
    }
}

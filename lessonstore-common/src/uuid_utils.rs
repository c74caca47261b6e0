//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Whether `s` parses as a UUID in any accepted spelling
pub fn is_valid(s: &str) -> bool {
    parse(s).is_ok()
}

/// Lower-case hyphenated spelling of a valid UUID
pub fn canonical(s: &str) -> Option<String> {
    parse(s).ok().map(|uuid| uuid.hyphenated().to_string())
}

/// Key two identifiers share exactly when they name the same entity
///
/// Valid UUIDs compare by value, anything else by its raw text.
pub fn identity_key(s: &str) -> String {
    canonical(s).unwrap_or_else(|| s.to_string())
}

/// Generate a fresh UUIDv4 string that is not contained in `taken`
pub fn generate_unused<F>(mut taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    loop {
        let candidate = generate().to_string();
        if !taken(&candidate) {
            return candidate;
        }
    }
}

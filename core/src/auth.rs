use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Read/write access to Google Tasks.
pub const TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";
/// Read/write access to Google Calendar.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Fixed scope set requested on every bootstrap.
pub const OAUTH_SCOPES: [&str; 2] = [TASKS_SCOPE, CALENDAR_SCOPE];

/// Generate a PKCE code verifier (43-128 random URL-safe characters).
pub fn generate_code_verifier() -> String {
    let bytes: Vec<u8> = (0..32).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate a PKCE code challenge from a verifier: `BASE64URL_NO_PAD(SHA256(verifier))`.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Random `state` value for the consent redirect.
pub fn generate_state() -> String {
    random_hex(16)
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

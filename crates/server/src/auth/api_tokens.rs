// Agent API token material.
//
// Tokens are shown to the user once. Only the SHA-256 digest and a short
// hint are persisted, so a leaked table cannot be replayed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;
const HINT_CHARS: usize = 4;

pub struct GeneratedToken {
    pub plaintext: String,
    pub hash: String,
    pub hint: String,
}

pub fn generate_token() -> GeneratedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = URL_SAFE_NO_PAD.encode(bytes);
    GeneratedToken { hash: hash_token(&plaintext), hint: token_hint(&plaintext), plaintext }
}

/// Lowercase hex SHA-256 of the token text.
pub fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes()).iter().map(|byte| format!("{byte:02x}")).collect()
}

fn token_hint(token: &str) -> String {
    let skip = token.chars().count().saturating_sub(HINT_CHARS);
    token.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_url_safe_and_hashes_to_stored_digest() {
        let token = generate_token();

        assert_eq!(token.plaintext.len(), 43);
        assert!(token
            .plaintext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(token.hash, hash_token(&token.plaintext));
        assert!(token.plaintext.ends_with(&token.hint));
        assert_eq!(token.hint.len(), 4);
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tokens_do_not_repeat() {
        assert_ne!(generate_token().plaintext, generate_token().plaintext);
    }
}

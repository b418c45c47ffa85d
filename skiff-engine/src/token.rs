//! kubeadm bootstrap tokens

use rand::RngCore;
use rand::rngs::OsRng;

const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every symbol is equally likely
const ACCEPT_BELOW: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Generates a token of the form `[a-z0-9]{6}.[a-z0-9]{16}`
pub fn bootstrap_token() -> String {
    format!("{}.{}", random_string(6), random_string(16))
}

fn random_string(len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];

    while out.len() < len {
        OsRng.fill_bytes(&mut buf);
        for b in buf {
            if b >= ACCEPT_BELOW {
                continue;
            }
            out.push(ALPHABET[(b as usize) % ALPHABET.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }

    out
}

/// Token id, the part before the dot
pub fn token_id(token: &str) -> &str {
    token.split('.').next().unwrap_or(token)
}

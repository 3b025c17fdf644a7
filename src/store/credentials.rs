//! DBeaver credential decoding.
//!
//! Both schemes are fixed by DBeaver, not chosen here; the constants below are
//! pinned by fixture tests.
//!
//! - Modern `credentials-config.json`: AES-128-CBC, IV in the first 16 bytes,
//!   PKCS#7 padding, fixed key.
//! - Legacy `password` attributes: base64 of the password XOR-ed with a fixed key.

use std::collections::HashMap;

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use serde::Deserialize;

/// AES key DBeaver uses for `credentials-config.json`.
pub const CREDENTIALS_KEY: [u8; 16] = [
    0xba, 0xbb, 0x4a, 0x9f, 0x77, 0x4a, 0xb8, 0x53, 0xc9, 0x6c, 0x2d, 0x65, 0x3d, 0xfe, 0x54, 0x4a,
];

/// XOR key DBeaver used for legacy password attributes.
pub const LEGACY_PASSWORD_KEY: &[u8] = b"sdf@!#$verf^wv%6Fwe%$$#FFGwfsdefwfe135s$^H)dg";

const IV_LEN: usize = 16;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Credentials saved for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SavedCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    #[serde(rename = "#connection")]
    connection: Option<SavedCredentials>,
}

/// Decrypts `credentials-config.json` and returns its plaintext bytes.
pub fn decrypt_credentials(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() <= IV_LEN || (data.len() - IV_LEN) % IV_LEN != 0 {
        return Err(format!(
            "unexpected credentials file length {} bytes",
            data.len()
        ));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    let mut buf = ciphertext.to_vec();
    let plaintext = Aes128CbcDec::new_from_slices(&CREDENTIALS_KEY, iv)
        .map_err(|e| format!("invalid key or IV: {e}"))?
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| "decryption failed (bad padding)".to_string())?;
    Ok(plaintext.to_vec())
}

/// Decrypts and parses `credentials-config.json` into a map keyed by connection id.
pub fn parse_credentials(data: &[u8]) -> Result<HashMap<String, SavedCredentials>, String> {
    let plaintext = decrypt_credentials(data)?;
    let entries: HashMap<String, CredentialEntry> = serde_json::from_slice(&plaintext)
        .map_err(|e| format!("decrypted credentials are not valid JSON: {e}"))?;
    Ok(entries
        .into_iter()
        .filter_map(|(id, entry)| entry.connection.map(|c| (id, c)))
        .collect())
}

/// Decodes a legacy password attribute.
///
/// Values that are not valid obfuscated passwords are returned unchanged.
pub fn decode_legacy_password(value: &str) -> String {
    let Ok(bytes) = STANDARD.decode(value.trim()) else {
        return value.to_string();
    };
    let mut plain: Vec<u8> = xor_legacy(&bytes);
    while plain.last() == Some(&0) {
        plain.pop();
    }
    match String::from_utf8(plain) {
        Ok(decoded) if !decoded.chars().any(char::is_control) => decoded,
        _ => value.to_string(),
    }
}

/// Encodes a password the way legacy DBeaver stored it.
pub fn encode_legacy_password(password: &str) -> String {
    STANDARD.encode(xor_legacy(password.as_bytes()))
}

fn xor_legacy(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .zip(LEGACY_PASSWORD_KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

//! HKDF-SHA256 and truncated-HMAC primitives for the media protocol.
//!
//! Key layout is fixed by the protocol: HKDF-expanding a 32-byte media key
//! with a per-category info string yields 112 bytes, of which the first 80
//! are used as IV (16) ‖ AES-256 key (32) ‖ HMAC key (32).

use crate::error::{PipelineError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const HASH_LEN: usize = 32;

/// Trailing MAC length on encrypted media blobs.
pub const MAC_LEN: usize = 10;

/// Expanded key material sliced per the protocol layout.
pub struct MediaKeys {
    pub iv: [u8; 16],
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
}

/// HKDF-Extract with SHA-256. The media protocol uses an all-zero salt.
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
    mac.update(ikm);
    mac.finalize().into_bytes().into()
}

/// HKDF-Expand with SHA-256 per RFC 5869.
pub fn hkdf_expand(prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let n = length.div_ceil(HASH_LEN);
    if n >= 255 {
        return Err(PipelineError::Validation(
            "HKDF: requested output length too large".into(),
        ));
    }

    let mut okm = Vec::with_capacity(n * HASH_LEN);
    let mut t: Vec<u8> = Vec::new();
    for i in 1..=n {
        let mut mac = HmacSha256::new_from_slice(prk).expect("HMAC accepts any key length");
        mac.update(&t);
        mac.update(info);
        mac.update(&[i as u8]);
        t = mac.finalize().into_bytes().to_vec();
        okm.extend_from_slice(&t);
    }
    okm.truncate(length);
    Ok(okm)
}

/// Derive IV, cipher key, and MAC key from a 32-byte media key and the
/// category's info string.
pub fn derive_media_keys(media_key: &[u8], app_info: &str) -> Result<MediaKeys> {
    let prk = hkdf_extract(&[0u8; HASH_LEN], media_key);
    let expanded = hkdf_expand(&prk, app_info.as_bytes(), 112)?;

    let mut keys = MediaKeys {
        iv: [0u8; 16],
        cipher_key: [0u8; 32],
        mac_key: [0u8; 32],
    };
    keys.iv.copy_from_slice(&expanded[0..16]);
    keys.cipher_key.copy_from_slice(&expanded[16..48]);
    keys.mac_key.copy_from_slice(&expanded[48..80]);
    Ok(keys)
}

/// First [`MAC_LEN`] bytes of HMAC-SHA256(mac_key, iv ‖ ciphertext).
pub fn compute_truncated_mac(mac_key: &[u8], iv: &[u8], ciphertext: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    let full = mac.finalize().into_bytes();
    let mut truncated = [0u8; MAC_LEN];
    truncated.copy_from_slice(&full[..MAC_LEN]);
    truncated
}

/// Constant-time comparison of the blob's trailing MAC against the
/// recomputed one. A mismatch means the download is undecryptable.
pub fn verify_truncated_mac(mac_key: &[u8], iv: &[u8], ciphertext: &[u8], expected: &[u8]) -> bool {
    let computed = compute_truncated_mac(mac_key, iv, ciphertext);
    computed.ct_eq(expected).into()
}

pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5869 test case 1.
    #[test]
    fn hkdf_matches_rfc5869_vectors() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let prk = hkdf_extract(&salt, &ikm);
        assert_eq!(
            hex::encode(prk),
            "077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5"
        );

        let okm = hkdf_expand(&prk, &info, 42).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn derived_keys_have_protocol_lengths_and_are_deterministic() {
        let media_key = [7u8; 32];
        let a = derive_media_keys(&media_key, "WhatsApp Image Keys").unwrap();
        let b = derive_media_keys(&media_key, "WhatsApp Image Keys").unwrap();
        assert_eq!(a.iv.len(), 16);
        assert_eq!(a.cipher_key.len(), 32);
        assert_eq!(a.mac_key.len(), 32);
        assert_eq!(a.iv, b.iv);
        assert_eq!(a.cipher_key, b.cipher_key);
        assert_eq!(a.mac_key, b.mac_key);
    }

    #[test]
    fn different_categories_derive_different_keys() {
        let media_key = [7u8; 32];
        let img = derive_media_keys(&media_key, "WhatsApp Image Keys").unwrap();
        let vid = derive_media_keys(&media_key, "WhatsApp Video Keys").unwrap();
        assert_ne!(img.cipher_key, vid.cipher_key);
    }

    #[test]
    fn hkdf_expand_rejects_oversized_output() {
        let prk = [0u8; 32];
        assert!(hkdf_expand(&prk, b"info", 255 * 32).is_err());
    }

    #[test]
    fn mac_verification_rejects_single_bit_flip() {
        let keys = derive_media_keys(&[1u8; 32], "WhatsApp Audio Keys").unwrap();
        let ciphertext = b"0123456789abcdef0123456789abcdef";
        let mac = compute_truncated_mac(&keys.mac_key, &keys.iv, ciphertext);
        assert!(verify_truncated_mac(&keys.mac_key, &keys.iv, ciphertext, &mac));

        let mut tampered = ciphertext.to_vec();
        tampered[5] ^= 0x01;
        assert!(!verify_truncated_mac(&keys.mac_key, &keys.iv, &tampered, &mac));

        let mut bad_mac = mac;
        bad_mac[0] ^= 0x80;
        assert!(!verify_truncated_mac(&keys.mac_key, &keys.iv, ciphertext, &bad_mac));
    }
}

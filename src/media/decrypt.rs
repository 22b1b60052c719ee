//! Decryption engine for end-to-end-encrypted media.
//!
//! An encrypted download is `ciphertext ‖ mac[0..10]`, where the keys come
//! from HKDF-expanding the out-of-band 32-byte media key with the
//! category's info string. MAC failure is fatal for the message: a
//! tampered or corrupt blob cannot be recovered by retrying. The optional
//! sha256 checks against the provider-supplied digests are advisory only —
//! observed payloads sometimes carry stale hashes, so a mismatch is logged
//! and never blocks the result.

use crate::crypto::{self, MAC_LEN};
use crate::domain::MediaType;
use crate::error::{PipelineError, Result};
use crate::media::mimetype;
use crate::observability::metrics;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug)]
pub struct DecryptedMedia {
    pub data: Vec<u8>,
    pub mimetype: String,
    pub file_size: usize,
}

/// Inputs for one decryption, beyond the blob itself.
pub struct DecryptRequest<'a> {
    pub media_key_b64: &'a str,
    pub media_type: MediaType,
    /// Advisory sha256 (base64) of the plaintext.
    pub file_sha256: Option<&'a str>,
    /// Advisory sha256 (base64) of the ciphertext-with-MAC.
    pub file_enc_sha256: Option<&'a str>,
}

/// Recover plaintext media from an already-downloaded encrypted blob.
///
/// All failure modes surface as [`PipelineError::Decrypt`] carrying the
/// media category; there is never partially-decrypted output.
pub fn decrypt_media(encrypted: &[u8], req: &DecryptRequest<'_>) -> Result<DecryptedMedia> {
    let media_type = req.media_type;
    decrypt_inner(encrypted, req).map_err(|e| {
        metrics::media::decrypt_error();
        PipelineError::decrypt(media_type, e)
    })
}

fn decrypt_inner(encrypted: &[u8], req: &DecryptRequest<'_>) -> Result<DecryptedMedia> {
    let media_key = decode_media_key(req.media_key_b64)?;

    if let Some(expected) = req.file_enc_sha256 {
        advisory_hash_check("encrypted", encrypted, expected);
    }

    let keys = crypto::derive_media_keys(&media_key, req.media_type.app_info())?;

    if encrypted.len() < MAC_LEN {
        return Err(PipelineError::Validation(format!(
            "encrypted blob too small to carry a MAC: {} bytes",
            encrypted.len()
        )));
    }
    let (ciphertext, file_mac) = encrypted.split_at(encrypted.len() - MAC_LEN);

    if !crypto::verify_truncated_mac(&keys.mac_key, &keys.iv, ciphertext, file_mac) {
        metrics::media::mac_failure();
        return Err(PipelineError::Integrity(
            "MAC verification failed, file is corrupt or the key is wrong".into(),
        ));
    }

    let data = Aes256CbcDec::new(&keys.cipher_key.into(), &keys.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| PipelineError::Validation(format!("AES-256-CBC decryption failed: {e}")))?;

    if let Some(expected) = req.file_sha256 {
        advisory_hash_check("decrypted", &data, expected);
    }

    let detected = mimetype::detect(&data, req.media_type);
    debug!(
        media_type = %req.media_type,
        bytes = data.len(),
        mimetype = detected,
        "media decrypted"
    );
    metrics::media::decrypt_success(data.len());

    Ok(DecryptedMedia {
        file_size: data.len(),
        mimetype: detected.to_string(),
        data,
    })
}

fn decode_media_key(media_key_b64: &str) -> Result<Vec<u8>> {
    let key = BASE64
        .decode(media_key_b64)
        .map_err(|e| PipelineError::Validation(format!("media key is not valid base64: {e}")))?;
    if key.len() != 32 {
        return Err(PipelineError::Validation(format!(
            "media key must be 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// Log-only digest comparison; see the module docs for why this never
/// fails the pipeline.
fn advisory_hash_check(stage: &str, data: &[u8], expected_b64: &str) {
    let actual = BASE64.encode(crypto::sha256(data));
    if actual != expected_b64 {
        metrics::media::advisory_hash_mismatch();
        warn!(
            stage,
            expected = expected_b64,
            actual = %actual,
            "advisory hash mismatch on {stage} file"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    /// Build a protocol-shaped blob (ciphertext ‖ truncated MAC) from a
    /// plaintext, for round-trip tests.
    pub fn encrypt_media(plaintext: &[u8], media_key: &[u8; 32], media_type: MediaType) -> Vec<u8> {
        let keys = crypto::derive_media_keys(media_key, media_type.app_info()).unwrap();
        let mut blob = Aes256CbcEnc::new(&keys.cipher_key.into(), &keys.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let mac = crypto::compute_truncated_mac(&keys.mac_key, &keys.iv, &blob);
        blob.extend_from_slice(&mac);
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::encrypt_media;
    use super::*;

    fn key_b64(key: &[u8; 32]) -> String {
        BASE64.encode(key)
    }

    fn request<'a>(media_key_b64: &'a str, media_type: MediaType) -> DecryptRequest<'a> {
        DecryptRequest {
            media_key_b64,
            media_type,
            file_sha256: None,
            file_enc_sha256: None,
        }
    }

    #[test]
    fn round_trip_recovers_plaintext_exactly() {
        let media_key = [0x42u8; 32];
        let plaintext = b"\xff\xd8\xff\xe0 jpeg-ish payload for a round trip test";
        let blob = encrypt_media(plaintext, &media_key, MediaType::Image);

        let b64 = key_b64(&media_key);
        let result = decrypt_media(&blob, &request(&b64, MediaType::Image)).unwrap();
        assert_eq!(result.data, plaintext);
        assert_eq!(result.file_size, plaintext.len());
        assert_eq!(result.mimetype, "image/jpeg");
    }

    #[test]
    fn corrupted_mac_is_an_integrity_error() {
        let media_key = [0x42u8; 32];
        let plaintext = [0xaau8; 25];
        let mut blob = encrypt_media(&plaintext, &media_key, MediaType::Image);
        let last = blob.len() - 1;
        blob[last] ^= 0xff;

        let b64 = key_b64(&media_key);
        let err = decrypt_media(&blob, &request(&b64, MediaType::Image)).unwrap_err();
        match err {
            PipelineError::Decrypt { media_type, source } => {
                assert_eq!(media_type, MediaType::Image);
                assert!(matches!(*source, PipelineError::Integrity(_)));
            }
            other => panic!("expected Decrypt error, got {other:?}"),
        }
    }

    #[test]
    fn arbitrary_ciphertext_with_bogus_mac_fails_closed() {
        // 40 bytes of ciphertext plus a 10-byte MAC that matches nothing:
        // the MAC check runs before any cipher work, so this never reaches
        // the decryptor and never yields an empty buffer.
        let mut blob = vec![0x5au8; 40];
        blob.extend_from_slice(&[0u8; 10]);

        let b64 = key_b64(&[0x42u8; 32]);
        let err = decrypt_media(&blob, &request(&b64, MediaType::Image)).unwrap_err();
        match err {
            PipelineError::Decrypt { source, .. } => {
                assert!(matches!(*source, PipelineError::Integrity(_)));
            }
            other => panic!("expected Decrypt error, got {other:?}"),
        }
    }

    #[test]
    fn flipped_ciphertext_byte_is_an_integrity_error() {
        let media_key = [0x01u8; 32];
        let mut blob = encrypt_media(b"plaintext under test", &media_key, MediaType::Document);
        blob[0] ^= 0x01;

        let b64 = key_b64(&media_key);
        let err = decrypt_media(&blob, &request(&b64, MediaType::Document)).unwrap_err();
        assert!(matches!(err, PipelineError::Decrypt { .. }));
    }

    #[test]
    fn undersized_blob_is_rejected() {
        let b64 = key_b64(&[0u8; 32]);
        let err = decrypt_media(&[1, 2, 3], &request(&b64, MediaType::Audio)).unwrap_err();
        match err {
            PipelineError::Decrypt { source, .. } => {
                assert!(matches!(*source, PipelineError::Validation(_)));
            }
            other => panic!("expected Decrypt error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let short = BASE64.encode([0u8; 16]);
        let err = decrypt_media(&[0u8; 64], &request(&short, MediaType::Video)).unwrap_err();
        assert!(matches!(err, PipelineError::Decrypt { .. }));

        let not_b64 = "!!not-base64!!";
        assert!(decrypt_media(&[0u8; 64], &request(not_b64, MediaType::Video)).is_err());
    }

    #[test]
    fn advisory_hash_mismatch_does_not_fail() {
        let media_key = [0x09u8; 32];
        let plaintext = b"advisory hashes never block";
        let blob = encrypt_media(plaintext, &media_key, MediaType::Document);

        let b64 = key_b64(&media_key);
        let req = DecryptRequest {
            media_key_b64: &b64,
            media_type: MediaType::Document,
            file_sha256: Some("c3RhbGUgaGFzaA=="),
            file_enc_sha256: Some("YW5vdGhlciBzdGFsZSBoYXNo"),
        };
        let result = decrypt_media(&blob, &req).unwrap();
        assert_eq!(result.data, plaintext);
    }

    #[test]
    fn fallback_mimetype_applies_when_no_signature_matches() {
        let media_key = [0x33u8; 32];
        let plaintext = [0u8; 64];
        let blob = encrypt_media(&plaintext, &media_key, MediaType::Audio);

        let b64 = key_b64(&media_key);
        let result = decrypt_media(&blob, &request(&b64, MediaType::Audio)).unwrap();
        assert_eq!(result.mimetype, "audio/ogg");
    }
}

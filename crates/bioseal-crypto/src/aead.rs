//! AES-256-GCM sealing of biometric payloads
//!
//! A 128-bit random nonce is drawn for every call. The associated data
//! `b"biometric-data"` is bound to every in-memory payload so a blob produced
//! for another purpose under the same key fails authentication here. Image
//! files are sealed with empty associated data (see [`crate::file`]).

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use bioseal_core::{BiosealError, BiosealResult};

use crate::kdf::WorkingKey;
use crate::{AAD, NONCE_SIZE, TAG_SIZE};

/// AES-256-GCM with a 16-byte nonce (GHASH-derived counter block)
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const ALGORITHM: &str = "aes-256-gcm";

/// Nonce, tag, and ciphertext of one sealed payload. Holds no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncodedBlob", into = "EncodedBlob")]
pub struct EncryptedBlob {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Length of the concatenated on-disk form.
    pub fn encoded_len(&self) -> usize {
        NONCE_SIZE + TAG_SIZE + self.ciphertext.len()
    }

    /// `nonce ‖ tag ‖ ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split `nonce ‖ tag ‖ ciphertext` at its fixed offsets.
    ///
    /// Input shorter than nonce + tag cannot have been produced by
    /// [`encrypt`] and is reported as an integrity violation.
    pub fn from_bytes(bytes: &[u8]) -> BiosealResult<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(BiosealError::IntegrityViolation(format!(
                "encrypted blob too short: {} bytes (minimum {})",
                bytes.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }
        let (nonce, rest) = bytes.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);

        let mut blob = Self {
            nonce: [0u8; NONCE_SIZE],
            tag: [0u8; TAG_SIZE],
            ciphertext: ciphertext.to_vec(),
        };
        blob.nonce.copy_from_slice(nonce);
        blob.tag.copy_from_slice(tag);
        Ok(blob)
    }
}

/// Text form for storage in a database column
#[derive(Serialize, Deserialize)]
struct EncodedBlob {
    algorithm: String,
    nonce: String,
    tag: String,
    ciphertext: String,
}

impl From<EncryptedBlob> for EncodedBlob {
    fn from(blob: EncryptedBlob) -> Self {
        Self {
            algorithm: ALGORITHM.into(),
            nonce: B64.encode(blob.nonce),
            tag: B64.encode(blob.tag),
            ciphertext: B64.encode(&blob.ciphertext),
        }
    }
}

impl TryFrom<EncodedBlob> for EncryptedBlob {
    type Error = String;

    fn try_from(encoded: EncodedBlob) -> Result<Self, Self::Error> {
        if encoded.algorithm != ALGORITHM {
            return Err(format!("unsupported algorithm: {}", encoded.algorithm));
        }
        let nonce = decode_fixed::<NONCE_SIZE>("nonce", &encoded.nonce)?;
        let tag = decode_fixed::<TAG_SIZE>("tag", &encoded.tag)?;
        let ciphertext = B64
            .decode(&encoded.ciphertext)
            .map_err(|e| format!("ciphertext: {e}"))?;
        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], String> {
    let bytes = B64.decode(value).map_err(|e| format!("{field}: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("{field}: expected {N} bytes, got {}", b.len()))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &WorkingKey) -> BiosealResult<EncryptedBlob> {
    seal(plaintext, key, AAD)
}

/// Verify the tag and return the plaintext.
///
/// Any mismatch (wrong key, altered nonce, tag, or ciphertext) is an
/// [`BiosealError::IntegrityViolation`]; no unverified bytes are returned.
pub fn decrypt(blob: &EncryptedBlob, key: &WorkingKey) -> BiosealResult<Vec<u8>> {
    open(blob, key, AAD)
}

pub(crate) fn seal(
    plaintext: &[u8],
    key: &WorkingKey,
    aad: &[u8],
) -> BiosealResult<EncryptedBlob> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    seal_with_nonce(plaintext, key, nonce, aad)
}

/// Callers must never reuse `nonce` under the same key.
pub(crate) fn seal_with_nonce(
    plaintext: &[u8],
    key: &WorkingKey,
    nonce: [u8; NONCE_SIZE],
    aad: &[u8],
) -> BiosealResult<EncryptedBlob> {
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce), aad, &mut buffer)
        .map_err(|e| {
            buffer.zeroize();
            BiosealError::Other(anyhow::anyhow!("biometric encryption failed: {e}"))
        })?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(EncryptedBlob {
        nonce,
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

pub(crate) fn open(blob: &EncryptedBlob, key: &WorkingKey, aad: &[u8]) -> BiosealResult<Vec<u8>> {
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut buffer = blob.ciphertext.clone();
    match cipher.decrypt_in_place_detached(
        Nonce::<U16>::from_slice(&blob.nonce),
        aad,
        &mut buffer,
        Tag::from_slice(&blob.tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(BiosealError::IntegrityViolation(
                "authentication failed: wrong key or tampered data".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;

    /// JFIF SOI + APP0 marker, the first 12 bytes of a typical face capture
    const JPEG_HEADER: [u8; 12] = [
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
    ];

    fn key(b: u8) -> WorkingKey {
        WorkingKey::from_bytes([b; KEY_SIZE])
    }

    #[test]
    fn test_known_answer() {
        let blob = seal_with_nonce(&JPEG_HEADER, &key(0x11), [0x22; NONCE_SIZE], AAD).unwrap();

        assert_eq!(hex::encode(&blob.ciphertext), "e36beecf9ef7d5f47ab7e636");
        assert_eq!(hex::encode(blob.tag), "d8161014725f9773b786fc77eb6730bd");
        assert_eq!(decrypt(&blob, &key(0x11)).unwrap(), JPEG_HEADER);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let blob = encrypt(&JPEG_HEADER, &key(42)).unwrap();

        assert_eq!(blob.ciphertext.len(), JPEG_HEADER.len());
        assert_eq!(decrypt(&blob, &key(42)).unwrap(), JPEG_HEADER);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let blob = encrypt(b"", &key(1)).unwrap();
        assert!(blob.ciphertext.is_empty());
        assert_eq!(decrypt(&blob, &key(1)).unwrap(), b"");
    }

    #[test]
    fn test_fresh_nonce_every_call() {
        let a = encrypt(&JPEG_HEADER, &key(5)).unwrap();
        let b = encrypt(&JPEG_HEADER, &key(5)).unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_is_integrity_violation() {
        let blob = encrypt(b"dados-secretos", &key(1)).unwrap();
        let err = decrypt(&blob, &key(2)).unwrap_err();
        assert!(matches!(err, BiosealError::IntegrityViolation(_)));
    }

    #[test]
    fn test_tampering_any_field_is_detected() {
        let blob = encrypt(&JPEG_HEADER, &key(9)).unwrap();

        let mut bad_ct = blob.clone();
        bad_ct.ciphertext[3] ^= 0x01;
        let mut bad_tag = blob.clone();
        bad_tag.tag[0] ^= 0x80;
        let mut bad_nonce = blob.clone();
        bad_nonce.nonce[15] ^= 0xFF;

        for tampered in [bad_ct, bad_tag, bad_nonce] {
            assert!(matches!(
                decrypt(&tampered, &key(9)),
                Err(BiosealError::IntegrityViolation(_))
            ));
        }
    }

    #[test]
    fn test_ciphertext_without_aad_is_rejected() {
        // Sealed without the biometric-data tag, as image files are
        let k = key(4);
        let foreign = seal(&JPEG_HEADER, &k, b"").unwrap();

        assert!(matches!(
            decrypt(&foreign, &k),
            Err(BiosealError::IntegrityViolation(_))
        ));
        assert_eq!(open(&foreign, &k, b"").unwrap(), JPEG_HEADER);
    }

    #[test]
    fn test_byte_layout() {
        let blob = encrypt(b"abc", &key(3)).unwrap();
        let bytes = blob.to_bytes();

        assert_eq!(bytes.len(), NONCE_SIZE + TAG_SIZE + 3);
        assert_eq!(&bytes[..NONCE_SIZE], &blob.nonce);
        assert_eq!(&bytes[NONCE_SIZE..NONCE_SIZE + TAG_SIZE], &blob.tag);
        assert_eq!(EncryptedBlob::from_bytes(&bytes).unwrap(), blob);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let err = EncryptedBlob::from_bytes(&[0u8; NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, BiosealError::IntegrityViolation(_)));
    }

    #[test]
    fn test_json_form() {
        let blob = encrypt(b"template", &key(8)).unwrap();
        let json = serde_json::to_value(&blob).unwrap();

        assert_eq!(json["algorithm"], "aes-256-gcm");
        let parsed: EncryptedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, blob);
    }

    #[test]
    fn test_json_rejects_bad_nonce_length() {
        let json = serde_json::json!({
            "algorithm": "aes-256-gcm",
            "nonce": B64.encode([0u8; 12]),
            "tag": B64.encode([0u8; 16]),
            "ciphertext": "",
        });
        assert!(serde_json::from_value::<EncryptedBlob>(json).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048), k in any::<[u8; 32]>()) {
            let key = WorkingKey::from_bytes(k);
            let blob = encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(decrypt(&blob, &key).unwrap(), plaintext);
        }

        #[test]
        fn prop_other_key_fails(plaintext in proptest::collection::vec(any::<u8>(), 0..512), k1 in any::<[u8; 32]>(), k2 in any::<[u8; 32]>()) {
            prop_assume!(k1 != k2);
            let blob = encrypt(&plaintext, &WorkingKey::from_bytes(k1)).unwrap();
            let result = decrypt(&blob, &WorkingKey::from_bytes(k2));
            prop_assert!(matches!(result, Err(BiosealError::IntegrityViolation(_))));
        }
    }
}

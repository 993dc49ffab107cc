//! Encrypt-then-MAC envelope for binary frame payloads.
//!
//! Every binary frame body is AES-256-CBC ciphertext (random IV prepended)
//! signed with HMAC-SHA256. The envelope sees only payload bytes; tags and
//! routing bytes are added by the framer.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::WaError;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Length of the HMAC-SHA256 signature prefix.
pub const MAC_LEN: usize = 32;

/// AES block and IV size.
pub const IV_LEN: usize = 16;

/// Seal a plaintext payload: `hmac(iv || ciphertext) || iv || ciphertext`.
pub fn seal(plaintext: &[u8], enc_key: &[u8; 32], mac_key: &[u8; 32]) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    seal_with_iv(plaintext, &iv, enc_key, mac_key)
}

fn seal_with_iv(plaintext: &[u8], iv: &[u8; IV_LEN], enc_key: &[u8; 32], mac_key: &[u8; 32]) -> Vec<u8> {
    let ciphertext =
        Aes256CbcEnc::new(enc_key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut body = Vec::with_capacity(IV_LEN + ciphertext.len());
    body.extend_from_slice(iv);
    body.extend_from_slice(&ciphertext);

    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC can take key of any size");
    mac.update(&body);
    let signature = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(MAC_LEN + body.len());
    out.extend_from_slice(&signature);
    out.extend_from_slice(&body);
    out
}

/// Verify and decrypt a sealed payload.
///
/// HMAC comparison is constant time. Fails with `BadMac` on signature
/// mismatch and `BadPadding` when the ciphertext does not unpad.
pub fn open(frame: &[u8], enc_key: &[u8; 32], mac_key: &[u8; 32]) -> Result<Vec<u8>, WaError> {
    if frame.len() < MAC_LEN + IV_LEN {
        return Err(WaError::Frame(format!(
            "sealed frame too short: {} bytes",
            frame.len()
        )));
    }

    let (signature, body) = frame.split_at(MAC_LEN);
    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(signature).map_err(|_| WaError::BadMac)?;

    let (iv, ciphertext) = body.split_at(IV_LEN);
    let iv: &[u8; IV_LEN] = iv.try_into().expect("split at IV_LEN");
    Aes256CbcDec::new(enc_key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| WaError::BadPadding)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENC: [u8; 32] = [0x11; 32];
    const MAC: [u8; 32] = [0x22; 32];

    #[test]
    fn test_seal_open_roundtrip() {
        let plaintext = b"binary node payload";
        let sealed = seal(plaintext, &ENC, &MAC);
        let opened = open(&sealed, &ENC, &MAC).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_ciphertext_block_aligned() {
        let sealed = seal(b"xyz", &[0u8; 32], &[0u8; 32]);
        // mac || iv || ciphertext, ciphertext a whole number of blocks
        assert_eq!((sealed.len() - MAC_LEN) % 16, 0);
        assert!(sealed.len() >= MAC_LEN + IV_LEN + 16);
    }

    #[test]
    fn test_tampered_frame_fails_mac() {
        let mut sealed = seal(b"payload", &ENC, &MAC);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(open(&sealed, &ENC, &MAC), Err(WaError::BadMac));
    }

    #[test]
    fn test_wrong_mac_key_fails() {
        let sealed = seal(b"payload", &ENC, &MAC);
        assert_eq!(open(&sealed, &ENC, &[0x33; 32]), Err(WaError::BadMac));
    }

    #[test]
    fn test_invalid_padding_rejected() {
        use cbc::cipher::block_padding::NoPadding;

        // A block decrypting to all zeros has no valid pkcs7 padding byte.
        let iv = [0x44u8; IV_LEN];
        let ciphertext = Aes256CbcEnc::new((&ENC).into(), (&iv).into())
            .encrypt_padded_vec_mut::<NoPadding>(&[0u8; 16]);

        let mut body = iv.to_vec();
        body.extend_from_slice(&ciphertext);
        let mut mac = HmacSha256::new_from_slice(&MAC).unwrap();
        mac.update(&body);
        let mut sealed = mac.finalize().into_bytes().to_vec();
        sealed.extend_from_slice(&body);

        assert_eq!(open(&sealed, &ENC, &MAC), Err(WaError::BadPadding));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(
            open(&[0u8; 16], &ENC, &MAC),
            Err(WaError::Frame(_))
        ));
    }

    #[test]
    fn test_distinct_ivs() {
        let a = seal(b"same payload", &ENC, &MAC);
        let b = seal(b"same payload", &ENC, &MAC);
        assert_ne!(a, b);
    }
}

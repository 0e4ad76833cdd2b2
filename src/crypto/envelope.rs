use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{GatewayError, GatewayResult};

/// Byte size of the generated symmetric key (AES-256).
pub const KEY_LEN: usize = 256 / 8;

/// Byte size of the RSA-wrapped symmetric key. Fixed for the 2048-bit
/// modulus family; callers size their reads on this.
pub const WRAPPED_KEY_LEN: usize = 256;

const BLOCK_LEN: usize = 16;
const IV_LEN: usize = 16;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Encrypt plaintext for the holder of the private key.
///
/// A fresh random AES-256 key is generated per call, wrapped with the public
/// key (RSA-OAEP, SHA-256 for both the hash and the MGF), and prepended to
/// the AES-CFB ciphertext. The IV is derived from the key (see [`make_iv`]),
/// which keeps the wire format compact; reuse is not a concern since the key
/// is never reused.
pub fn encrypt(public_key: &RsaPublicKey, plaintext: &[u8]) -> GatewayResult<Vec<u8>> {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);

    let wrapped = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)
        .map_err(|_| GatewayError::Crypto)?;
    if wrapped.len() != WRAPPED_KEY_LEN {
        // key is not from the 2048-bit modulus family
        return Err(GatewayError::Crypto);
    }

    let mut data = pad(plaintext);
    let cipher = Aes256CfbEnc::new_from_slices(&key, &make_iv(&key))
        .map_err(|_| GatewayError::Crypto)?;
    cipher.encrypt(&mut data);

    let mut out = wrapped;
    out.extend_from_slice(&data);
    Ok(out)
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Any unwrap, cipher or padding failure surfaces as the same opaque error:
/// a wrong key is indistinguishable from corrupt ciphertext.
pub fn decrypt(private_key: &RsaPrivateKey, bytes: &[u8]) -> GatewayResult<Vec<u8>> {
    if bytes.len() < WRAPPED_KEY_LEN {
        return Err(GatewayError::Crypto);
    }
    let (wrapped, ciphertext) = bytes.split_at(WRAPPED_KEY_LEN);

    let key = private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| GatewayError::Crypto)?;
    if key.len() != KEY_LEN {
        return Err(GatewayError::Crypto);
    }

    let mut data = ciphertext.to_vec();
    let cipher = Aes256CfbDec::new_from_slices(&key, &make_iv(&key))
        .map_err(|_| GatewayError::Crypto)?;
    cipher.decrypt(&mut data);

    unpad(&mut data)?;
    Ok(data)
}

/// Derive the IV from key material: the 16-byte MD5 digest of the key,
/// cycled to IV length.
fn make_iv(key: &[u8]) -> [u8; IV_LEN] {
    let digest = Md5::digest(key);
    let mut iv = [0u8; IV_LEN];
    for (i, b) in iv.iter_mut().enumerate() {
        *b = digest[i % digest.len()];
    }
    iv
}

/// PKCS#5-style padding to the AES block size. A full padding block is added
/// when the plaintext is already block-aligned.
fn pad(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
    let mut data = Vec::with_capacity(plaintext.len() + pad_len);
    data.extend_from_slice(plaintext);
    data.resize(plaintext.len() + pad_len, pad_len as u8);
    data
}

fn unpad(data: &mut Vec<u8>) -> GatewayResult<()> {
    let pad_len = *data.last().ok_or(GatewayError::Crypto)? as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(GatewayError::Crypto);
    }
    if !data[data.len() - pad_len..].iter().all(|&b| b as usize == pad_len) {
        return Err(GatewayError::Crypto);
    }
    data.truncate(data.len() - pad_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> (RsaPublicKey, RsaPrivateKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        (RsaPublicKey::from(&private), private)
    }

    #[test]
    fn round_trip() {
        let (public, private) = test_keypair();
        for plaintext in [
            &b""[..],
            &b"short"[..],
            &b"exactly sixteen!"[..],
            &b"a somewhat longer plaintext spanning multiple AES blocks \xf0\x9f\x93\xb1"[..],
        ] {
            let envelope = encrypt(&public, plaintext).unwrap();
            assert!(envelope.len() > WRAPPED_KEY_LEN);
            assert_eq!(decrypt(&private, &envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn fresh_key_per_encryption() {
        let (public, private) = test_keypair();
        let a = encrypt(&public, b"same plaintext").unwrap();
        let b = encrypt(&public, b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&private, &a).unwrap(), b"same plaintext");
        assert_eq!(decrypt(&private, &b).unwrap(), b"same plaintext");
    }

    #[test]
    fn wrong_private_key_fails() {
        let (public, _) = test_keypair();
        let (_, other_private) = test_keypair();
        let envelope = encrypt(&public, b"for someone else").unwrap();
        assert!(decrypt(&other_private, &envelope).is_err());
    }

    #[test]
    fn tampered_wrapped_key_fails() {
        let (public, private) = test_keypair();
        let mut envelope = encrypt(&public, b"payload").unwrap();
        envelope[WRAPPED_KEY_LEN / 2] ^= 0x01;
        assert!(decrypt(&private, &envelope).is_err());
    }

    #[test]
    fn tampered_ciphertext_never_yields_plaintext() {
        let (public, private) = test_keypair();
        let plaintext = b"tamper me".to_vec();
        let mut envelope = encrypt(&public, &plaintext).unwrap();
        let ct_byte = WRAPPED_KEY_LEN + 3;
        envelope[ct_byte] ^= 0x80;
        assert!(!matches!(decrypt(&private, &envelope), Ok(p) if p == plaintext));
    }

    #[test]
    fn truncated_envelope_fails() {
        let (public, private) = test_keypair();
        let envelope = encrypt(&public, b"payload").unwrap();
        assert!(decrypt(&private, &envelope[..WRAPPED_KEY_LEN - 1]).is_err());
        assert!(decrypt(&private, &envelope[..WRAPPED_KEY_LEN]).is_err());
    }

    #[test]
    fn iv_is_md5_of_key() {
        let key = [7u8; KEY_LEN];
        let iv = make_iv(&key);
        assert_eq!(iv.as_slice(), Md5::digest(key).as_slice());
    }

    #[test]
    fn pad_unpad_round_trip() {
        for len in 0..=33 {
            let plaintext: Vec<u8> = (0..len as u8).collect();
            let mut padded = pad(&plaintext);
            assert_eq!(padded.len() % BLOCK_LEN, 0);
            unpad(&mut padded).unwrap();
            assert_eq!(padded, plaintext);
        }
    }
}

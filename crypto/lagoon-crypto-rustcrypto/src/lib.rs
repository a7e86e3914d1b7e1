//! Portable [Crypto](lagoon_shared::Crypto) backend on the RustCrypto and
//! dalek crates.
//!
//! Curve points cross the trait boundary as 32-byte elements: the
//! x-coordinate for P-256 and the u-coordinate for X25519. For ECDSA
//! verification the full point is recovered by trying both y parities; for
//! ECDH the shared x-coordinate is parity-invariant, so either decompression
//! works.
#![no_std]

use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U13, U16, U8};
use ccm::Ccm;
use ed25519_dalek::Signature as Ed25519Signature;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::VerifyingKey as Ed25519VerifyingKey;
use hkdf::Hkdf;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use lagoon_shared::*;

type AesCcm8 = Ccm<aes::Aes128, U8, U13>;
type AesCcm16 = Ccm<aes::Aes128, U16, U13>;

pub struct Crypto<Rng: RngCore + CryptoRng> {
    rng: Rng,
}

impl<Rng: RngCore + CryptoRng> Crypto<Rng> {
    pub const fn new(rng: Rng) -> Self {
        Self { rng }
    }
}

impl<Rng: RngCore + CryptoRng> core::fmt::Debug for Crypto<Rng> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("lagoon_crypto_rustcrypto::Crypto")
            .finish_non_exhaustive()
    }
}

fn ccm_encrypt<A: KeyInit + AeadInPlace>(
    key: &BytesCcmKeyLen,
    iv: &BytesCcmIvLen,
    ad: &[u8],
    plaintext: &[u8],
) -> Result<EdhocMessageBuffer, EDHOCError> {
    let cipher = A::new(GenericArray::from_slice(key));
    let mut buffer =
        EdhocMessageBuffer::new_from_slice(plaintext).map_err(|_| EDHOCError::BufferTooSmall)?;
    let tag = cipher
        .encrypt_in_place_detached(
            GenericArray::from_slice(iv),
            ad,
            &mut buffer.content[..buffer.len],
        )
        .map_err(|_| EDHOCError::CryptoOperationFailed)?;
    buffer
        .extend_from_slice(tag.as_slice())
        .map_err(|_| EDHOCError::BufferTooSmall)?;
    Ok(buffer)
}

fn ccm_decrypt<A: KeyInit + AeadInPlace>(
    key: &BytesCcmKeyLen,
    iv: &BytesCcmIvLen,
    ad: &[u8],
    ciphertext: &[u8],
    tag_len: usize,
) -> Result<EdhocMessageBuffer, EDHOCError> {
    if ciphertext.len() < tag_len {
        return Err(EDHOCError::AeadAuthenticationFailed);
    }
    let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_len);
    let cipher = A::new(GenericArray::from_slice(key));
    let mut buffer =
        EdhocMessageBuffer::new_from_slice(body).map_err(|_| EDHOCError::BufferTooSmall)?;
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            ad,
            &mut buffer.content[..buffer.len],
            GenericArray::from_slice(tag),
        )
        .map_err(|_| EDHOCError::AeadAuthenticationFailed)?;
    Ok(buffer)
}

fn p256_sec1_compressed(x: &BytesEcdhElem, parity: u8) -> [u8; ECDH_ELEM_LEN + 1] {
    let mut sec1 = [0u8; ECDH_ELEM_LEN + 1];
    sec1[0] = parity;
    sec1[1..].copy_from_slice(x);
    sec1
}

impl<Rng: RngCore + CryptoRng> lagoon_shared::Crypto for Crypto<Rng> {
    fn sha256_digest(&mut self, message: &[u8]) -> BytesHashLen {
        let mut digest: BytesHashLen = [0x00; SHA256_DIGEST_LEN];
        digest.copy_from_slice(&Sha256::digest(message));
        digest
    }

    fn hkdf_extract(&mut self, salt: &[u8], ikm: &[u8]) -> BytesHashLen {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
        let mut output: BytesHashLen = [0x00; SHA256_DIGEST_LEN];
        output.copy_from_slice(&prk);
        output
    }

    fn hkdf_expand(
        &mut self,
        prk: &BytesHashLen,
        info: &[u8],
        length: usize,
    ) -> Result<BytesMaxBuffer, EDHOCError> {
        if length > MAX_BUFFER_LEN {
            return Err(EDHOCError::CryptoOperationFailed);
        }
        let hkdf =
            Hkdf::<Sha256>::from_prk(prk).map_err(|_| EDHOCError::CryptoOperationFailed)?;
        let mut output: BytesMaxBuffer = [0x00; MAX_BUFFER_LEN];
        hkdf.expand(info, &mut output[..length])
            .map_err(|_| EDHOCError::CryptoOperationFailed)?;
        Ok(output)
    }

    fn aead_encrypt(
        &mut self,
        alg: AeadAlg,
        key: &BytesCcmKeyLen,
        iv: &BytesCcmIvLen,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<EdhocMessageBuffer, EDHOCError> {
        match alg {
            AeadAlg::AesCcm16_64_128 => ccm_encrypt::<AesCcm8>(key, iv, ad, plaintext),
            AeadAlg::AesCcm16_128_128 => ccm_encrypt::<AesCcm16>(key, iv, ad, plaintext),
        }
    }

    fn aead_decrypt(
        &mut self,
        alg: AeadAlg,
        key: &BytesCcmKeyLen,
        iv: &BytesCcmIvLen,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<EdhocMessageBuffer, EDHOCError> {
        match alg {
            AeadAlg::AesCcm16_64_128 => {
                ccm_decrypt::<AesCcm8>(key, iv, ad, ciphertext, alg.tag_len())
            }
            AeadAlg::AesCcm16_128_128 => {
                ccm_decrypt::<AesCcm16>(key, iv, ad, ciphertext, alg.tag_len())
            }
        }
    }

    fn ecdh(
        &mut self,
        curve: EcdhCurve,
        private_key: &BytesEcdhElem,
        public_key: &BytesEcdhElem,
    ) -> Result<BytesEcdhElem, EDHOCError> {
        match curve {
            EcdhCurve::P256 => {
                let secret = p256::SecretKey::from_bytes(GenericArray::from_slice(private_key))
                    .map_err(|_| EDHOCError::CryptoOperationFailed)?;
                let public =
                    p256::PublicKey::from_sec1_bytes(&p256_sec1_compressed(public_key, 0x02))
                        .map_err(|_| EDHOCError::CryptoOperationFailed)?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
                let mut output: BytesEcdhElem = [0x00; ECDH_ELEM_LEN];
                output.copy_from_slice(shared.raw_secret_bytes());
                Ok(output)
            }
            EcdhCurve::X25519 => {
                // StaticSecret wipes itself on drop
                let secret = StaticSecret::from(*private_key);
                let public = X25519PublicKey::from(*public_key);
                let shared = secret.diffie_hellman(&public);
                if !shared.was_contributory() {
                    return Err(EDHOCError::CryptoOperationFailed);
                }
                Ok(shared.to_bytes())
            }
        }
    }

    fn generate_key_pair(&mut self, curve: EcdhCurve) -> (BytesEcdhElem, BytesEcdhElem) {
        match curve {
            EcdhCurve::P256 => loop {
                let secret = p256::SecretKey::random(&mut self.rng);
                let point = secret.public_key().to_encoded_point(false);
                if let Some(x) = point.x() {
                    let mut private_key: BytesEcdhElem = [0x00; ECDH_ELEM_LEN];
                    private_key.copy_from_slice(&secret.to_bytes());
                    let mut public_key: BytesEcdhElem = [0x00; ECDH_ELEM_LEN];
                    public_key.copy_from_slice(x);
                    return (private_key, public_key);
                }
            },
            EcdhCurve::X25519 => {
                let secret = StaticSecret::random_from_rng(&mut self.rng);
                let public = X25519PublicKey::from(&secret);
                (secret.to_bytes(), public.to_bytes())
            }
        }
    }

    fn sign(
        &mut self,
        alg: SignAlg,
        private_key: &BytesEcdhElem,
        message: &[u8],
    ) -> Result<BytesSignature, EDHOCError> {
        match alg {
            SignAlg::EcdsaP256Sha256 => {
                let signing_key = SigningKey::from_bytes(GenericArray::from_slice(private_key))
                    .map_err(|_| EDHOCError::CryptoOperationFailed)?;
                let signature: EcdsaSignature = signing_key
                    .try_sign(message)
                    .map_err(|_| EDHOCError::CryptoOperationFailed)?;
                let mut output: BytesSignature = [0x00; SIGNATURE_LEN];
                output.copy_from_slice(&signature.to_bytes());
                Ok(output)
            }
            SignAlg::Ed25519 => {
                let signing_key = Ed25519SigningKey::from_bytes(private_key);
                let signature = signing_key
                    .try_sign(message)
                    .map_err(|_| EDHOCError::CryptoOperationFailed)?;
                Ok(signature.to_bytes())
            }
        }
    }

    fn verify(
        &mut self,
        alg: SignAlg,
        public_key: &BytesEcdhElem,
        message: &[u8],
        signature: &BytesSignature,
    ) -> Result<(), EDHOCError> {
        match alg {
            SignAlg::EcdsaP256Sha256 => {
                let signature = EcdsaSignature::from_slice(signature)
                    .map_err(|_| EDHOCError::SignatureVerificationFailed)?;
                // x-only public key, try both y parities
                for parity in [0x02, 0x03] {
                    if let Ok(verifying_key) =
                        VerifyingKey::from_sec1_bytes(&p256_sec1_compressed(public_key, parity))
                    {
                        if verifying_key.verify(message, &signature).is_ok() {
                            return Ok(());
                        }
                    }
                }
                Err(EDHOCError::SignatureVerificationFailed)
            }
            SignAlg::Ed25519 => {
                let verifying_key = Ed25519VerifyingKey::from_bytes(public_key)
                    .map_err(|_| EDHOCError::SignatureVerificationFailed)?;
                let signature = Ed25519Signature::from_bytes(signature);
                verifying_key
                    .verify(message, &signature)
                    .map_err(|_| EDHOCError::SignatureVerificationFailed)
            }
        }
    }

    fn get_random_byte(&mut self) -> u8 {
        self.rng.next_u32() as u8
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lagoon_shared::Crypto as CryptoTrait;
    use rand_core::OsRng;

    #[test]
    fn test_ecdh_agreement() {
        let mut crypto = Crypto::new(OsRng);
        for curve in [EcdhCurve::P256, EcdhCurve::X25519] {
            let (a, g_a) = crypto.generate_key_pair(curve);
            let (b, g_b) = crypto.generate_key_pair(curve);
            let shared_ab = crypto.ecdh(curve, &a, &g_b).unwrap();
            let shared_ba = crypto.ecdh(curve, &b, &g_a).unwrap();
            assert_eq!(shared_ab, shared_ba);
        }
    }

    #[test]
    fn test_sign_verify() {
        let mut crypto = Crypto::new(OsRng);
        // an ECDSA signing key is a P-256 scalar, reuse the keypair helper
        let (sk, pk) = crypto.generate_key_pair(EcdhCurve::P256);
        let signature = crypto
            .sign(SignAlg::EcdsaP256Sha256, &sk, b"message")
            .unwrap();
        assert!(crypto
            .verify(SignAlg::EcdsaP256Sha256, &pk, b"message", &signature)
            .is_ok());
        assert_eq!(
            crypto
                .verify(SignAlg::EcdsaP256Sha256, &pk, b"other", &signature)
                .unwrap_err(),
            EDHOCError::SignatureVerificationFailed
        );
    }

    #[test]
    fn test_aead_round_trip_and_tamper() {
        let mut crypto = Crypto::new(OsRng);
        let key = [0x11; AES_CCM_KEY_LEN];
        let iv = [0x22; AES_CCM_IV_LEN];
        for alg in [AeadAlg::AesCcm16_64_128, AeadAlg::AesCcm16_128_128] {
            let sealed = crypto.aead_encrypt(alg, &key, &iv, b"ad", b"plaintext").unwrap();
            assert_eq!(sealed.len, b"plaintext".len() + alg.tag_len());
            let opened = crypto
                .aead_decrypt(alg, &key, &iv, b"ad", sealed.as_slice())
                .unwrap();
            assert_eq!(opened.as_slice(), b"plaintext");

            let mut tampered = sealed;
            tampered.content[0] ^= 0x01;
            assert_eq!(
                crypto
                    .aead_decrypt(alg, &key, &iv, b"ad", tampered.as_slice())
                    .unwrap_err(),
                EDHOCError::AeadAuthenticationFailed
            );
        }
    }

    #[test]
    fn test_hkdf() {
        let mut crypto = Crypto::new(OsRng);
        let prk = crypto.hkdf_extract(&[], &[0x0b; 22]);
        let okm = crypto.hkdf_expand(&prk, b"info", 42).unwrap();
        let okm_again = crypto.hkdf_expand(&prk, b"info", 42).unwrap();
        assert_eq!(okm[..42], okm_again[..42]);
        assert_ne!(okm[..32], prk);
    }
}

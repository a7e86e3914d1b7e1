//! The narrow interface through which the protocol core consumes
//! cryptographic primitives.
//!
//! Backends implement this trait; the core never touches a crypto crate
//! directly. All key and point parameters are fixed-size arrays so that
//! `no_std` backends can work without allocation.

use crate::{
    AeadAlg, BytesCcmIvLen, BytesCcmKeyLen, BytesEcdhElem, BytesHashLen, BytesMaxBuffer,
    BytesSignature, EDHOCError, EcdhCurve, EdhocMessageBuffer, SignAlg,
};

pub trait Crypto: core::fmt::Debug {
    fn sha256_digest(&mut self, message: &[u8]) -> BytesHashLen;

    fn hkdf_extract(&mut self, salt: &[u8], ikm: &[u8]) -> BytesHashLen;

    /// HKDF-Expand; `length` must not exceed [MAX_BUFFER_LEN](crate::MAX_BUFFER_LEN).
    fn hkdf_expand(
        &mut self,
        prk: &BytesHashLen,
        info: &[u8],
        length: usize,
    ) -> Result<BytesMaxBuffer, EDHOCError>;

    /// AEAD-seal; the returned buffer is ciphertext followed by the tag.
    fn aead_encrypt(
        &mut self,
        alg: AeadAlg,
        key: &BytesCcmKeyLen,
        iv: &BytesCcmIvLen,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<EdhocMessageBuffer, EDHOCError>;

    /// AEAD-open; a bad tag yields [EDHOCError::AeadAuthenticationFailed].
    fn aead_decrypt(
        &mut self,
        alg: AeadAlg,
        key: &BytesCcmKeyLen,
        iv: &BytesCcmIvLen,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<EdhocMessageBuffer, EDHOCError>;

    /// Diffie-Hellman over the suite curve; public points are 32-byte
    /// elements (the x-coordinate for P-256, the u-coordinate for X25519).
    fn ecdh(
        &mut self,
        curve: EcdhCurve,
        private_key: &BytesEcdhElem,
        public_key: &BytesEcdhElem,
    ) -> Result<BytesEcdhElem, EDHOCError>;

    fn generate_key_pair(&mut self, curve: EcdhCurve) -> (BytesEcdhElem, BytesEcdhElem);

    fn sign(
        &mut self,
        alg: SignAlg,
        private_key: &BytesEcdhElem,
        message: &[u8],
    ) -> Result<BytesSignature, EDHOCError>;

    /// A mismatch yields [EDHOCError::SignatureVerificationFailed].
    fn verify(
        &mut self,
        alg: SignAlg,
        public_key: &BytesEcdhElem,
        message: &[u8],
        signature: &BytesSignature,
    ) -> Result<(), EDHOCError>;

    fn get_random_byte(&mut self) -> u8;
}

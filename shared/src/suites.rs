//! Cipher suite registry.
//!
//! A suite label names the concrete algorithm set used for one session; the
//! responder commits to the first label of SUITES_I after checking it
//! against its own supported list.

use crate::{EDHOCError, AES_CCM_IV_LEN, AES_CCM_KEY_LEN, SHA256_DIGEST_LEN, SIGNATURE_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcdhCurve {
    X25519,
    P256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlg {
    AesCcm16_64_128,
    AesCcm16_128_128,
}

impl AeadAlg {
    pub fn tag_len(self) -> usize {
        match self {
            AeadAlg::AesCcm16_64_128 => 8,
            AeadAlg::AesCcm16_128_128 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlg {
    Ed25519,
    EcdsaP256Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suite {
    pub label: u8,
    pub hash: HashAlg,
    pub ecdh_curve: EcdhCurve,
    pub aead: AeadAlg,
    pub sign: SignAlg,
}

impl Suite {
    pub fn hash_len(&self) -> usize {
        SHA256_DIGEST_LEN
    }

    /// MAC length of the static-DH authenticator; equals the AEAD tag length.
    pub fn mac_len(&self) -> usize {
        self.aead.tag_len()
    }

    pub fn sig_len(&self) -> usize {
        SIGNATURE_LEN
    }

    pub fn key_len(&self) -> usize {
        AES_CCM_KEY_LEN
    }

    pub fn iv_len(&self) -> usize {
        AES_CCM_IV_LEN
    }
}

const SUITE_TABLE: [Suite; 4] = [
    Suite {
        label: 0,
        hash: HashAlg::Sha256,
        ecdh_curve: EcdhCurve::X25519,
        aead: AeadAlg::AesCcm16_64_128,
        sign: SignAlg::Ed25519,
    },
    Suite {
        label: 1,
        hash: HashAlg::Sha256,
        ecdh_curve: EcdhCurve::X25519,
        aead: AeadAlg::AesCcm16_128_128,
        sign: SignAlg::Ed25519,
    },
    Suite {
        label: 2,
        hash: HashAlg::Sha256,
        ecdh_curve: EcdhCurve::P256,
        aead: AeadAlg::AesCcm16_64_128,
        sign: SignAlg::EcdsaP256Sha256,
    },
    Suite {
        label: 3,
        hash: HashAlg::Sha256,
        ecdh_curve: EcdhCurve::P256,
        aead: AeadAlg::AesCcm16_128_128,
        sign: SignAlg::EcdsaP256Sha256,
    },
];

pub fn get_suite(label: u8) -> Result<Suite, EDHOCError> {
    SUITE_TABLE
        .iter()
        .find(|suite| suite.label == label)
        .copied()
        .ok_or(EDHOCError::UnsupportedCipherSuite)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_suite() {
        for label in 0..=3 {
            assert_eq!(get_suite(label).unwrap().label, label);
        }
        assert_eq!(
            get_suite(6).unwrap_err(),
            EDHOCError::UnsupportedCipherSuite
        );
    }

    #[test]
    fn test_suite_lengths() {
        let suite_2 = get_suite(2).unwrap();
        assert_eq!(suite_2.mac_len(), 8);
        let suite_3 = get_suite(3).unwrap();
        assert_eq!(suite_3.mac_len(), 16);
        assert_eq!(suite_3.hash_len(), 32);
        assert_eq!(suite_3.sig_len(), 64);
    }
}

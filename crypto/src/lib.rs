//! Cryptography dispatch for lagoon
//!
//! This crate selects one of the available backends by feature and exposes
//! it under the unified name `lagoon_crypto::Crypto`.
#![no_std]

pub use lagoon_shared::Crypto as CryptoTrait;

#[cfg(feature = "rustcrypto")]
pub type Crypto = lagoon_crypto_rustcrypto::Crypto<rand_core::OsRng>;

#[cfg(feature = "rustcrypto")]
pub const fn default_crypto() -> Crypto {
    lagoon_crypto_rustcrypto::Crypto::new(rand_core::OsRng)
}

//! Peer credentials and their identifiers.

use crate::{BytesEcdhElem, BytesIdCred, EDHOCError, EdhocMessageBuffer};

/// ID_CRED_x as carried inside a decrypted plaintext: either a compact kid
/// (raw single-byte CBOR integer) or the full credential transported by
/// value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdCredOwned {
    CompactKid(u8),
    FullValue(EdhocMessageBuffer),
}

/// The COSE header map `{4: kid}` referencing a credential out of band.
pub fn id_cred_map(kid: u8) -> BytesIdCred {
    [0xa1, 0x04, 0x41, kid]
}

/// One entry of the caller-supplied credential set.
///
/// `public_key` authenticates signature peers, `g` is the long-term DH
/// component of static-DH peers; either may be absent when the peer is not
/// expected to use the corresponding method.
#[derive(Debug, Clone, Copy)]
pub struct PeerCredential {
    pub kid: u8,
    pub cred: EdhocMessageBuffer,
    pub public_key: Option<BytesEcdhElem>,
    pub g: Option<BytesEcdhElem>,
}

impl PeerCredential {
    pub fn id_cred(&self) -> BytesIdCred {
        id_cred_map(self.kid)
    }
}

/// Select the peer credential referenced by a received ID_CRED field.
///
/// For a static-DH peer the long-term DH component must be on file, for a
/// signature peer the public key; a match lacking the required material is
/// treated the same as no match.
pub fn retrieve_cred<'a>(
    is_static_dh_peer: bool,
    peers: &'a [PeerCredential],
    id_cred: &IdCredOwned,
) -> Result<&'a PeerCredential, EDHOCError> {
    let found = peers.iter().find(|peer| match id_cred {
        IdCredOwned::CompactKid(kid) => *kid == peer.kid,
        IdCredOwned::FullValue(value) => value.as_slice() == peer.cred.as_slice(),
    });

    match found {
        Some(peer) => {
            let usable = if is_static_dh_peer {
                peer.g.is_some()
            } else {
                peer.public_key.is_some()
            };
            if usable {
                Ok(peer)
            } else {
                Err(EDHOCError::UnknownPeer)
            }
        }
        None => Err(EDHOCError::UnknownPeer),
    }
}

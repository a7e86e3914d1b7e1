//! Common data structures used by [lagoon] and its dependent crates
//!
//! This crate is separate from lagoon so that crypto backends can implement
//! the [Crypto] trait without depending on the protocol core itself. As its
//! types are re-exported by the main crate, it is recommended to use them
//! through the public re-export there wherever possible.
//!
//! [lagoon]: ../lagoon/index.html
#![no_std]

pub use cbor_decoder::*;
pub use cbor_encoder::*;
pub use edhoc_parser::*;
pub use helpers::*;

mod crypto;
pub use crypto::Crypto;

mod cred;
pub use cred::*;

mod suites;
pub use suites::*;

use zeroize::{Zeroize, ZeroizeOnDrop};

// need some headroom over the largest message_2 (g_y + ciphertext_2 + c_r)
pub const MAX_MESSAGE_SIZE_LEN: usize = 256;

pub const ID_CRED_LEN: usize = 4;
pub const SUITES_LEN: usize = 9;
pub const ECDH_ELEM_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const SHA256_DIGEST_LEN: usize = 32;
pub const AES_CCM_KEY_LEN: usize = 16;
pub const AES_CCM_IV_LEN: usize = 13;
pub const MAX_CONNECTION_ID_LEN: usize = 8;
pub const MAX_EAD_SIZE_LEN: usize = 64;

pub const MSG_1_DEFAULT_SIZE: usize = 192;
pub const MSG_2_DEFAULT_SIZE: usize = 256;
pub const MSG_3_DEFAULT_SIZE: usize = 256;
pub const MSG_4_DEFAULT_SIZE: usize = 96;
pub const ERR_MSG_DEFAULT_SIZE: usize = 64;
pub const CIPHERTEXT_2_DEFAULT_SIZE: usize = 192;
pub const CIPHERTEXT_3_DEFAULT_SIZE: usize = 192;
pub const CIPHERTEXT_4_DEFAULT_SIZE: usize = MAX_EAD_SIZE_LEN + AES_CCM_KEY_LEN;

pub const MAX_KDF_CONTEXT_LEN: usize = 192;
pub const MAX_KDF_LABEL_LEN: usize = 15; // for "KEYSTREAM_2"
pub const MAX_BUFFER_LEN: usize = 384; // sized for the largest Sig_structure
pub const CBOR_BYTE_STRING: u8 = 0x58u8;
pub const CBOR_TEXT_STRING: u8 = 0x78u8;
pub const CBOR_UINT_1BYTE: u8 = 0x18u8;
pub const CBOR_NEG_INT_1BYTE: u8 = 0x38u8;
pub const CBOR_NEG_INT_1BYTE_START: u8 = 0x20u8;
pub const CBOR_NEG_INT_1BYTE_END: u8 = 0x37u8;
pub const CBOR_UINT_1BYTE_START: u8 = 0x0u8;
pub const CBOR_UINT_1BYTE_END: u8 = 0x17u8;
pub const CBOR_MAJOR_TEXT_STRING: u8 = 0x60u8;
pub const CBOR_MAJOR_BYTE_STRING: u8 = 0x40u8;
pub const CBOR_MAJOR_ARRAY: u8 = 0x80u8;
pub const MAX_INFO_LEN: usize = 2 + SHA256_DIGEST_LEN + // digest as bstr
                                1 + MAX_KDF_LABEL_LEN + // label as tstr
                                3 + MAX_KDF_CONTEXT_LEN + // context as bstr
                                2; // length as uint

pub const ERR_CODE_UNSPECIFIED: i8 = 1;
pub const ERR_CODE_WRONG_SELECTED_SUITE: i8 = 2;

pub type BytesSuites = [u8; SUITES_LEN];
pub type BytesIdCred = [u8; ID_CRED_LEN];
pub type BytesEcdhElem = [u8; ECDH_ELEM_LEN];
pub type BytesSignature = [u8; SIGNATURE_LEN];
pub type BytesCcmKeyLen = [u8; AES_CCM_KEY_LEN];
pub type BytesCcmIvLen = [u8; AES_CCM_IV_LEN];
pub type BytesHashLen = [u8; SHA256_DIGEST_LEN];
pub type BytesMaxBuffer = [u8; MAX_BUFFER_LEN];
pub type BytesMaxContextBuffer = [u8; MAX_KDF_CONTEXT_LEN];
pub type BytesMaxInfoBuffer = [u8; MAX_INFO_LEN];
pub type BufferMessage1 = EdhocMessageBuffer;
pub type BufferMessage2 = EdhocMessageBuffer;
pub type BufferMessage3 = EdhocMessageBuffer;
pub type BufferMessage4 = EdhocMessageBuffer;
pub type BufferCiphertext2 = EdhocMessageBuffer;
pub type BufferCiphertext3 = EdhocMessageBuffer;
pub type BufferPlaintext2 = EdhocMessageBuffer;
pub type BufferPlaintext3 = EdhocMessageBuffer;
pub type BufferSignOrMac = EdhocMessageBuffer;
pub type BufferEad = EdhocMessageBuffer;

#[repr(C)]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum EDHOCError {
    CborDecodingError = 1,
    CborEncodingError = 2,
    UnsupportedCipherSuite = 3,
    SuitesListTooLong = 4,
    BufferTooSmall = 5,
    CryptoOperationFailed = 6,
    MacVerificationFailed = 7,
    SignatureVerificationFailed = 8,
    AeadAuthenticationFailed = 9,
    UnknownPeer = 10,
    ErrorMessageSent = 11,
    ErrorMessageReceived = 12,
    TransportError = 13,
}

/// EDHOC method, as chosen by the initiator in message_1.
///
/// The label encodes the authentication kind of each party; both key
/// schedules branch on it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    SignSign = 0,
    SignStat = 1,
    StatSign = 2,
    StatStat = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Signature,
    StaticDh,
}

impl AuthKind {
    pub fn is_static_dh(self) -> bool {
        self == AuthKind::StaticDh
    }
}

impl Method {
    pub fn from_label(label: u8) -> Result<Self, EDHOCError> {
        match label {
            0 => Ok(Method::SignSign),
            1 => Ok(Method::SignStat),
            2 => Ok(Method::StatSign),
            3 => Ok(Method::StatStat),
            _ => Err(EDHOCError::CborDecodingError),
        }
    }

    pub fn label(self) -> u8 {
        self as u8
    }

    /// Authentication kinds as (initiator, responder).
    pub fn auth_kinds(self) -> (AuthKind, AuthKind) {
        match self {
            Method::SignSign => (AuthKind::Signature, AuthKind::Signature),
            Method::SignStat => (AuthKind::Signature, AuthKind::StaticDh),
            Method::StatSign => (AuthKind::StaticDh, AuthKind::Signature),
            Method::StatStat => (AuthKind::StaticDh, AuthKind::StaticDh),
        }
    }
}

/// A connection identifier, either a small integer or a byte string.
///
/// Both encodings are first-class on the wire; one-byte integer identifiers
/// are preferred where the value is in the single-byte CBOR range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionId {
    Int(i8),
    Bstr {
        bytes: [u8; MAX_CONNECTION_ID_LEN],
        len: usize,
    },
}

impl ConnectionId {
    /// Wrap an integer identifier; the value must fit a single CBOR byte.
    pub fn from_int(value: i8) -> Result<Self, EDHOCError> {
        if (-24..=23).contains(&value) {
            Ok(ConnectionId::Int(value))
        } else {
            Err(EDHOCError::CborEncodingError)
        }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, EDHOCError> {
        if slice.len() > MAX_CONNECTION_ID_LEN {
            return Err(EDHOCError::BufferTooSmall);
        }
        let mut bytes = [0u8; MAX_CONNECTION_ID_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(ConnectionId::Bstr {
            bytes,
            len: slice.len(),
        })
    }

    pub fn encode(&self, encoder: &mut CBOREncoder) -> Result<(), CBORError> {
        match self {
            ConnectionId::Int(value) => encoder.int(*value),
            ConnectionId::Bstr { bytes, len } => encoder.bytes(&bytes[..*len]),
        }
    }

    pub fn decode(decoder: &mut CBORDecoder) -> Result<Self, EDHOCError> {
        let initial = decoder.current()?;
        match CBORDecoder::type_of(initial) {
            CBOR_UINT_1BYTE_START | CBOR_NEG_INT_1BYTE_START => {
                let raw = decoder.int_raw()?;
                Ok(ConnectionId::Int(int_from_raw(raw)))
            }
            CBOR_MAJOR_BYTE_STRING => ConnectionId::from_slice(decoder.bytes()?),
            _ => Err(EDHOCError::CborDecodingError),
        }
    }
}

/// Map a raw single-byte CBOR integer to its value.
pub fn int_from_raw(raw: u8) -> i8 {
    if raw <= CBOR_UINT_1BYTE_END {
        raw as i8
    } else {
        -1 - (raw - CBOR_NEG_INT_1BYTE_START) as i8
    }
}

/// Map an integer in -24..=23 to its raw single-byte CBOR encoding.
pub fn raw_from_int(value: i8) -> u8 {
    if value >= 0 {
        value as u8
    } else {
        CBOR_NEG_INT_1BYTE_START - 1 + value.unsigned_abs()
    }
}

/// Long-lived inputs of a responder session, supplied by the caller.
///
/// The protocol core borrows this read-only; the private keys are wiped
/// when the owner drops it.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ResponderContext {
    /// ephemeral private key of myself
    pub y: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_y: BytesEcdhElem,
    /// long-term authentication key (signature or static DH, per method)
    pub sk_r: BytesEcdhElem,
    #[zeroize(skip)]
    pub c_r: ConnectionId,
    #[zeroize(skip)]
    pub kid_r: u8,
    #[zeroize(skip)]
    pub cred_r: EdhocMessageBuffer,
    #[zeroize(skip)]
    pub ead_2: Option<BufferEad>,
    #[zeroize(skip)]
    pub ead_4: Option<BufferEad>,
    #[zeroize(skip)]
    pub msg4_required: bool,
    #[zeroize(skip)]
    pub suites_r: BytesSuites,
    #[zeroize(skip)]
    pub suites_r_len: usize,
}

/// Long-lived inputs of an initiator session, supplied by the caller.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct InitiatorContext {
    #[zeroize(skip)]
    pub method: Method,
    /// ephemeral private key of myself
    pub x: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_x: BytesEcdhElem,
    pub sk_i: BytesEcdhElem,
    #[zeroize(skip)]
    pub c_i: ConnectionId,
    #[zeroize(skip)]
    pub kid_i: u8,
    #[zeroize(skip)]
    pub cred_i: EdhocMessageBuffer,
    #[zeroize(skip)]
    pub ead_1: Option<BufferEad>,
    #[zeroize(skip)]
    pub ead_3: Option<BufferEad>,
    #[zeroize(skip)]
    pub suites_i: BytesSuites,
    #[zeroize(skip)]
    pub suites_i_len: usize,
}

#[derive(Debug, Default, Zeroize, ZeroizeOnDrop)]
pub struct ResponderStart {
    pub y: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_y: BytesEcdhElem,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ProcessingM1 {
    pub y: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_y: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_x: BytesEcdhElem,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
    // TH_2 covers the raw message_1 bytes, so they stay around until then
    #[zeroize(skip)]
    pub message_1: BufferMessage1,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct WaitM3 {
    pub y: BytesEcdhElem,
    pub prk_3e2m: BytesHashLen,
    #[zeroize(skip)]
    pub th_3: BytesHashLen,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ProcessingM3 {
    pub y: BytesEcdhElem,
    pub prk_3e2m: BytesHashLen,
    #[zeroize(skip)]
    pub th_3: BytesHashLen,
    #[zeroize(skip)]
    pub th_4: BytesHashLen,
    pub sign_or_mac_3: BufferSignOrMac,
    pub ead_3: Option<BufferEad>,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct InitiatorStart {
    pub x: BytesEcdhElem,
    #[zeroize(skip)]
    pub g_x: BytesEcdhElem,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct WaitM2 {
    pub x: BytesEcdhElem,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
    #[zeroize(skip)]
    pub message_1: BufferMessage1,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ProcessingM2 {
    pub x: BytesEcdhElem,
    pub prk_2e: BytesHashLen,
    #[zeroize(skip)]
    pub th_2: BytesHashLen,
    #[zeroize(skip)]
    pub g_y: BytesEcdhElem,
    #[zeroize(skip)]
    pub ciphertext_2: BufferCiphertext2,
    pub sign_or_mac_2: BufferSignOrMac,
    pub ead_2: Option<BufferEad>,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
    #[zeroize(skip)]
    pub c_r: ConnectionId,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ProcessedM2 {
    pub x: BytesEcdhElem,
    pub prk_3e2m: BytesHashLen,
    #[zeroize(skip)]
    pub th_3: BytesHashLen,
    #[zeroize(skip)]
    pub g_y: BytesEcdhElem,
    #[zeroize(skip)]
    pub method: Method,
    #[zeroize(skip)]
    pub suite: Suite,
}

/// Terminal session state, for both roles.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct Completed {
    pub prk_4x3m: BytesHashLen,
    #[zeroize(skip)]
    pub th_4: BytesHashLen,
    #[zeroize(skip)]
    pub suite: Suite,
}

/// ERR_INFO content of a wire error message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorInfo {
    /// code 1: free-form diagnostic text
    Diagnostic(EdhocMessageBuffer),
    /// code 2: the sender's supported suites
    Suites(BytesSuites, usize),
}

#[derive(PartialEq, Debug)]
#[repr(C)]
pub enum MessageBufferError {
    BufferAlreadyFull,
    SliceTooLong,
}

impl From<MessageBufferError> for EDHOCError {
    fn from(_error: MessageBufferError) -> Self {
        EDHOCError::BufferTooSmall
    }
}

/// An owned u8 vector of a limited length
///
/// It is used to represent the various messages in encrypted and in decrypted
/// form, as well as other data items. Its maximum length is
/// [MAX_MESSAGE_SIZE_LEN].
#[repr(C)]
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct EdhocMessageBuffer {
    pub content: [u8; MAX_MESSAGE_SIZE_LEN],
    pub len: usize,
}

impl Default for EdhocMessageBuffer {
    fn default() -> Self {
        EdhocMessageBuffer {
            content: [0; MAX_MESSAGE_SIZE_LEN],
            len: 0,
        }
    }
}

impl Zeroize for EdhocMessageBuffer {
    fn zeroize(&mut self) {
        self.content.zeroize();
        self.len = 0;
    }
}

impl EdhocMessageBuffer {
    pub fn new() -> Self {
        EdhocMessageBuffer {
            content: [0u8; MAX_MESSAGE_SIZE_LEN],
            len: 0,
        }
    }

    pub fn new_from_slice(slice: &[u8]) -> Result<Self, MessageBufferError> {
        let mut buffer = Self::new();
        if buffer.fill_with_slice(slice).is_ok() {
            Ok(buffer)
        } else {
            Err(MessageBufferError::SliceTooLong)
        }
    }

    pub fn get(self, index: usize) -> Option<u8> {
        self.content.get(index).copied()
    }

    pub fn push(&mut self, item: u8) -> Result<(), MessageBufferError> {
        if self.len < self.content.len() {
            self.content[self.len] = item;
            self.len += 1;
            Ok(())
        } else {
            Err(MessageBufferError::BufferAlreadyFull)
        }
    }

    pub fn get_slice(&self, start: usize, len: usize) -> Option<&[u8]> {
        self.content.get(start..start + len)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.content[0..self.len]
    }

    pub fn fill_with_slice(&mut self, slice: &[u8]) -> Result<(), MessageBufferError> {
        if slice.len() <= self.content.len() {
            self.len = slice.len();
            self.content[..self.len].copy_from_slice(slice);
            Ok(())
        } else {
            Err(MessageBufferError::SliceTooLong)
        }
    }

    pub fn extend_from_slice(&mut self, slice: &[u8]) -> Result<(), MessageBufferError> {
        if self.len + slice.len() <= self.content.len() {
            self.content[self.len..self.len + slice.len()].copy_from_slice(slice);
            self.len += slice.len();
            Ok(())
        } else {
            Err(MessageBufferError::SliceTooLong)
        }
    }

    pub fn from_hex(hex: &str) -> Self {
        let mut buffer = EdhocMessageBuffer::new();
        buffer.len = hex.len() / 2;
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let chunk_str = core::str::from_utf8(chunk).unwrap();
            buffer.content[i] = u8::from_str_radix(chunk_str, 16).unwrap();
        }
        buffer
    }
}

impl TryInto<EdhocMessageBuffer> for &[u8] {
    type Error = ();

    fn try_into(self) -> Result<EdhocMessageBuffer, Self::Error> {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE_LEN];
        if self.len() <= buffer.len() {
            buffer[..self.len()].copy_from_slice(self);

            Ok(EdhocMessageBuffer {
                content: buffer,
                len: self.len(),
            })
        } else {
            Err(())
        }
    }
}

mod helpers {
    use super::*;

    /// Build the info field of EDHOC-KDF: the CBOR sequence
    /// `bstr TH, tstr label, bstr context, uint length`.
    pub fn encode_info(
        th: &BytesHashLen,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<(BytesMaxInfoBuffer, usize), EDHOCError> {
        let mut info: BytesMaxInfoBuffer = [0x00; MAX_INFO_LEN];
        let info_len = {
            let mut encoder = CBOREncoder::new(&mut info);
            encoder.bytes(th)?;
            encoder.text(label)?;
            encoder.bytes(context)?;
            encoder.uint(length)?;
            encoder.position()
        };
        Ok((info, info_len))
    }
}

mod edhoc_parser {
    use super::*;

    pub fn parse_suites_i(
        mut decoder: CBORDecoder,
    ) -> Result<(BytesSuites, usize, CBORDecoder), EDHOCError> {
        let mut suites_i: BytesSuites = Default::default();
        if let Ok(curr) = decoder.current() {
            if CBOR_UINT_1BYTE_START == CBORDecoder::type_of(curr) {
                suites_i[0] = decoder.u8()?;
                let suites_i_len = 1;
                Ok((suites_i, suites_i_len, decoder))
            } else if CBOR_MAJOR_ARRAY == CBORDecoder::type_of(curr)
                && CBORDecoder::info_of(curr) >= 2
            {
                // NOTE: arrays must be at least 2 items long, otherwise the compact encoding (int) must be used
                let suites_i_len = decoder.array()?;
                if suites_i_len <= suites_i.len() {
                    for i in 0..suites_i_len {
                        suites_i[i] = decoder.u8()?;
                    }
                    Ok((suites_i, suites_i_len, decoder))
                } else {
                    Err(EDHOCError::SuitesListTooLong)
                }
            } else {
                Err(EDHOCError::CborDecodingError)
            }
        } else {
            Err(EDHOCError::CborDecodingError)
        }
    }

    /// Consume an optional trailing EAD field: a single bstr closing the
    /// sequence, or nothing.
    fn parse_trailing_ead(decoder: &mut CBORDecoder) -> Result<Option<BufferEad>, EDHOCError> {
        if decoder.finished() {
            return Ok(None);
        }
        let value = decoder.bytes()?;
        if !decoder.finished() {
            return Err(EDHOCError::CborDecodingError);
        }
        let ead = BufferEad::new_from_slice(value).map_err(|_| EDHOCError::CborDecodingError)?;
        Ok(Some(ead))
    }

    pub fn parse_message_1(
        rcvd_message_1: &BufferMessage1,
    ) -> Result<
        (
            Method,
            BytesSuites,
            usize,
            BytesEcdhElem,
            ConnectionId,
            Option<BufferEad>,
        ),
        EDHOCError,
    > {
        let mut decoder = CBORDecoder::new(rcvd_message_1.as_slice());
        let method = Method::from_label(decoder.u8()?)?;

        let (suites_i, suites_i_len, mut decoder) = parse_suites_i(decoder)?;

        let mut g_x: BytesEcdhElem = [0x00; ECDH_ELEM_LEN];
        g_x.copy_from_slice(decoder.bytes_sized(ECDH_ELEM_LEN)?);

        let c_i = ConnectionId::decode(&mut decoder)?;

        let ead_1 = parse_trailing_ead(&mut decoder)?;
        Ok((method, suites_i, suites_i_len, g_x, c_i, ead_1))
    }

    pub fn parse_message_2(
        rcvd_message_2: &BufferMessage2,
    ) -> Result<(BytesEcdhElem, BufferCiphertext2, ConnectionId), EDHOCError> {
        let mut decoder = CBORDecoder::new(rcvd_message_2.as_slice());

        // G_Y_CIPHERTEXT_2 is one bstr holding the concatenation of g_y and ciphertext_2
        let decoded = decoder.bytes()?;
        let key = decoded
            .get(0..ECDH_ELEM_LEN)
            .ok_or(EDHOCError::CborDecodingError)?;
        let mut g_y: BytesEcdhElem = [0x00; ECDH_ELEM_LEN];
        g_y.copy_from_slice(key);
        let ciphertext_2 = BufferCiphertext2::new_from_slice(
            decoded
                .get(ECDH_ELEM_LEN..)
                .ok_or(EDHOCError::CborDecodingError)?,
        )
        .map_err(|_| EDHOCError::CborDecodingError)?;

        let c_r = ConnectionId::decode(&mut decoder)?;
        if decoder.finished() {
            Ok((g_y, ciphertext_2, c_r))
        } else {
            Err(EDHOCError::CborDecodingError)
        }
    }

    /// Decode the plaintext of message_2 or message_3; with C_R carried
    /// outside ciphertext_2, both share the schema
    /// `ID_CRED_x, bstr sign_or_mac, ?bstr EAD_x`.
    pub fn decode_plaintext(
        plaintext: &[u8],
    ) -> Result<(IdCredOwned, BufferSignOrMac, Option<BufferEad>), EDHOCError> {
        let mut decoder = CBORDecoder::new(plaintext);

        // NOTE: if len of bstr is 1, it is a compact kid and therefore should have been encoded as int
        let id_cred = if CBOR_MAJOR_BYTE_STRING == CBORDecoder::type_of(decoder.current()?)
            && CBORDecoder::info_of(decoder.current()?) > 1
        {
            IdCredOwned::FullValue(
                EdhocMessageBuffer::new_from_slice(decoder.bytes()?)
                    .map_err(|_| EDHOCError::CborDecodingError)?,
            )
        } else {
            IdCredOwned::CompactKid(decoder.int_raw()?)
        };

        let sign_or_mac = BufferSignOrMac::new_from_slice(decoder.bytes()?)
            .map_err(|_| EDHOCError::CborDecodingError)?;

        let ead = parse_trailing_ead(&mut decoder)?;
        Ok((id_cred, sign_or_mac, ead))
    }

    /// Decode a message that is a single self-contained bstr (message_3 and
    /// message_4 on the wire).
    pub fn decode_byte_string(rcvd: &EdhocMessageBuffer) -> Result<EdhocMessageBuffer, EDHOCError> {
        let mut decoder = CBORDecoder::new(rcvd.as_slice());
        let decoded = decoder.bytes()?;
        if decoder.finished() {
            EdhocMessageBuffer::new_from_slice(decoded).map_err(|_| EDHOCError::CborDecodingError)
        } else {
            Err(EDHOCError::CborDecodingError)
        }
    }

    pub fn parse_error_message(rcvd: &[u8]) -> Result<(ConnectionId, i8, ErrorInfo), EDHOCError> {
        let mut decoder = CBORDecoder::new(rcvd);
        let c_x = ConnectionId::decode(&mut decoder)?;
        let err_code = int_from_raw(decoder.int_raw()?);

        let curr = decoder.current()?;
        let err_info = if CBOR_MAJOR_TEXT_STRING == CBORDecoder::type_of(curr) {
            let text = decoder.str()?;
            let diagnostic = EdhocMessageBuffer::new_from_slice(text)
                .map_err(|_| EDHOCError::CborDecodingError)?;
            if !decoder.finished() {
                return Err(EDHOCError::CborDecodingError);
            }
            ErrorInfo::Diagnostic(diagnostic)
        } else {
            let (suites, suites_len, decoder) = parse_suites_i(decoder)?;
            if !decoder.finished() {
                return Err(EDHOCError::CborDecodingError);
            }
            ErrorInfo::Suites(suites, suites_len)
        };
        Ok((c_x, err_code, err_info))
    }
}

mod cbor_decoder {
    /// Decoder inspired by the [minicbor](https://crates.io/crates/minicbor) crate.
    use super::*;

    #[derive(Debug)]
    pub enum CBORError {
        DecodingError,
        EncodingError,
    }

    impl From<CBORError> for EDHOCError {
        fn from(error: CBORError) -> Self {
            match error {
                CBORError::DecodingError => EDHOCError::CborDecodingError,
                CBORError::EncodingError => EDHOCError::CborEncodingError,
            }
        }
    }

    #[derive(Debug)]
    pub struct CBORDecoder<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> CBORDecoder<'a> {
        pub fn new(bytes: &'a [u8]) -> Self {
            CBORDecoder { buf: bytes, pos: 0 }
        }

        fn read(&mut self) -> Result<u8, CBORError> {
            if let Some(b) = self.buf.get(self.pos) {
                self.pos += 1;
                Ok(*b)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Consume and return *n* bytes starting at the current position.
        fn read_slice(&mut self, n: usize) -> Result<&'a [u8], CBORError> {
            if let Some(b) = self
                .pos
                .checked_add(n)
                .and_then(|end| self.buf.get(self.pos..end))
            {
                self.pos += n;
                Ok(b)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        pub fn position(&self) -> usize {
            self.pos
        }

        pub fn finished(&self) -> bool {
            self.pos == self.buf.len()
        }

        pub fn ensure_finished(&self) -> Result<(), CBORError> {
            if self.finished() {
                Ok(())
            } else {
                Err(CBORError::DecodingError)
            }
        }

        pub fn remaining_buffer(&self) -> Result<&[u8], CBORError> {
            if let Some(buffer) = self.buf.get(self.pos..) {
                Ok(buffer)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Get the byte at the current position.
        pub fn current(&self) -> Result<u8, CBORError> {
            if let Some(b) = self.buf.get(self.pos) {
                Ok(*b)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Decode a `u8` value.
        pub fn u8(&mut self) -> Result<u8, CBORError> {
            let n = self.read()?;
            if (0..=0x17).contains(&n) {
                Ok(n)
            } else if 0x18 == n {
                self.read()
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Decode an `i8` value.
        pub fn i8(&mut self) -> Result<i8, CBORError> {
            let n = self.read()?;
            if (0..=0x17).contains(&n) {
                Ok(n as i8)
            } else if (0x20..=0x37).contains(&n) {
                Ok(-1 - (n - 0x20) as i8)
            } else if 0x18 == n {
                Ok(self.read()? as i8)
            } else if 0x38 == n {
                Ok(-1 - (self.read()? - 0x20) as i8)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Get the raw `i8` or `u8` value.
        pub fn int_raw(&mut self) -> Result<u8, CBORError> {
            let n = self.read()?;
            if (0..=0x17).contains(&n) || (0x20..=0x37).contains(&n) {
                Ok(n)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Decode a string slice.
        pub fn str(&mut self) -> Result<&'a [u8], CBORError> {
            let b = self.read()?;
            if CBOR_MAJOR_TEXT_STRING != Self::type_of(b) || Self::info_of(b) == 31 {
                Err(CBORError::DecodingError)
            } else {
                let n = self.as_usize(Self::info_of(b))?;
                self.read_slice(n)
            }
        }

        /// Decode a byte slice.
        pub fn bytes(&mut self) -> Result<&'a [u8], CBORError> {
            let b = self.read()?;
            if CBOR_MAJOR_BYTE_STRING != Self::type_of(b) || Self::info_of(b) == 31 {
                Err(CBORError::DecodingError)
            } else {
                let n = self.as_usize(Self::info_of(b))?;
                self.read_slice(n)
            }
        }

        /// Decode a byte slice of an expected size.
        pub fn bytes_sized(&mut self, expected_size: usize) -> Result<&'a [u8], CBORError> {
            let res = self.bytes()?;
            if res.len() == expected_size {
                Ok(res)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Begin decoding an array.
        pub fn array(&mut self) -> Result<usize, CBORError> {
            let b = self.read()?;
            if CBOR_MAJOR_ARRAY != Self::type_of(b) {
                Err(CBORError::DecodingError)
            } else {
                match Self::info_of(b) {
                    31 => Err(CBORError::DecodingError), // no support for unknown size arrays
                    n => Ok(self.as_usize(n)?),
                }
            }
        }

        /// Decode a `u8` value into usize.
        pub fn as_usize(&mut self, b: u8) -> Result<usize, CBORError> {
            if (0..=0x17).contains(&b) {
                Ok(usize::from(b))
            } else if 0x18 == b {
                self.read().map(usize::from)
            } else {
                Err(CBORError::DecodingError)
            }
        }

        /// Get the major type info of the given byte (highest 3 bits).
        pub fn type_of(b: u8) -> u8 {
            b & 0b111_00000
        }

        /// Get the additional type info of the given byte (lowest 5 bits).
        pub fn info_of(b: u8) -> u8 {
            b & 0b000_11111
        }

        /// Check for: an unsigned integer encoded as a single byte
        pub fn is_u8(byte: u8) -> bool {
            byte >= CBOR_UINT_1BYTE_START && byte <= CBOR_UINT_1BYTE_END
        }

        /// Check for: a negative integer encoded as a single byte
        pub fn is_i8(byte: u8) -> bool {
            byte >= CBOR_NEG_INT_1BYTE_START && byte <= CBOR_NEG_INT_1BYTE_END
        }
    }
}

mod cbor_encoder {
    /// Encoder matching [CBORDecoder](super::CBORDecoder), same
    /// minicbor-inspired shape. Items larger than 255 bytes are not needed
    /// by any EDHOC message and are rejected.
    use super::*;

    #[derive(Debug)]
    pub struct CBOREncoder<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> CBOREncoder<'a> {
        pub fn new(buf: &'a mut [u8]) -> Self {
            CBOREncoder { buf, pos: 0 }
        }

        pub fn position(&self) -> usize {
            self.pos
        }

        fn push(&mut self, b: u8) -> Result<(), CBORError> {
            if let Some(slot) = self.buf.get_mut(self.pos) {
                *slot = b;
                self.pos += 1;
                Ok(())
            } else {
                Err(CBORError::EncodingError)
            }
        }

        fn extend(&mut self, slice: &[u8]) -> Result<(), CBORError> {
            if let Some(dst) = self
                .pos
                .checked_add(slice.len())
                .and_then(|end| self.buf.get_mut(self.pos..end))
            {
                dst.copy_from_slice(slice);
                self.pos += slice.len();
                Ok(())
            } else {
                Err(CBORError::EncodingError)
            }
        }

        /// Encode an `i8` value.
        pub fn int(&mut self, value: i8) -> Result<(), CBORError> {
            if (0..=0x17).contains(&value) {
                self.push(value as u8)
            } else if value > 0x17 {
                self.push(CBOR_UINT_1BYTE)?;
                self.push(value as u8)
            } else if (-24..0).contains(&value) {
                self.push(CBOR_NEG_INT_1BYTE_START - 1 + value.unsigned_abs())
            } else {
                self.push(CBOR_NEG_INT_1BYTE)?;
                self.push(value.unsigned_abs() - 1)
            }
        }

        /// Encode an unsigned value of up to 255.
        pub fn uint(&mut self, value: usize) -> Result<(), CBORError> {
            if value <= 0x17 {
                self.push(value as u8)
            } else if value <= 0xff {
                self.push(CBOR_UINT_1BYTE)?;
                self.push(value as u8)
            } else {
                Err(CBORError::EncodingError)
            }
        }

        /// Emit a raw single-byte integer (the compact kid convention).
        pub fn int_raw(&mut self, raw: u8) -> Result<(), CBORError> {
            if CBORDecoder::is_u8(raw) || CBORDecoder::is_i8(raw) {
                self.push(raw)
            } else {
                Err(CBORError::EncodingError)
            }
        }

        /// Encode a byte string.
        pub fn bytes(&mut self, value: &[u8]) -> Result<(), CBORError> {
            self.string_header(CBOR_MAJOR_BYTE_STRING, CBOR_BYTE_STRING, value.len())?;
            self.extend(value)
        }

        /// Encode a text string.
        pub fn text(&mut self, value: &[u8]) -> Result<(), CBORError> {
            self.string_header(CBOR_MAJOR_TEXT_STRING, CBOR_TEXT_STRING, value.len())?;
            self.extend(value)
        }

        /// Begin encoding an array.
        pub fn array(&mut self, len: usize) -> Result<(), CBORError> {
            if len <= 0x17 {
                self.push(CBOR_MAJOR_ARRAY | len as u8)
            } else {
                Err(CBORError::EncodingError)
            }
        }

        /// Append an already-encoded item.
        pub fn raw(&mut self, encoded: &[u8]) -> Result<(), CBORError> {
            self.extend(encoded)
        }

        fn string_header(
            &mut self,
            major: u8,
            one_byte_initial: u8,
            len: usize,
        ) -> Result<(), CBORError> {
            if len <= 0x17 {
                self.push(major | len as u8)
            } else if len <= 0xff {
                self.push(one_byte_initial)?;
                self.push(len as u8)
            } else {
                Err(CBORError::EncodingError)
            }
        }
    }
}


#[cfg(test)]
mod test_cbor_encoder {
    use super::*;

    #[test]
    fn test_cbor_encoder() {
        let mut buf = [0u8; 16];
        let len = {
            let mut encoder = CBOREncoder::new(&mut buf);
            encoder.int(1).unwrap();
            encoder.int(-1).unwrap();
            encoder.text(b"hi").unwrap();
            encoder.bytes(&[0xFE, 0xFE]).unwrap();
            encoder.position()
        };
        assert_eq!(
            &buf[..len],
            &[0x01, 0x20, 0x62, 0x68, 0x69, 0x42, 0xFE, 0xFE]
        );
    }

    #[test]
    fn test_cbor_encoder_long_bstr() {
        let payload = [0xAAu8; 32];
        let mut buf = [0u8; 40];
        let len = {
            let mut encoder = CBOREncoder::new(&mut buf);
            encoder.bytes(&payload).unwrap();
            encoder.position()
        };
        assert_eq!(len, 34);
        assert_eq!(buf[0], 0x58);
        assert_eq!(buf[1], 32);
    }

    #[test]
    fn test_cbor_encoder_overflow() {
        let mut buf = [0u8; 2];
        let mut encoder = CBOREncoder::new(&mut buf);
        assert!(encoder.bytes(&[1, 2, 3]).is_err());
    }
}

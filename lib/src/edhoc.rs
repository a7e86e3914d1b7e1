//! The protocol core: transcript hashes, the PRK chain, signature-or-MAC
//! construction, ciphertext handling, and the per-message step functions
//! used by the role state machines.

use crate::*;
use zeroize::{Zeroize, Zeroizing};

/// Identifies which message a ciphertext belongs to; message_2 uses a
/// keystream XOR, message_3 and message_4 use the suite AEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiphertextId {
    Ciphertext2,
    Ciphertext3,
    Ciphertext4,
}

#[derive(Debug)]
pub enum SigOrMacOperation<'a> {
    Generate {
        private_key: &'a BytesEcdhElem,
    },
    Verify {
        public_key: &'a BytesEcdhElem,
        sign_or_mac: &'a [u8],
    },
}

pub fn encode_message_1(
    method: Method,
    suites: &[u8],
    g_x: &BytesEcdhElem,
    c_i: &ConnectionId,
    ead_1: Option<&BufferEad>,
) -> Result<BufferMessage1, EDHOCError> {
    let mut output = BufferMessage1::new();
    let len = {
        let mut encoder = CBOREncoder::new(&mut output.content);
        encoder.int(method.label() as i8)?;
        if suites.len() == 1 {
            encoder.uint(suites[0] as usize)?;
        } else {
            encoder.array(suites.len())?;
            for suite in suites {
                encoder.uint(*suite as usize)?;
            }
        }
        encoder.bytes(g_x)?;
        c_i.encode(&mut encoder)?;
        if let Some(ead_1) = ead_1 {
            encoder.bytes(ead_1.as_slice())?;
        }
        encoder.position()
    };
    output.len = len;
    Ok(output)
}

pub fn encode_message_2(
    g_y: &BytesEcdhElem,
    ciphertext_2: &BufferCiphertext2,
    c_r: &ConnectionId,
) -> Result<BufferMessage2, EDHOCError> {
    let mut g_y_ciphertext_2 = EdhocMessageBuffer::new();
    g_y_ciphertext_2.extend_from_slice(g_y)?;
    g_y_ciphertext_2.extend_from_slice(ciphertext_2.as_slice())?;

    let mut output = BufferMessage2::new();
    let len = {
        let mut encoder = CBOREncoder::new(&mut output.content);
        encoder.bytes(g_y_ciphertext_2.as_slice())?;
        c_r.encode(&mut encoder)?;
        encoder.position()
    };
    output.len = len;
    Ok(output)
}

/// Wrap a ciphertext as a single bstr (message_3 and message_4 on the wire).
pub fn encode_byte_string(ciphertext: &EdhocMessageBuffer) -> Result<EdhocMessageBuffer, EDHOCError> {
    let mut output = EdhocMessageBuffer::new();
    let len = {
        let mut encoder = CBOREncoder::new(&mut output.content);
        encoder.bytes(ciphertext.as_slice())?;
        encoder.position()
    };
    output.len = len;
    Ok(output)
}

pub fn encode_error_message(
    c_x: &ConnectionId,
    err_code: i8,
    err_info: &ErrorInfo,
) -> Result<EdhocMessageBuffer, EDHOCError> {
    let mut output = EdhocMessageBuffer::new();
    let len = {
        let mut encoder = CBOREncoder::new(&mut output.content);
        c_x.encode(&mut encoder)?;
        encoder.int(err_code)?;
        match err_info {
            ErrorInfo::Diagnostic(text) => encoder.text(text.as_slice())?,
            ErrorInfo::Suites(suites, suites_len) => {
                if *suites_len == 1 {
                    encoder.uint(suites[0] as usize)?;
                } else {
                    encoder.array(*suites_len)?;
                    for suite in &suites[..*suites_len] {
                        encoder.uint(*suite as usize)?;
                    }
                }
            }
        }
        encoder.position()
    };
    output.len = len;
    Ok(output)
}

/// TH_2 = H(message_1 ‖ bstr(g_y) ‖ C_R)
pub fn compute_th_2<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    message_1: &BufferMessage1,
    g_y: &BytesEcdhElem,
    c_r: &ConnectionId,
) -> Result<BytesHashLen, EDHOCError> {
    let mut buffer: BytesMaxBuffer = [0x00; MAX_BUFFER_LEN];
    let len = {
        let mut encoder = CBOREncoder::new(&mut buffer);
        encoder.raw(message_1.as_slice())?;
        encoder.bytes(g_y)?;
        c_r.encode(&mut encoder)?;
        encoder.position()
    };
    Ok(crypto.sha256_digest(&buffer[..len]))
}

/// TH_{n+1} = H(bstr(TH_n) ‖ bstr(ciphertext_n))
pub fn compute_th_n<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    th: &BytesHashLen,
    ciphertext: &EdhocMessageBuffer,
) -> Result<BytesHashLen, EDHOCError> {
    let mut buffer: BytesMaxBuffer = [0x00; MAX_BUFFER_LEN];
    let len = {
        let mut encoder = CBOREncoder::new(&mut buffer);
        encoder.bytes(th)?;
        encoder.bytes(ciphertext.as_slice())?;
        encoder.position()
    };
    Ok(crypto.sha256_digest(&buffer[..len]))
}

/// EDHOC-KDF(PRK, TH, label, context, length)
pub fn edhoc_kdf<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    prk: &BytesHashLen,
    th: &BytesHashLen,
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<BytesMaxBuffer, EDHOCError> {
    let (info, info_len) = encode_info(th, label, context, length)?;
    crypto.hkdf_expand(prk, &info[..info_len], length)
}

/// PRK_2e = HKDF-Extract(∅, g_xy)
pub fn compute_prk_2e<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    suite: &Suite,
    private_key: &BytesEcdhElem,
    public_key: &BytesEcdhElem,
) -> Result<BytesHashLen, EDHOCError> {
    let g_xy = Zeroizing::new(crypto.ecdh(suite.ecdh_curve, private_key, public_key)?);
    Ok(crypto.hkdf_extract(&[], &g_xy[..]))
}

/// Next PRK in the chain. Static-DH methods fold another ECDH secret in,
/// signature methods pass the previous PRK through unchanged.
pub fn prk_derive<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    is_static_dh: bool,
    suite: &Suite,
    prk_in: &BytesHashLen,
    dh_public_key: &BytesEcdhElem,
    dh_private_key: &BytesEcdhElem,
) -> Result<BytesHashLen, EDHOCError> {
    if !is_static_dh {
        return Ok(*prk_in);
    }
    let secret = Zeroizing::new(crypto.ecdh(suite.ecdh_curve, dh_private_key, dh_public_key)?);
    Ok(crypto.hkdf_extract(prk_in, &secret[..]))
}

/// MAC_n = EDHOC-KDF(PRK, TH_n, label, id_cred ‖ cred ‖ ead, mac_len)
fn compute_mac<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    prk: &BytesHashLen,
    th: &BytesHashLen,
    label: &[u8],
    kid: u8,
    cred: &EdhocMessageBuffer,
    ead: Option<&BufferEad>,
    mac_len: usize,
) -> Result<BytesMaxBuffer, EDHOCError> {
    let mut context: BytesMaxContextBuffer = [0x00; MAX_KDF_CONTEXT_LEN];
    let context_len = {
        let mut encoder = CBOREncoder::new(&mut context);
        encoder.bytes(&id_cred_map(kid))?;
        encoder.raw(cred.as_slice())?;
        if let Some(ead) = ead {
            encoder.bytes(ead.as_slice())?;
        }
        encoder.position()
    };
    edhoc_kdf(crypto, prk, th, label, &context[..context_len], mac_len)
}

/// COSE-style Sig_structure binding the transcript, the credential and the
/// inner MAC: `["Signature1", bstr id_cred, bstr (TH ‖ cred ‖ ead), bstr MAC]`.
fn encode_sig_structure(
    kid: u8,
    cred: &EdhocMessageBuffer,
    ead: Option<&BufferEad>,
    th: &BytesHashLen,
    mac: &[u8],
) -> Result<(BytesMaxBuffer, usize), EDHOCError> {
    let mut external_aad: BytesMaxBuffer = [0x00; MAX_BUFFER_LEN];
    let external_aad_len = {
        let mut encoder = CBOREncoder::new(&mut external_aad);
        encoder.raw(th)?;
        encoder.raw(cred.as_slice())?;
        if let Some(ead) = ead {
            encoder.bytes(ead.as_slice())?;
        }
        encoder.position()
    };

    let mut structure: BytesMaxBuffer = [0x00; MAX_BUFFER_LEN];
    let structure_len = {
        let mut encoder = CBOREncoder::new(&mut structure);
        encoder.array(4)?;
        encoder.text(b"Signature1")?;
        encoder.bytes(&id_cred_map(kid))?;
        encoder.bytes(&external_aad[..external_aad_len])?;
        encoder.bytes(mac)?;
        encoder.position()
    };
    Ok((structure, structure_len))
}

fn mac_matches(received: &[u8], expected: &[u8]) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Construct or check the authenticator of message_2/message_3.
///
/// For static-DH methods the authenticator is MAC_n itself, for signature
/// methods it is a signature over the Sig_structure carrying MAC_n. On
/// [SigOrMacOperation::Generate] the returned buffer holds the
/// authenticator; on [SigOrMacOperation::Verify] it is empty and a mismatch
/// surfaces only as the respective authentication error.
pub fn signature_or_mac<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    operation: SigOrMacOperation<'_>,
    auth: AuthKind,
    suite: &Suite,
    prk: &BytesHashLen,
    th: &BytesHashLen,
    kid: u8,
    cred: &EdhocMessageBuffer,
    ead: Option<&BufferEad>,
    mac_label: &[u8],
) -> Result<BufferSignOrMac, EDHOCError> {
    let mac_len = if auth.is_static_dh() {
        suite.mac_len()
    } else {
        suite.hash_len()
    };
    let mac = Zeroizing::new(compute_mac(
        crypto, prk, th, mac_label, kid, cred, ead, mac_len,
    )?);

    match auth {
        AuthKind::StaticDh => match operation {
            SigOrMacOperation::Generate { .. } => {
                BufferSignOrMac::new_from_slice(&mac[..mac_len]).map_err(EDHOCError::from)
            }
            SigOrMacOperation::Verify { sign_or_mac, .. } => {
                if mac_matches(sign_or_mac, &mac[..mac_len]) {
                    Ok(BufferSignOrMac::new())
                } else {
                    Err(EDHOCError::MacVerificationFailed)
                }
            }
        },
        AuthKind::Signature => {
            let (structure, structure_len) =
                encode_sig_structure(kid, cred, ead, th, &mac[..mac_len])?;
            match operation {
                SigOrMacOperation::Generate { private_key } => {
                    let signature = crypto.sign(suite.sign, private_key, &structure[..structure_len])?;
                    BufferSignOrMac::new_from_slice(&signature).map_err(EDHOCError::from)
                }
                SigOrMacOperation::Verify {
                    public_key,
                    sign_or_mac,
                } => {
                    if sign_or_mac.len() != SIGNATURE_LEN {
                        return Err(EDHOCError::SignatureVerificationFailed);
                    }
                    let mut signature: BytesSignature = [0x00; SIGNATURE_LEN];
                    signature.copy_from_slice(sign_or_mac);
                    crypto.verify(suite.sign, public_key, &structure[..structure_len], &signature)?;
                    Ok(BufferSignOrMac::new())
                }
            }
        }
    }
}

/// COSE Enc_structure used as AEAD associated data: `["Encrypt0", h'', TH_n]`.
fn encode_enc_structure(th: &BytesHashLen) -> Result<([u8; 64], usize), EDHOCError> {
    let mut structure = [0u8; 64];
    let len = {
        let mut encoder = CBOREncoder::new(&mut structure);
        encoder.array(3)?;
        encoder.text(b"Encrypt0")?;
        encoder.bytes(&[])?;
        encoder.bytes(th)?;
        encoder.position()
    };
    Ok((structure, len))
}

fn compute_k_iv<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    id: CiphertextId,
    suite: &Suite,
    prk: &BytesHashLen,
    th: &BytesHashLen,
) -> Result<(BytesCcmKeyLen, BytesCcmIvLen), EDHOCError> {
    let (key_label, iv_label): (&[u8], &[u8]) = match id {
        CiphertextId::Ciphertext3 => (b"K_3", b"IV_3"),
        CiphertextId::Ciphertext4 => (b"K_4", b"IV_4"),
        CiphertextId::Ciphertext2 => return Err(EDHOCError::CryptoOperationFailed),
    };
    let okm = Zeroizing::new(edhoc_kdf(crypto, prk, th, key_label, &[], suite.key_len())?);
    let mut key: BytesCcmKeyLen = [0x00; AES_CCM_KEY_LEN];
    key.copy_from_slice(&okm[..AES_CCM_KEY_LEN]);
    let okm = Zeroizing::new(edhoc_kdf(crypto, prk, th, iv_label, &[], suite.iv_len())?);
    let mut iv: BytesCcmIvLen = [0x00; AES_CCM_IV_LEN];
    iv.copy_from_slice(&okm[..AES_CCM_IV_LEN]);
    Ok((key, iv))
}

/// Encrypt the plaintext of one message. For message_2/message_3 the
/// plaintext is `(ID_CRED, sign_or_mac, ?EAD)`; for message_4 it is the raw
/// EAD_4 bytes, possibly empty.
pub fn ciphertext_gen<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    id: CiphertextId,
    suite: &Suite,
    kid: Option<u8>,
    sign_or_mac: Option<&BufferSignOrMac>,
    ead: Option<&BufferEad>,
    prk: &BytesHashLen,
    th: &BytesHashLen,
) -> Result<EdhocMessageBuffer, EDHOCError> {
    let mut plaintext = EdhocMessageBuffer::new();
    match id {
        CiphertextId::Ciphertext2 | CiphertextId::Ciphertext3 => match (kid, sign_or_mac) {
            (Some(kid), Some(sign_or_mac)) => {
                let len = {
                    let mut encoder = CBOREncoder::new(&mut plaintext.content);
                    encoder.int_raw(kid)?;
                    encoder.bytes(sign_or_mac.as_slice())?;
                    if let Some(ead) = ead {
                        encoder.bytes(ead.as_slice())?;
                    }
                    encoder.position()
                };
                plaintext.len = len;
            }
            _ => return Err(EDHOCError::CborEncodingError),
        },
        CiphertextId::Ciphertext4 => {
            if let Some(ead) = ead {
                plaintext.fill_with_slice(ead.as_slice())?;
            }
        }
    }

    let result = match id {
        CiphertextId::Ciphertext2 => {
            let keystream = Zeroizing::new(edhoc_kdf(
                crypto,
                prk,
                th,
                b"KEYSTREAM_2",
                &[],
                plaintext.len,
            )?);
            let mut ciphertext = plaintext;
            for i in 0..ciphertext.len {
                ciphertext.content[i] ^= keystream[i];
            }
            Ok(ciphertext)
        }
        CiphertextId::Ciphertext3 | CiphertextId::Ciphertext4 => {
            let (mut key, mut iv) = compute_k_iv(crypto, id, suite, prk, th)?;
            let (aad, aad_len) = encode_enc_structure(th)?;
            let sealed = crypto.aead_encrypt(suite.aead, &key, &iv, &aad[..aad_len], plaintext.as_slice());
            key.zeroize();
            iv.zeroize();
            sealed
        }
    };
    plaintext.zeroize();
    result
}

/// Recover the plaintext of one message; the message_2 keystream is its own
/// inverse, message_3/message_4 authenticate through the AEAD tag.
pub fn decrypt_ciphertext<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    id: CiphertextId,
    suite: &Suite,
    prk: &BytesHashLen,
    th: &BytesHashLen,
    ciphertext: &EdhocMessageBuffer,
) -> Result<EdhocMessageBuffer, EDHOCError> {
    match id {
        CiphertextId::Ciphertext2 => {
            let keystream = Zeroizing::new(edhoc_kdf(
                crypto,
                prk,
                th,
                b"KEYSTREAM_2",
                &[],
                ciphertext.len,
            )?);
            let mut plaintext = *ciphertext;
            for i in 0..plaintext.len {
                plaintext.content[i] ^= keystream[i];
            }
            Ok(plaintext)
        }
        CiphertextId::Ciphertext3 | CiphertextId::Ciphertext4 => {
            let (mut key, mut iv) = compute_k_iv(crypto, id, suite, prk, th)?;
            let (aad, aad_len) = encode_enc_structure(th)?;
            let opened = crypto.aead_decrypt(suite.aead, &key, &iv, &aad[..aad_len], ciphertext.as_slice());
            key.zeroize();
            iv.zeroize();
            opened
        }
    }
}

/// Decrypt and parse into `(ID_CRED, sign_or_mac, ?EAD)`.
pub fn ciphertext_decrypt_split<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
    id: CiphertextId,
    suite: &Suite,
    prk: &BytesHashLen,
    th: &BytesHashLen,
    ciphertext: &EdhocMessageBuffer,
) -> Result<(IdCredOwned, BufferSignOrMac, Option<BufferEad>), EDHOCError> {
    let mut plaintext = decrypt_ciphertext(crypto, id, suite, prk, th, ciphertext)?;
    let result = decode_plaintext(plaintext.as_slice());
    plaintext.zeroize();
    result
}

pub fn r_process_message_1(
    state: &ResponderStart,
    suites_r: &[u8],
    message_1: &BufferMessage1,
) -> Result<(ProcessingM1, Option<BufferEad>), EDHOCError> {
    let (method, suites_i, _suites_i_len, g_x, _c_i, ead_1) = parse_message_1(message_1)?;

    // the initiator's preferred suite is the first of SUITES_I
    let selected = suites_i[0];
    if !suites_r.contains(&selected) {
        return Err(EDHOCError::UnsupportedCipherSuite);
    }
    let suite = get_suite(selected)?;

    Ok((
        ProcessingM1 {
            y: state.y,
            g_y: state.g_y,
            g_x,
            method,
            suite,
            message_1: *message_1,
        },
        ead_1,
    ))
}

pub fn r_prepare_message_2<Crypto: CryptoTrait>(
    state: &ProcessingM1,
    crypto: &mut Crypto,
    sk_r: &BytesEcdhElem,
    kid_r: u8,
    cred_r: &EdhocMessageBuffer,
    c_r: &ConnectionId,
    ead_2: Option<&BufferEad>,
) -> Result<(WaitM3, BufferMessage2), EDHOCError> {
    let (_, auth_r) = state.method.auth_kinds();

    let th_2 = compute_th_2(crypto, &state.message_1, &state.g_y, c_r)?;

    let prk_2e = Zeroizing::new(compute_prk_2e(crypto, &state.suite, &state.y, &state.g_x)?);
    let prk_3e2m = Zeroizing::new(prk_derive(
        crypto,
        auth_r.is_static_dh(),
        &state.suite,
        &prk_2e,
        &state.g_x,
        sk_r,
    )?);

    let sign_or_mac_2 = signature_or_mac(
        crypto,
        SigOrMacOperation::Generate { private_key: sk_r },
        auth_r,
        &state.suite,
        &prk_3e2m,
        &th_2,
        kid_r,
        cred_r,
        ead_2,
        b"MAC_2",
    )?;

    let ciphertext_2 = ciphertext_gen(
        crypto,
        CiphertextId::Ciphertext2,
        &state.suite,
        Some(kid_r),
        Some(&sign_or_mac_2),
        ead_2,
        &prk_2e,
        &th_2,
    )?;

    let th_3 = compute_th_n(crypto, &th_2, &ciphertext_2)?;
    let message_2 = encode_message_2(&state.g_y, &ciphertext_2, c_r)?;

    Ok((
        WaitM3 {
            y: state.y,
            prk_3e2m: *prk_3e2m,
            th_3,
            method: state.method,
            suite: state.suite,
        },
        message_2,
    ))
}

pub fn r_parse_message_3<Crypto: CryptoTrait>(
    state: &WaitM3,
    crypto: &mut Crypto,
    message_3: &BufferMessage3,
) -> Result<(ProcessingM3, IdCredOwned, Option<BufferEad>), EDHOCError> {
    // the peer may abort with an error message in place of message_3
    let ciphertext_3 = match decode_byte_string(message_3) {
        Ok(ciphertext_3) => ciphertext_3,
        Err(_) => {
            return match parse_error_message(message_3.as_slice()) {
                Ok(_) => Err(EDHOCError::ErrorMessageReceived),
                Err(_) => Err(EDHOCError::CborDecodingError),
            };
        }
    };

    let (id_cred_i, sign_or_mac_3, ead_3) = ciphertext_decrypt_split(
        crypto,
        CiphertextId::Ciphertext3,
        &state.suite,
        &state.prk_3e2m,
        &state.th_3,
        &ciphertext_3,
    )?;

    let th_4 = compute_th_n(crypto, &state.th_3, &ciphertext_3)?;

    Ok((
        ProcessingM3 {
            y: state.y,
            prk_3e2m: state.prk_3e2m,
            th_3: state.th_3,
            th_4,
            sign_or_mac_3,
            ead_3,
            method: state.method,
            suite: state.suite,
        },
        id_cred_i,
        ead_3,
    ))
}

pub fn r_verify_message_3<Crypto: CryptoTrait>(
    state: &ProcessingM3,
    crypto: &mut Crypto,
    valid_cred_i: &PeerCredential,
) -> Result<(Completed, BytesHashLen, BytesHashLen), EDHOCError> {
    let (auth_i, _) = state.method.auth_kinds();

    let prk_4x3m = match (auth_i, valid_cred_i.g) {
        (AuthKind::StaticDh, Some(g_i)) => Zeroizing::new(prk_derive(
            crypto,
            true,
            &state.suite,
            &state.prk_3e2m,
            &g_i,
            &state.y,
        )?),
        (AuthKind::StaticDh, None) => return Err(EDHOCError::UnknownPeer),
        (AuthKind::Signature, _) => Zeroizing::new(state.prk_3e2m),
    };

    // unused for static-DH peers
    let public_key = valid_cred_i.public_key.unwrap_or([0x00; ECDH_ELEM_LEN]);
    signature_or_mac(
        crypto,
        SigOrMacOperation::Verify {
            public_key: &public_key,
            sign_or_mac: state.sign_or_mac_3.as_slice(),
        },
        auth_i,
        &state.suite,
        &prk_4x3m,
        &state.th_3,
        valid_cred_i.kid,
        &valid_cred_i.cred,
        state.ead_3.as_ref(),
        b"MAC_3",
    )?;

    let prk_4x3m = *prk_4x3m;
    Ok((
        Completed {
            prk_4x3m,
            th_4: state.th_4,
            suite: state.suite,
        },
        prk_4x3m,
        state.th_4,
    ))
}

pub fn r_prepare_message_4<Crypto: CryptoTrait>(
    state: &Completed,
    crypto: &mut Crypto,
    ead_4: Option<&BufferEad>,
) -> Result<BufferMessage4, EDHOCError> {
    let ciphertext_4 = ciphertext_gen(
        crypto,
        CiphertextId::Ciphertext4,
        &state.suite,
        None,
        None,
        ead_4,
        &state.prk_4x3m,
        &state.th_4,
    )?;
    encode_byte_string(&ciphertext_4)
}

pub fn i_prepare_message_1(
    state: &InitiatorStart,
    method: Method,
    suites_i: &[u8],
    c_i: &ConnectionId,
    ead_1: Option<&BufferEad>,
) -> Result<(WaitM2, BufferMessage1), EDHOCError> {
    let suite = get_suite(suites_i[0])?;
    let message_1 = encode_message_1(method, suites_i, &state.g_x, c_i, ead_1)?;
    Ok((
        WaitM2 {
            x: state.x,
            method,
            suite,
            message_1,
        },
        message_1,
    ))
}

pub fn i_parse_message_2<Crypto: CryptoTrait>(
    state: &WaitM2,
    crypto: &mut Crypto,
    message_2: &BufferMessage2,
) -> Result<(ProcessingM2, ConnectionId, IdCredOwned, Option<BufferEad>), EDHOCError> {
    let (g_y, ciphertext_2, c_r) = parse_message_2(message_2)?;

    let th_2 = compute_th_2(crypto, &state.message_1, &g_y, &c_r)?;
    let prk_2e = Zeroizing::new(compute_prk_2e(crypto, &state.suite, &state.x, &g_y)?);

    let (id_cred_r, sign_or_mac_2, ead_2) = ciphertext_decrypt_split(
        crypto,
        CiphertextId::Ciphertext2,
        &state.suite,
        &prk_2e,
        &th_2,
        &ciphertext_2,
    )?;

    Ok((
        ProcessingM2 {
            x: state.x,
            prk_2e: *prk_2e,
            th_2,
            g_y,
            ciphertext_2,
            sign_or_mac_2,
            ead_2,
            method: state.method,
            suite: state.suite,
            c_r,
        },
        c_r,
        id_cred_r,
        ead_2,
    ))
}

pub fn i_verify_message_2<Crypto: CryptoTrait>(
    state: &ProcessingM2,
    crypto: &mut Crypto,
    valid_cred_r: &PeerCredential,
) -> Result<ProcessedM2, EDHOCError> {
    let (_, auth_r) = state.method.auth_kinds();

    let prk_3e2m = match (auth_r, valid_cred_r.g) {
        (AuthKind::StaticDh, Some(g_r)) => Zeroizing::new(prk_derive(
            crypto,
            true,
            &state.suite,
            &state.prk_2e,
            &g_r,
            &state.x,
        )?),
        (AuthKind::StaticDh, None) => return Err(EDHOCError::UnknownPeer),
        (AuthKind::Signature, _) => Zeroizing::new(state.prk_2e),
    };

    let public_key = valid_cred_r.public_key.unwrap_or([0x00; ECDH_ELEM_LEN]);
    signature_or_mac(
        crypto,
        SigOrMacOperation::Verify {
            public_key: &public_key,
            sign_or_mac: state.sign_or_mac_2.as_slice(),
        },
        auth_r,
        &state.suite,
        &prk_3e2m,
        &state.th_2,
        valid_cred_r.kid,
        &valid_cred_r.cred,
        state.ead_2.as_ref(),
        b"MAC_2",
    )?;

    let th_3 = compute_th_n(crypto, &state.th_2, &state.ciphertext_2)?;

    Ok(ProcessedM2 {
        x: state.x,
        prk_3e2m: *prk_3e2m,
        th_3,
        g_y: state.g_y,
        method: state.method,
        suite: state.suite,
    })
}

pub fn i_prepare_message_3<Crypto: CryptoTrait>(
    state: &ProcessedM2,
    crypto: &mut Crypto,
    sk_i: &BytesEcdhElem,
    kid_i: u8,
    cred_i: &EdhocMessageBuffer,
    ead_3: Option<&BufferEad>,
) -> Result<(Completed, BufferMessage3), EDHOCError> {
    let (auth_i, _) = state.method.auth_kinds();

    let prk_4x3m = Zeroizing::new(prk_derive(
        crypto,
        auth_i.is_static_dh(),
        &state.suite,
        &state.prk_3e2m,
        &state.g_y,
        sk_i,
    )?);

    let sign_or_mac_3 = signature_or_mac(
        crypto,
        SigOrMacOperation::Generate { private_key: sk_i },
        auth_i,
        &state.suite,
        &prk_4x3m,
        &state.th_3,
        kid_i,
        cred_i,
        ead_3,
        b"MAC_3",
    )?;

    let ciphertext_3 = ciphertext_gen(
        crypto,
        CiphertextId::Ciphertext3,
        &state.suite,
        Some(kid_i),
        Some(&sign_or_mac_3),
        ead_3,
        &state.prk_3e2m,
        &state.th_3,
    )?;

    let th_4 = compute_th_n(crypto, &state.th_3, &ciphertext_3)?;
    let message_3 = encode_byte_string(&ciphertext_3)?;

    Ok((
        Completed {
            prk_4x3m: *prk_4x3m,
            th_4,
            suite: state.suite,
        },
        message_3,
    ))
}

pub fn i_process_message_4<Crypto: CryptoTrait>(
    state: &Completed,
    crypto: &mut Crypto,
    message_4: &BufferMessage4,
) -> Result<Option<BufferEad>, EDHOCError> {
    let ciphertext_4 = decode_byte_string(message_4)?;
    let plaintext = decrypt_ciphertext(
        crypto,
        CiphertextId::Ciphertext4,
        &state.suite,
        &state.prk_4x3m,
        &state.th_4,
        &ciphertext_4,
    )?;
    if plaintext.len == 0 {
        Ok(None)
    } else {
        Ok(Some(plaintext))
    }
}

/// EDHOC-Exporter(label, context, length), expanding from PRK_4x3m and TH_4.
pub fn edhoc_exporter<Crypto: CryptoTrait>(
    state: &Completed,
    crypto: &mut Crypto,
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<BytesMaxBuffer, EDHOCError> {
    edhoc_kdf(crypto, &state.prk_4x3m, &state.th_4, label, context, length)
}

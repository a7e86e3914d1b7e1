//! Blocking responder driver over a caller-provided transport.
//!
//! [responder_run] sequences one full session: rx(message_1), tx(message_2),
//! rx(message_3), optionally tx(message_4). Apart from the mandated error
//! message on an unsupported suite, nothing is transmitted after a failure;
//! authentication failures in particular leave the wire silent.

use crate::*;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Byte-oriented transport supplied by the caller.
pub trait Transport {
    /// Fill `message` with the next received payload, returning its length.
    /// Failures surface as [EDHOCError::TransportError].
    fn rx(&mut self, message: &mut [u8]) -> Result<usize, EDHOCError>;

    /// Send `message` in full.
    fn tx(&mut self, message: &[u8]) -> Result<(), EDHOCError>;
}

/// Per-run message buffers, sized by the per-message default constants.
#[derive(Debug)]
pub struct RuntimeContext {
    pub msg1: [u8; MSG_1_DEFAULT_SIZE],
    pub msg1_len: usize,
    pub msg2: [u8; MSG_2_DEFAULT_SIZE],
    pub msg2_len: usize,
    pub msg3: [u8; MSG_3_DEFAULT_SIZE],
    pub msg3_len: usize,
    pub msg4: [u8; MSG_4_DEFAULT_SIZE],
    pub msg4_len: usize,
    pub suite: Option<Suite>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        RuntimeContext {
            msg1: [0x00; MSG_1_DEFAULT_SIZE],
            msg1_len: 0,
            msg2: [0x00; MSG_2_DEFAULT_SIZE],
            msg2_len: 0,
            msg3: [0x00; MSG_3_DEFAULT_SIZE],
            msg3_len: 0,
            msg4: [0x00; MSG_4_DEFAULT_SIZE],
            msg4_len: 0,
            suite: None,
        }
    }
}

impl RuntimeContext {
    pub fn new() -> Self {
        Default::default()
    }
}

/// Session results handed to the caller on success.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct ResponderOutputs {
    pub prk_4x3m: BytesHashLen,
    #[zeroize(skip)]
    pub th_4: BytesHashLen,
    #[zeroize(skip)]
    pub ead_1: Option<BufferEad>,
    #[zeroize(skip)]
    pub ead_3: Option<BufferEad>,
}

fn rx_into<T: Transport>(
    transport: &mut T,
    buffer: &mut [u8],
) -> Result<EdhocMessageBuffer, EDHOCError> {
    let len = transport.rx(buffer)?;
    if len > buffer.len() {
        return Err(EDHOCError::BufferTooSmall);
    }
    EdhocMessageBuffer::new_from_slice(&buffer[..len]).map_err(EDHOCError::from)
}

/// Run one full responder session.
///
/// On [EDHOCError::ErrorMessageReceived] the raw peer error message is
/// copied into `err_msg` before returning.
pub fn responder_run<Crypto: CryptoTrait, T: Transport>(
    ctx: &ResponderContext,
    peers: &[PeerCredential],
    crypto: &mut Crypto,
    transport: &mut T,
    err_msg: &mut EdhocMessageBuffer,
) -> Result<ResponderOutputs, EDHOCError> {
    let mut rt = RuntimeContext::new();

    /**************** receive and process message 1 ***********************/
    let message_1 = rx_into(transport, &mut rt.msg1)?;
    rt.msg1_len = message_1.len;

    let start = ResponderStart {
        y: ctx.y,
        g_y: ctx.g_y,
    };
    let suites_r = &ctx.suites_r[..ctx.suites_r_len];
    let (state_m1, ead_1) = match r_process_message_1(&start, suites_r, &message_1) {
        Ok(processed) => processed,
        Err(EDHOCError::UnsupportedCipherSuite) => {
            // message_1 parsed fine, echo C_I back with our suites
            let (_, _, _, _, c_i, _) = parse_message_1(&message_1)?;
            let error_message = encode_error_message(
                &c_i,
                ERR_CODE_WRONG_SELECTED_SUITE,
                &ErrorInfo::Suites(ctx.suites_r, ctx.suites_r_len),
            )?;
            transport.tx(error_message.as_slice())?;
            // after an error message is sent the session must be discontinued
            return Err(EDHOCError::ErrorMessageSent);
        }
        Err(error) => return Err(error),
    };
    rt.suite = Some(state_m1.suite);

    /******************* create and send message 2 ************************/
    let (state_m2, message_2) = r_prepare_message_2(
        &state_m1,
        crypto,
        &ctx.sk_r,
        ctx.kid_r,
        &ctx.cred_r,
        &ctx.c_r,
        ctx.ead_2.as_ref(),
    )?;
    if message_2.len > rt.msg2.len() {
        return Err(EDHOCError::BufferTooSmall);
    }
    rt.msg2[..message_2.len].copy_from_slice(message_2.as_slice());
    rt.msg2_len = message_2.len;
    transport.tx(&rt.msg2[..rt.msg2_len])?;

    /**************** receive and process message 3 ***********************/
    let message_3 = rx_into(transport, &mut rt.msg3)?;
    rt.msg3_len = message_3.len;

    let (state_m3, id_cred_i, ead_3) = match r_parse_message_3(&state_m2, crypto, &message_3) {
        Ok(parsed) => parsed,
        Err(EDHOCError::ErrorMessageReceived) => {
            // hand the peer's error message to the caller
            err_msg.fill_with_slice(message_3.as_slice())?;
            return Err(EDHOCError::ErrorMessageReceived);
        }
        Err(error) => return Err(error),
    };

    let (auth_i, _) = state_m3.method.auth_kinds();
    let valid_cred_i = retrieve_cred(auth_i.is_static_dh(), peers, &id_cred_i)?;

    // no error message on the wire here, a verification oracle would leak
    let (done, prk_4x3m, th_4) = r_verify_message_3(&state_m3, crypto, valid_cred_i)?;

    /******************* create and send message 4 ************************/
    if ctx.msg4_required {
        let message_4 = r_prepare_message_4(&done, crypto, ctx.ead_4.as_ref())?;
        if message_4.len > rt.msg4.len() {
            return Err(EDHOCError::BufferTooSmall);
        }
        rt.msg4[..message_4.len].copy_from_slice(message_4.as_slice());
        rt.msg4_len = message_4.len;
        transport.tx(&rt.msg4[..rt.msg4_len])?;
    }

    Ok(ResponderOutputs {
        prk_4x3m,
        th_4,
        ead_1,
        ead_3,
    })
}

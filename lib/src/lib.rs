//! Implementation of [EDHOC] (Ephemeral Diffie-Hellman Over COSE), a lightweight authenticated key
//! exchange for the Internet of Things.
//!
//! The crate provides a high-level interface through the [EdhocInitiator] and the [EdhocResponder]
//! structs. Both wrap the lower level state structs that are mainly used through internal
//! functions in the `edhoc` module. Following the EDHOC protocol, they generate (or process)
//! messages, progressively provide more information about their peer, and eventually devolve into
//! an [EdhocInitiatorDone] and [EdhocResponderDone], respectively, through which the EDHOC key
//! material can be obtained.
//!
//! Alternatively, [responder_run] drives one full responder session over a caller-provided
//! [Transport], covering the whole rx/tx sequence including wire error messages.
//!
//! [EDHOC]: https://datatracker.ietf.org/doc/draft-ietf-lake-edhoc/
#![cfg_attr(not(test), no_std)]

pub use {lagoon_shared::Crypto as CryptoTrait, lagoon_shared::*};

mod edhoc;
pub use edhoc::*;

mod runtime;
pub use runtime::*;

/// Starting point for performing EDHOC in the role of the Responder.
#[derive(Debug)]
pub struct EdhocResponder<'a, Crypto: CryptoTrait> {
    state: ResponderStart, // opaque state
    ctx: &'a ResponderContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocResponderProcessedM1<'a, Crypto: CryptoTrait> {
    state: ProcessingM1, // opaque state
    ctx: &'a ResponderContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocResponderWaitM3<Crypto: CryptoTrait> {
    state: WaitM3, // opaque state
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocResponderProcessingM3<Crypto: CryptoTrait> {
    state: ProcessingM3, // opaque state
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocResponderDone<Crypto: CryptoTrait> {
    state: Completed,
    crypto: Crypto,
}

impl<'a, Crypto: CryptoTrait> EdhocResponder<'a, Crypto> {
    pub fn new(crypto: Crypto, ctx: &'a ResponderContext) -> Self {
        EdhocResponder {
            state: ResponderStart {
                y: ctx.y,
                g_y: ctx.g_y,
            },
            ctx,
            crypto,
        }
    }

    pub fn process_message_1(
        self,
        message_1: &BufferMessage1,
    ) -> Result<(EdhocResponderProcessedM1<'a, Crypto>, Option<BufferEad>), EDHOCError> {
        let suites_r = &self.ctx.suites_r[..self.ctx.suites_r_len];
        let (state, ead_1) = r_process_message_1(&self.state, suites_r, message_1)?;

        Ok((
            EdhocResponderProcessedM1 {
                state,
                ctx: self.ctx,
                crypto: self.crypto,
            },
            ead_1,
        ))
    }
}

impl<'a, Crypto: CryptoTrait> EdhocResponderProcessedM1<'a, Crypto> {
    pub fn prepare_message_2(
        mut self,
        c_r: Option<ConnectionId>,
        ead_2: Option<&BufferEad>,
    ) -> Result<(EdhocResponderWaitM3<Crypto>, BufferMessage2), EDHOCError> {
        let c_r = c_r.unwrap_or(self.ctx.c_r);

        match r_prepare_message_2(
            &self.state,
            &mut self.crypto,
            &self.ctx.sk_r,
            self.ctx.kid_r,
            &self.ctx.cred_r,
            &c_r,
            ead_2,
        ) {
            Ok((state, message_2)) => Ok((
                EdhocResponderWaitM3 {
                    state,
                    crypto: self.crypto,
                },
                message_2,
            )),
            Err(error) => Err(error),
        }
    }
}

impl<Crypto: CryptoTrait> EdhocResponderWaitM3<Crypto> {
    pub fn parse_message_3(
        mut self,
        message_3: &BufferMessage3,
    ) -> Result<
        (
            EdhocResponderProcessingM3<Crypto>,
            IdCredOwned,
            Option<BufferEad>,
        ),
        EDHOCError,
    > {
        match r_parse_message_3(&self.state, &mut self.crypto, message_3) {
            Ok((state, id_cred_i, ead_3)) => Ok((
                EdhocResponderProcessingM3 {
                    state,
                    crypto: self.crypto,
                },
                id_cred_i,
                ead_3,
            )),
            Err(error) => Err(error),
        }
    }
}

impl<Crypto: CryptoTrait> EdhocResponderProcessingM3<Crypto> {
    pub fn verify_message_3(
        mut self,
        valid_cred_i: &PeerCredential,
    ) -> Result<(EdhocResponderDone<Crypto>, BytesHashLen, BytesHashLen), EDHOCError> {
        match r_verify_message_3(&self.state, &mut self.crypto, valid_cred_i) {
            Ok((state, prk_4x3m, th_4)) => Ok((
                EdhocResponderDone {
                    state,
                    crypto: self.crypto,
                },
                prk_4x3m,
                th_4,
            )),
            Err(error) => Err(error),
        }
    }
}

impl<Crypto: CryptoTrait> EdhocResponderDone<Crypto> {
    pub fn prepare_message_4(
        &mut self,
        ead_4: Option<&BufferEad>,
    ) -> Result<BufferMessage4, EDHOCError> {
        r_prepare_message_4(&self.state, &mut self.crypto, ead_4)
    }

    pub fn edhoc_exporter(
        &mut self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<BytesMaxBuffer, EDHOCError> {
        edhoc_exporter(&self.state, &mut self.crypto, label, context, length)
    }
}

/// Starting point for performing EDHOC in the role of the Initiator.
#[derive(Debug)]
pub struct EdhocInitiator<'a, Crypto: CryptoTrait> {
    state: InitiatorStart, // opaque state
    ctx: &'a InitiatorContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocInitiatorWaitM2<'a, Crypto: CryptoTrait> {
    state: WaitM2, // opaque state
    ctx: &'a InitiatorContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocInitiatorProcessingM2<'a, Crypto: CryptoTrait> {
    state: ProcessingM2, // opaque state
    ctx: &'a InitiatorContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocInitiatorProcessedM2<'a, Crypto: CryptoTrait> {
    state: ProcessedM2, // opaque state
    ctx: &'a InitiatorContext,
    crypto: Crypto,
}

#[derive(Debug)]
pub struct EdhocInitiatorDone<Crypto: CryptoTrait> {
    state: Completed,
    crypto: Crypto,
}

impl<'a, Crypto: CryptoTrait> EdhocInitiator<'a, Crypto> {
    pub fn new(crypto: Crypto, ctx: &'a InitiatorContext) -> Self {
        EdhocInitiator {
            state: InitiatorStart {
                x: ctx.x,
                g_x: ctx.g_x,
            },
            ctx,
            crypto,
        }
    }

    pub fn prepare_message_1(
        self,
    ) -> Result<(EdhocInitiatorWaitM2<'a, Crypto>, BufferMessage1), EDHOCError> {
        let suites_i = &self.ctx.suites_i[..self.ctx.suites_i_len];
        match i_prepare_message_1(
            &self.state,
            self.ctx.method,
            suites_i,
            &self.ctx.c_i,
            self.ctx.ead_1.as_ref(),
        ) {
            Ok((state, message_1)) => Ok((
                EdhocInitiatorWaitM2 {
                    state,
                    ctx: self.ctx,
                    crypto: self.crypto,
                },
                message_1,
            )),
            Err(error) => Err(error),
        }
    }
}

impl<'a, Crypto: CryptoTrait> EdhocInitiatorWaitM2<'a, Crypto> {
    pub fn parse_message_2(
        mut self,
        message_2: &BufferMessage2,
    ) -> Result<
        (
            EdhocInitiatorProcessingM2<'a, Crypto>,
            ConnectionId,
            IdCredOwned,
            Option<BufferEad>,
        ),
        EDHOCError,
    > {
        match i_parse_message_2(&self.state, &mut self.crypto, message_2) {
            Ok((state, c_r, id_cred_r, ead_2)) => Ok((
                EdhocInitiatorProcessingM2 {
                    state,
                    ctx: self.ctx,
                    crypto: self.crypto,
                },
                c_r,
                id_cred_r,
                ead_2,
            )),
            Err(error) => Err(error),
        }
    }
}

impl<'a, Crypto: CryptoTrait> EdhocInitiatorProcessingM2<'a, Crypto> {
    pub fn verify_message_2(
        mut self,
        valid_cred_r: &PeerCredential,
    ) -> Result<EdhocInitiatorProcessedM2<'a, Crypto>, EDHOCError> {
        match i_verify_message_2(&self.state, &mut self.crypto, valid_cred_r) {
            Ok(state) => Ok(EdhocInitiatorProcessedM2 {
                state,
                ctx: self.ctx,
                crypto: self.crypto,
            }),
            Err(error) => Err(error),
        }
    }
}

impl<'a, Crypto: CryptoTrait> EdhocInitiatorProcessedM2<'a, Crypto> {
    pub fn prepare_message_3(
        mut self,
        ead_3: Option<&BufferEad>,
    ) -> Result<
        (
            EdhocInitiatorDone<Crypto>,
            BufferMessage3,
            BytesHashLen,
            BytesHashLen,
        ),
        EDHOCError,
    > {
        match i_prepare_message_3(
            &self.state,
            &mut self.crypto,
            &self.ctx.sk_i,
            self.ctx.kid_i,
            &self.ctx.cred_i,
            ead_3,
        ) {
            Ok((state, message_3)) => {
                let prk_4x3m = state.prk_4x3m;
                let th_4 = state.th_4;
                Ok((
                    EdhocInitiatorDone {
                        state,
                        crypto: self.crypto,
                    },
                    message_3,
                    prk_4x3m,
                    th_4,
                ))
            }
            Err(error) => Err(error),
        }
    }
}

impl<Crypto: CryptoTrait> EdhocInitiatorDone<Crypto> {
    pub fn process_message_4(
        &mut self,
        message_4: &BufferMessage4,
    ) -> Result<Option<BufferEad>, EDHOCError> {
        i_process_message_4(&self.state, &mut self.crypto, message_4)
    }

    pub fn edhoc_exporter(
        &mut self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<BytesMaxBuffer, EDHOCError> {
        edhoc_exporter(&self.state, &mut self.crypto, label, context, length)
    }
}

pub fn generate_connection_identifier_cbor<Crypto: CryptoTrait>(
    crypto: &mut Crypto,
) -> ConnectionId {
    ConnectionId::Int(generate_connection_identifier(crypto))
}

/// generates an identifier that can be serialized as a single CBOR integer, i.e. -24 <= x <= 23
pub fn generate_connection_identifier<Crypto: CryptoTrait>(crypto: &mut Crypto) -> i8 {
    let mut conn_id = crypto.get_random_byte() as i8;
    while conn_id < -24 || conn_id > 23 {
        conn_id = crypto.get_random_byte() as i8;
    }
    conn_id
}

#[cfg(test)]
mod test_vectors_common {
    use hexlit::hex;

    pub const KID_I: u8 = 0x2b;
    pub const KID_R: u8 = 0x0a;
    pub const CRED_I: &[u8] = &hex!("A2027734322D35302D33312D46462D45462D33372D33322D333908A101A5010202412B2001215820AC75E9ECE3E50BFC8ED60399889522405C47BF16DF96660A41298CB4307F7EB62258206E5DE611388A4B8A8211334AC7D37ECB52A387D257E6DB3C2A93DF21FF3AFFC8");
    pub const CRED_R: &[u8] = &hex!("A2026008A101A5010202410A2001215820BBC34960526EA4D32E940CAD2A234148DDC21791A12AFBCBAC93622046DD44F02258204519E257236B2A0CE2023F0931F1F386CA7AFDA64FCDE0108C224C51EABF6072");

    // P-256 long-term keys, used for both signing and static DH on suites 2/3
    pub const I: &[u8] = &hex!("fb13adeb6518cee5f88417660841142e830a81fe334380a953406a1305e8706b");
    pub const G_I: &[u8] = &hex!("ac75e9ece3e50bfc8ed60399889522405c47bf16df96660a41298cb4307f7eb6");
    pub const R: &[u8] = &hex!("72cc4761dbd4c78f758931aa589d348d1ef874a7e303ede2f140dcf3e6aa4aac");
    pub const G_R: &[u8] = &hex!("bbc34960526ea4d32e940cad2a234148ddc21791a12afbcbac93622046dd44f0");

    // Ed25519 signing keys for suites 0/1 (RFC 8032 test keys)
    pub const ED25519_SK_I: &[u8] =
        &hex!("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60");
    pub const ED25519_PK_I: &[u8] =
        &hex!("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a");
    pub const ED25519_SK_R: &[u8] =
        &hex!("4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb");
    pub const ED25519_PK_R: &[u8] =
        &hex!("3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c");

    // X25519 static DH keys for suites 0/1 (RFC 7748 test keys)
    pub const X25519_SK_I: &[u8] =
        &hex!("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
    pub const X25519_PK_I: &[u8] =
        &hex!("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
    pub const X25519_SK_R: &[u8] =
        &hex!("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
    pub const X25519_PK_R: &[u8] =
        &hex!("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
}

#[cfg(test)]
mod test_setup {
    use super::test_vectors_common::*;
    use super::*;
    use lagoon_crypto::default_crypto;

    pub struct Party {
        pub sk: BytesEcdhElem,
        pub public_key: Option<BytesEcdhElem>,
        pub g: Option<BytesEcdhElem>,
        pub kid: u8,
        pub cred: EdhocMessageBuffer,
    }

    pub fn to_elem(slice: &[u8]) -> BytesEcdhElem {
        slice.try_into().unwrap()
    }

    /// Long-term key material for one party, matching the curve family of
    /// the suite and the authentication kind of the method.
    pub fn party(suite_label: u8, auth: AuthKind, is_initiator: bool) -> Party {
        let p256 = suite_label >= 2;
        let (kid, cred) = if is_initiator {
            (KID_I, EdhocMessageBuffer::new_from_slice(CRED_I).unwrap())
        } else {
            (KID_R, EdhocMessageBuffer::new_from_slice(CRED_R).unwrap())
        };
        let (sk, public_key, g) = match (p256, auth, is_initiator) {
            // the P-256 key pair serves both roles of sk
            (true, _, true) => (to_elem(I), Some(to_elem(G_I)), Some(to_elem(G_I))),
            (true, _, false) => (to_elem(R), Some(to_elem(G_R)), Some(to_elem(G_R))),
            (false, AuthKind::Signature, true) => {
                (to_elem(ED25519_SK_I), Some(to_elem(ED25519_PK_I)), None)
            }
            (false, AuthKind::Signature, false) => {
                (to_elem(ED25519_SK_R), Some(to_elem(ED25519_PK_R)), None)
            }
            (false, AuthKind::StaticDh, true) => {
                (to_elem(X25519_SK_I), None, Some(to_elem(X25519_PK_I)))
            }
            (false, AuthKind::StaticDh, false) => {
                (to_elem(X25519_SK_R), None, Some(to_elem(X25519_PK_R)))
            }
        };
        Party {
            sk,
            public_key,
            g,
            kid,
            cred,
        }
    }

    pub fn peer_credential(party: &Party) -> PeerCredential {
        PeerCredential {
            kid: party.kid,
            cred: party.cred,
            public_key: party.public_key,
            g: party.g,
        }
    }

    pub fn suites(label: u8) -> (BytesSuites, usize) {
        let mut list: BytesSuites = Default::default();
        list[0] = label;
        (list, 1)
    }

    pub fn initiator_context(
        method: Method,
        suite_label: u8,
    ) -> (InitiatorContext, PeerCredential) {
        let suite = get_suite(suite_label).unwrap();
        let (auth_i, _) = method.auth_kinds();
        let party_i = party(suite_label, auth_i, true);
        let (suites_i, suites_i_len) = suites(suite_label);
        let (x, g_x) = default_crypto().generate_key_pair(suite.ecdh_curve);
        let ctx = InitiatorContext {
            method,
            x,
            g_x,
            sk_i: party_i.sk,
            c_i: ConnectionId::Int(14),
            kid_i: party_i.kid,
            cred_i: party_i.cred,
            ead_1: None,
            ead_3: None,
            suites_i,
            suites_i_len,
        };
        (ctx, peer_credential(&party_i))
    }

    pub fn responder_context(
        method: Method,
        suite_label: u8,
        msg4_required: bool,
    ) -> (ResponderContext, PeerCredential) {
        let suite = get_suite(suite_label).unwrap();
        let (_, auth_r) = method.auth_kinds();
        let party_r = party(suite_label, auth_r, false);
        let (suites_r, suites_r_len) = suites(suite_label);
        let (y, g_y) = default_crypto().generate_key_pair(suite.ecdh_curve);
        let ctx = ResponderContext {
            y,
            g_y,
            sk_r: party_r.sk,
            c_r: ConnectionId::Int(-8),
            kid_r: party_r.kid,
            cred_r: party_r.cred,
            ead_2: None,
            ead_4: Some(BufferEad::new_from_slice(&[0x11, 0x22, 0x33]).unwrap()),
            msg4_required,
            suites_r,
            suites_r_len,
        };
        (ctx, peer_credential(&party_r))
    }
}


#[cfg(test)]
mod test_runtime {
    use super::test_setup::*;
    use super::*;
    use lagoon_crypto::default_crypto;
    use std::sync::mpsc;
    use std::thread;

    struct ChannelTransport {
        incoming: mpsc::Receiver<Vec<u8>>,
        outgoing: mpsc::Sender<Vec<u8>>,
    }

    impl Transport for ChannelTransport {
        fn rx(&mut self, message: &mut [u8]) -> Result<usize, EDHOCError> {
            let payload = self
                .incoming
                .recv()
                .map_err(|_| EDHOCError::TransportError)?;
            if payload.len() > message.len() {
                return Err(EDHOCError::TransportError);
            }
            message[..payload.len()].copy_from_slice(&payload);
            Ok(payload.len())
        }

        fn tx(&mut self, message: &[u8]) -> Result<(), EDHOCError> {
            self.outgoing
                .send(message.to_vec())
                .map_err(|_| EDHOCError::TransportError)
        }
    }

    fn spawn_responder(
        ctx_r: ResponderContext,
        peers: Vec<PeerCredential>,
    ) -> (
        mpsc::Sender<Vec<u8>>,
        mpsc::Receiver<Vec<u8>>,
        thread::JoinHandle<(Result<ResponderOutputs, EDHOCError>, EdhocMessageBuffer)>,
    ) {
        let (to_responder, from_initiator) = mpsc::channel();
        let (to_initiator, from_responder) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut crypto = default_crypto();
            let mut transport = ChannelTransport {
                incoming: from_initiator,
                outgoing: to_initiator,
            };
            let mut err_msg = EdhocMessageBuffer::new();
            let result = responder_run(&ctx_r, &peers, &mut crypto, &mut transport, &mut err_msg);
            (result, err_msg)
        });
        (to_responder, from_responder, handle)
    }

    #[test]
    fn test_responder_run_handshake() {
        let method = Method::StatStat;
        let (ctx_i, cred_of_i) = initiator_context(method, 2);
        let (ctx_r, cred_of_r) = responder_context(method, 2, true);
        let peers_for_i = [cred_of_r];

        let (to_responder, from_responder, handle) = spawn_responder(ctx_r, vec![cred_of_i]);

        let initiator = EdhocInitiator::new(default_crypto(), &ctx_i);
        let (initiator, message_1) = initiator.prepare_message_1().unwrap();
        to_responder.send(message_1.as_slice().to_vec()).unwrap();

        let msg2_bytes = from_responder.recv().unwrap();
        let message_2 = EdhocMessageBuffer::new_from_slice(&msg2_bytes).unwrap();
        let (initiator, _c_r, id_cred_r, _) = initiator.parse_message_2(&message_2).unwrap();
        let valid_cred_r = retrieve_cred(true, &peers_for_i, &id_cred_r).unwrap();
        let initiator = initiator.verify_message_2(valid_cred_r).unwrap();
        let (mut initiator, message_3, i_prk_4x3m, i_th_4) =
            initiator.prepare_message_3(None).unwrap();
        to_responder.send(message_3.as_slice().to_vec()).unwrap();

        let msg4_bytes = from_responder.recv().unwrap();
        let message_4 = EdhocMessageBuffer::new_from_slice(&msg4_bytes).unwrap();
        let ead_4 = initiator.process_message_4(&message_4).unwrap();
        assert_eq!(ead_4.unwrap().as_slice(), &[0x11, 0x22, 0x33]);

        let (result, _) = handle.join().unwrap();
        let outputs = result.unwrap();
        assert_eq!(outputs.prk_4x3m, i_prk_4x3m);
        assert_eq!(outputs.th_4, i_th_4);
        assert!(outputs.ead_1.is_none());
        assert!(outputs.ead_3.is_none());
    }

    #[test]
    fn test_responder_run_unsupported_suite() {
        let method = Method::StatStat;
        let (ctx_i, cred_of_i) = initiator_context(method, 2);
        // responder supports only suite 2, initiator will ask for 99
        let (ctx_r, _) = responder_context(method, 2, false);

        let (to_responder, from_responder, handle) = spawn_responder(ctx_r, vec![cred_of_i]);

        let message_1 =
            encode_message_1(method, &[99], &ctx_i.g_x, &ctx_i.c_i, None).unwrap();
        to_responder.send(message_1.as_slice().to_vec()).unwrap();

        // the wire error carries our connection identifier and SUITES_R
        let err_bytes = from_responder.recv().unwrap();
        let (c_x, err_code, err_info) = parse_error_message(&err_bytes).unwrap();
        assert_eq!(c_x, ctx_i.c_i);
        assert_eq!(err_code, ERR_CODE_WRONG_SELECTED_SUITE);
        match err_info {
            ErrorInfo::Suites(suites_r, len) => {
                assert_eq!(len, 1);
                assert_eq!(suites_r[0], 2);
            }
            _ => panic!("expected suites"),
        }

        let (result, _) = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), EDHOCError::ErrorMessageSent);
    }

    #[test]
    fn test_responder_run_malformed_message_1_sends_nothing() {
        let method = Method::StatStat;
        let (_, cred_of_i) = initiator_context(method, 2);
        let (ctx_r, _) = responder_context(method, 2, false);

        let (to_responder, from_responder, handle) = spawn_responder(ctx_r, vec![cred_of_i]);
        to_responder.send(vec![0xFF, 0x00, 0x01]).unwrap();

        let (result, _) = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), EDHOCError::CborDecodingError);
        assert!(from_responder.try_recv().is_err());
    }

    #[test]
    fn test_responder_run_error_message_received() {
        let method = Method::StatStat;
        let (ctx_i, cred_of_i) = initiator_context(method, 2);
        let (ctx_r, cred_of_r) = responder_context(method, 2, false);
        let peers_for_i = [cred_of_r];

        let (to_responder, from_responder, handle) = spawn_responder(ctx_r, vec![cred_of_i]);

        let initiator = EdhocInitiator::new(default_crypto(), &ctx_i);
        let (initiator, message_1) = initiator.prepare_message_1().unwrap();
        to_responder.send(message_1.as_slice().to_vec()).unwrap();

        let msg2_bytes = from_responder.recv().unwrap();
        let message_2 = EdhocMessageBuffer::new_from_slice(&msg2_bytes).unwrap();
        let (initiator, _, id_cred_r, _) = initiator.parse_message_2(&message_2).unwrap();
        let valid_cred_r = retrieve_cred(true, &peers_for_i, &id_cred_r).unwrap();
        let _initiator = initiator.verify_message_2(valid_cred_r).unwrap();

        // abort instead of sending message_3
        let diagnostic = EdhocMessageBuffer::new_from_slice(b"gone").unwrap();
        let error_message = encode_error_message(
            &ctx_i.c_i,
            ERR_CODE_UNSPECIFIED,
            &ErrorInfo::Diagnostic(diagnostic),
        )
        .unwrap();
        to_responder
            .send(error_message.as_slice().to_vec())
            .unwrap();

        let (result, err_msg) = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), EDHOCError::ErrorMessageReceived);
        assert_eq!(err_msg.as_slice(), error_message.as_slice());
    }

    #[test]
    fn test_responder_run_tampered_message_3_sends_nothing() {
        let method = Method::StatStat;
        let (ctx_i, cred_of_i) = initiator_context(method, 2);
        let (ctx_r, cred_of_r) = responder_context(method, 2, false);
        let peers_for_i = [cred_of_r];

        let (to_responder, from_responder, handle) = spawn_responder(ctx_r, vec![cred_of_i]);

        let initiator = EdhocInitiator::new(default_crypto(), &ctx_i);
        let (initiator, message_1) = initiator.prepare_message_1().unwrap();
        to_responder.send(message_1.as_slice().to_vec()).unwrap();

        let msg2_bytes = from_responder.recv().unwrap();
        let message_2 = EdhocMessageBuffer::new_from_slice(&msg2_bytes).unwrap();
        let (initiator, _, id_cred_r, _) = initiator.parse_message_2(&message_2).unwrap();
        let valid_cred_r = retrieve_cred(true, &peers_for_i, &id_cred_r).unwrap();
        let initiator = initiator.verify_message_2(valid_cred_r).unwrap();
        let (_initiator, mut message_3, _, _) = initiator.prepare_message_3(None).unwrap();
        message_3.content[message_3.len - 2] ^= 0x80;
        to_responder.send(message_3.as_slice().to_vec()).unwrap();

        let (result, _) = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), EDHOCError::AeadAuthenticationFailed);
        assert!(from_responder.try_recv().is_err());
    }
}

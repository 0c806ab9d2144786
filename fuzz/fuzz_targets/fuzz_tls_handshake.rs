#![no_main]
use bastion_tls::crypt::ciphersuite::CipherSuiteInfo;
use bastion_tls::handshake::messages::HandshakeMessage;
use bastion_tls::handshake::HandshakeType;
use bastion_tls::{CipherSuite, ProtocolVersion};
use libfuzzer_sys::fuzz_target;

// First byte picks the message type, second the version, the next two a
// ciphersuite for the key exchange decoders; the rest is the body.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let ty = match HandshakeType::from_u8(data[0]) {
        Ok(ty) => ty,
        Err(_) if data[0] == HandshakeType::ClientHelloSslv2 as u8 => HandshakeType::ClientHelloSslv2,
        Err(_) => return,
    };
    let version = ProtocolVersion::new(3, data[1] % 4);
    let suite = CipherSuiteInfo::by_id(CipherSuite(u16::from_be_bytes([data[2], data[3]])));
    let _ = HandshakeMessage::decode(ty, &data[4..], version, suite);
});

/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid iv length")]
    InvalidIvLength,
    #[error("input not a multiple of the block size")]
    NotBlockAligned,
    #[error("aead: tag verification failed")]
    AeadTagVerifyFail,

    #[error("rsa: encryption failed")]
    RsaEncryptFail,
    #[error("rsa: signing failed")]
    RsaSignFail,

    #[error("ecdsa: signing failed")]
    EcdsaSignFail,

    #[error("random number generation failed")]
    RandomFail,
}

/// TLS protocol errors.
///
/// The fatal protocol variants correspond one to one with the alert that is
/// sent to the peer before the error is surfaced.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("bad record MAC")]
    BadRecordMac,
    #[error("record overflow: {0}")]
    RecordOverflow(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("protocol version rejected: {0}")]
    ProtocolVersion(String),
    #[error("bad certificate: {0}")]
    BadCertificate(String),
    #[error("decrypt error: {0}")]
    DecryptError(String),
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),
    #[error("unknown psk identity: {0}")]
    UnknownPskIdentity(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("alert received: {0}")]
    AlertReceived(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

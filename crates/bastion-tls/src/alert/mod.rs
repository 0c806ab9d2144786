//! TLS alert protocol.

use bastion_types::TlsError;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes (RFC 5246 §7.2, RFC 6066, RFC 4279, RFC 5746).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    /// Deprecated in TLS 1.1; never sent, accepted on receipt.
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    /// SSLv3 only.
    NoCertificate = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestriction = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    CertificateUnobtainable = 111,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
    BadCertificateHashValue = 114,
    UnknownPskIdentity = 115,
}

/// A TLS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl AlertLevel {
    /// Convert from u8 to AlertLevel.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    /// Convert from u8 to AlertDescription.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(AlertDescription::CloseNotify),
            10 => Ok(AlertDescription::UnexpectedMessage),
            20 => Ok(AlertDescription::BadRecordMac),
            21 => Ok(AlertDescription::DecryptionFailed),
            22 => Ok(AlertDescription::RecordOverflow),
            30 => Ok(AlertDescription::DecompressionFailure),
            40 => Ok(AlertDescription::HandshakeFailure),
            41 => Ok(AlertDescription::NoCertificate),
            42 => Ok(AlertDescription::BadCertificate),
            43 => Ok(AlertDescription::UnsupportedCertificate),
            44 => Ok(AlertDescription::CertificateRevoked),
            45 => Ok(AlertDescription::CertificateExpired),
            46 => Ok(AlertDescription::CertificateUnknown),
            47 => Ok(AlertDescription::IllegalParameter),
            48 => Ok(AlertDescription::UnknownCa),
            49 => Ok(AlertDescription::AccessDenied),
            50 => Ok(AlertDescription::DecodeError),
            51 => Ok(AlertDescription::DecryptError),
            60 => Ok(AlertDescription::ExportRestriction),
            70 => Ok(AlertDescription::ProtocolVersion),
            71 => Ok(AlertDescription::InsufficientSecurity),
            80 => Ok(AlertDescription::InternalError),
            90 => Ok(AlertDescription::UserCanceled),
            100 => Ok(AlertDescription::NoRenegotiation),
            110 => Ok(AlertDescription::UnsupportedExtension),
            111 => Ok(AlertDescription::CertificateUnobtainable),
            112 => Ok(AlertDescription::UnrecognizedName),
            113 => Ok(AlertDescription::BadCertificateStatusResponse),
            114 => Ok(AlertDescription::BadCertificateHashValue),
            115 => Ok(AlertDescription::UnknownPskIdentity),
            _ => Err(v),
        }
    }
}

impl Alert {
    pub fn new(level: AlertLevel, description: AlertDescription) -> Self {
        Self { level, description }
    }

    pub fn fatal(description: AlertDescription) -> Self {
        Self::new(AlertLevel::Fatal, description)
    }

    pub fn warning(description: AlertDescription) -> Self {
        Self::new(AlertLevel::Warning, description)
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }

    /// Wire form: {level, description}.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    /// Parse an alert record body.
    pub fn decode(buf: &[u8]) -> Result<Self, TlsError> {
        if buf.len() != 2 {
            return Err(TlsError::DecodeError(format!(
                "alert record of {} bytes",
                buf.len()
            )));
        }
        let level = AlertLevel::from_u8(buf[0])
            .map_err(|v| TlsError::DecodeError(format!("bad alert level {v}")))?;
        let description = AlertDescription::from_u8(buf[1])
            .map_err(|v| TlsError::DecodeError(format!("unknown alert {v}")))?;
        Ok(Self { level, description })
    }
}

/// The alert sent to the peer when a local error aborts the connection.
impl From<&TlsError> for AlertDescription {
    fn from(err: &TlsError) -> Self {
        match err {
            TlsError::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            TlsError::HandshakeFailed(_) => AlertDescription::HandshakeFailure,
            TlsError::BadRecordMac => AlertDescription::BadRecordMac,
            TlsError::RecordOverflow(_) => AlertDescription::RecordOverflow,
            TlsError::DecodeError(_) => AlertDescription::DecodeError,
            TlsError::ProtocolVersion(_) => AlertDescription::ProtocolVersion,
            TlsError::BadCertificate(_) => AlertDescription::BadCertificate,
            TlsError::DecryptError(_) => AlertDescription::DecryptError,
            TlsError::IllegalParameter(_) => AlertDescription::IllegalParameter,
            TlsError::UnknownPskIdentity(_) => AlertDescription::UnknownPskIdentity,
            TlsError::InternalError(_)
            | TlsError::AlertReceived(_)
            | TlsError::Config(_)
            | TlsError::InvalidState(_)
            | TlsError::ConnectionClosed
            | TlsError::CryptoError(_) => AlertDescription::InternalError,
        }
    }
}

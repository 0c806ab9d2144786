/// Hash algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgId {
    Md5,
    Sha1,
    Sha256,
    Sha384,
}

impl HashAlgId {
    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlgId::Md5 => 16,
            HashAlgId::Sha1 => 20,
            HashAlgId::Sha256 => 32,
            HashAlgId::Sha384 => 48,
        }
    }

    /// Canonical name, as used by the algorithm registry.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgId::Md5 => "MD5",
            HashAlgId::Sha1 => "SHA-1",
            HashAlgId::Sha256 => "SHA-256",
            HashAlgId::Sha384 => "SHA-384",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "MD5" => Some(HashAlgId::Md5),
            "SHA-1" | "SHA-160" => Some(HashAlgId::Sha1),
            "SHA-256" => Some(HashAlgId::Sha256),
            "SHA-384" => Some(HashAlgId::Sha384),
            _ => None,
        }
    }

    /// TLS 1.2 `HashAlgorithm` code point (RFC 5246 §7.4.1.4.1).
    pub fn tls_code(self) -> u8 {
        match self {
            HashAlgId::Md5 => 1,
            HashAlgId::Sha1 => 2,
            HashAlgId::Sha256 => 4,
            HashAlgId::Sha384 => 5,
        }
    }

    pub fn from_tls_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(HashAlgId::Md5),
            2 => Some(HashAlgId::Sha1),
            4 => Some(HashAlgId::Sha256),
            5 => Some(HashAlgId::Sha384),
            _ => None,
        }
    }
}

/// Bulk cipher identifiers used by TLS record protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgId {
    Aes128,
    Aes256,
    TripleDes,
    Rc4_128,
}

impl CipherAlgId {
    /// Base algorithm name, without a mode.
    pub fn name(self) -> &'static str {
        match self {
            CipherAlgId::Aes128 => "AES-128",
            CipherAlgId::Aes256 => "AES-256",
            CipherAlgId::TripleDes => "TripleDES",
            CipherAlgId::Rc4_128 => "ARC4",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            CipherAlgId::Aes128 | CipherAlgId::Rc4_128 => 16,
            CipherAlgId::TripleDes => 24,
            CipherAlgId::Aes256 => 32,
        }
    }

    /// Block size in bytes; `None` for stream ciphers.
    pub fn block_size(self) -> Option<usize> {
        match self {
            CipherAlgId::Aes128 | CipherAlgId::Aes256 => Some(16),
            CipherAlgId::TripleDes => Some(8),
            CipherAlgId::Rc4_128 => None,
        }
    }

    /// Full registry name: block ciphers run in CBC mode without padding.
    pub fn registry_name(self) -> String {
        match self.block_size() {
            Some(_) => format!("{}/CBC/NoPadding", self.name()),
            None => self.name().to_string(),
        }
    }
}

/// Elliptic curve identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurveId {
    Secp256r1,
    X25519,
}

impl EccCurveId {
    /// TLS NamedCurve code point (RFC 4492, RFC 8422).
    pub fn tls_code(self) -> u16 {
        match self {
            EccCurveId::Secp256r1 => 23,
            EccCurveId::X25519 => 29,
        }
    }

    pub fn from_tls_code(code: u16) -> Option<Self> {
        match code {
            23 => Some(EccCurveId::Secp256r1),
            29 => Some(EccCurveId::X25519),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EccCurveId::Secp256r1 => "secp256r1",
            EccCurveId::X25519 => "x25519",
        }
    }
}

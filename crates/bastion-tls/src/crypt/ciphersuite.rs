//! Ciphersuite registry: a static table from wire identifier to the
//! algorithms the suite negotiates.

use bastion_types::{CipherAlgId, HashAlgId};

use crate::{CipherSuite, ProtocolVersion};

/// Key exchange algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KexAlgo {
    Rsa,
    Dh,
    Ecdh,
    Psk,
    DhePsk,
    EcdhePsk,
    SrpSha,
}

impl KexAlgo {
    pub fn name(self) -> &'static str {
        match self {
            KexAlgo::Rsa => "RSA",
            KexAlgo::Dh => "DH",
            KexAlgo::Ecdh => "ECDH",
            KexAlgo::Psk => "PSK",
            KexAlgo::DhePsk => "DHE_PSK",
            KexAlgo::EcdhePsk => "ECDHE_PSK",
            KexAlgo::SrpSha => "SRP_SHA",
        }
    }

    /// Whether the pre-master secret mixes in a pre-shared key.
    pub fn is_psk(self) -> bool {
        matches!(self, KexAlgo::Psk | KexAlgo::DhePsk | KexAlgo::EcdhePsk)
    }
}

/// Authentication (signature) algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigAlgo {
    Rsa,
    Ecdsa,
}

impl SigAlgo {
    pub fn name(self) -> &'static str {
        match self {
            SigAlgo::Rsa => "RSA",
            SigAlgo::Ecdsa => "ECDSA",
        }
    }

    /// TLS 1.2 `SignatureAlgorithm` code point.
    pub fn tls_code(self) -> u8 {
        match self {
            SigAlgo::Rsa => 1,
            SigAlgo::Ecdsa => 3,
        }
    }

    pub fn from_tls_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SigAlgo::Rsa),
            3 => Some(SigAlgo::Ecdsa),
            _ => None,
        }
    }

    /// `ClientCertificateType` code point used in CertificateRequest.
    pub fn client_cert_type(self) -> u8 {
        match self {
            SigAlgo::Rsa => 1,
            SigAlgo::Ecdsa => 64,
        }
    }

    pub fn from_client_cert_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(SigAlgo::Rsa),
            64 => Some(SigAlgo::Ecdsa),
            _ => None,
        }
    }
}

/// Immutable description of one ciphersuite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteInfo {
    pub suite: CipherSuite,
    pub name: &'static str,
    pub kex: KexAlgo,
    /// `None` for anonymous and pure-PSK suites.
    pub sig: Option<SigAlgo>,
    pub cipher: CipherAlgId,
    pub mac: HashAlgId,
}

impl CipherSuiteInfo {
    /// Look up a suite by identifier.
    pub fn by_id(suite: CipherSuite) -> Option<&'static CipherSuiteInfo> {
        SUITES.iter().find(|s| s.suite == suite)
    }

    /// Every suite the registry knows, in table order.
    pub fn all() -> &'static [CipherSuiteInfo] {
        SUITES
    }

    /// Whether the suite depends on elliptic curve support.
    pub fn is_ecc(&self) -> bool {
        matches!(self.kex, KexAlgo::Ecdh | KexAlgo::EcdhePsk) || self.sig == Some(SigAlgo::Ecdsa)
    }

    pub fn cipher_keylen(&self) -> usize {
        self.cipher.key_len()
    }

    /// Length of each IV drawn from the key block (block size, or 0).
    pub fn cipher_ivlen(&self) -> usize {
        self.cipher.block_size().unwrap_or(0)
    }

    pub fn mac_keylen(&self) -> usize {
        self.mac.output_len()
    }

    /// SHA-256/SHA-384 MAC suites were introduced with TLS 1.2.
    pub fn usable_in(&self, version: ProtocolVersion) -> bool {
        match self.mac {
            HashAlgId::Sha256 | HashAlgId::Sha384 => {
                version.supports_ciphersuite_specific_prf()
            }
            _ => true,
        }
    }

    /// PRF hash used with this suite in TLS 1.2.
    pub fn prf_hash(&self) -> HashAlgId {
        if self.mac == HashAlgId::Sha384 {
            HashAlgId::Sha384
        } else {
            HashAlgId::Sha256
        }
    }

    /// Registry name of the record MAC for `version`.
    pub fn mac_name(&self, version: ProtocolVersion) -> String {
        if version == ProtocolVersion::SSL_V3 {
            format!("SSL3-MAC({})", self.mac.name())
        } else {
            format!("HMAC({})", self.mac.name())
        }
    }
}

/// Signalling suite value standing in for an empty renegotiation_info
/// extension (RFC 5746 §3.3).
pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: CipherSuite = CipherSuite(0x00FF);

impl CipherSuite {
    pub const TLS_RSA_WITH_RC4_128_MD5: Self = Self(0x0004);
    pub const TLS_RSA_WITH_RC4_128_SHA: Self = Self(0x0005);
    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0x000A);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0035);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x003C);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA256: Self = Self(0x003D);

    pub const TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0x0016);
    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x0033);
    pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0039);
    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x0067);
    pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA256: Self = Self(0x006B);

    pub const TLS_PSK_WITH_RC4_128_SHA: Self = Self(0x008A);
    pub const TLS_PSK_WITH_3DES_EDE_CBC_SHA: Self = Self(0x008B);
    pub const TLS_PSK_WITH_AES_128_CBC_SHA: Self = Self(0x008C);
    pub const TLS_PSK_WITH_AES_256_CBC_SHA: Self = Self(0x008D);
    pub const TLS_PSK_WITH_AES_128_CBC_SHA256: Self = Self(0x00AE);
    pub const TLS_PSK_WITH_AES_256_CBC_SHA384: Self = Self(0x00AF);

    pub const TLS_DHE_PSK_WITH_RC4_128_SHA: Self = Self(0x008E);
    pub const TLS_DHE_PSK_WITH_3DES_EDE_CBC_SHA: Self = Self(0x008F);
    pub const TLS_DHE_PSK_WITH_AES_128_CBC_SHA: Self = Self(0x0090);
    pub const TLS_DHE_PSK_WITH_AES_256_CBC_SHA: Self = Self(0x0091);
    pub const TLS_DHE_PSK_WITH_AES_128_CBC_SHA256: Self = Self(0x00B2);
    pub const TLS_DHE_PSK_WITH_AES_256_CBC_SHA384: Self = Self(0x00B3);

    pub const TLS_ECDHE_ECDSA_WITH_RC4_128_SHA: Self = Self(0xC007);
    pub const TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0xC008);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA: Self = Self(0xC009);
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA: Self = Self(0xC00A);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256: Self = Self(0xC023);
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384: Self = Self(0xC024);

    pub const TLS_ECDHE_RSA_WITH_RC4_128_SHA: Self = Self(0xC011);
    pub const TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0xC012);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: Self = Self(0xC013);
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: Self = Self(0xC014);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0xC027);
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384: Self = Self(0xC028);

    pub const TLS_SRP_SHA_WITH_3DES_EDE_CBC_SHA: Self = Self(0xC01A);
    pub const TLS_SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0xC01B);
    pub const TLS_SRP_SHA_WITH_AES_128_CBC_SHA: Self = Self(0xC01D);
    pub const TLS_SRP_SHA_RSA_WITH_AES_128_CBC_SHA: Self = Self(0xC01E);
    pub const TLS_SRP_SHA_WITH_AES_256_CBC_SHA: Self = Self(0xC020);
    pub const TLS_SRP_SHA_RSA_WITH_AES_256_CBC_SHA: Self = Self(0xC021);

    pub const TLS_ECDHE_PSK_WITH_RC4_128_SHA: Self = Self(0xC033);
    pub const TLS_ECDHE_PSK_WITH_3DES_EDE_CBC_SHA: Self = Self(0xC034);
    pub const TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA: Self = Self(0xC035);
    pub const TLS_ECDHE_PSK_WITH_AES_256_CBC_SHA: Self = Self(0xC036);
    pub const TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256: Self = Self(0xC037);
    pub const TLS_ECDHE_PSK_WITH_AES_256_CBC_SHA384: Self = Self(0xC038);
}

macro_rules! suite {
    ($id:ident, $kex:ident, $sig:expr, $cipher:ident, $mac:ident) => {
        CipherSuiteInfo {
            suite: CipherSuite::$id,
            name: stringify!($id),
            kex: KexAlgo::$kex,
            sig: $sig,
            cipher: CipherAlgId::$cipher,
            mac: HashAlgId::$mac,
        }
    };
}

const RSA: Option<SigAlgo> = Some(SigAlgo::Rsa);
const ECDSA: Option<SigAlgo> = Some(SigAlgo::Ecdsa);
const ANON: Option<SigAlgo> = None;

static SUITES: &[CipherSuiteInfo] = &[
    suite!(TLS_RSA_WITH_RC4_128_MD5, Rsa, RSA, Rc4_128, Md5),
    suite!(TLS_RSA_WITH_RC4_128_SHA, Rsa, RSA, Rc4_128, Sha1),
    suite!(TLS_RSA_WITH_3DES_EDE_CBC_SHA, Rsa, RSA, TripleDes, Sha1),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, Rsa, RSA, Aes128, Sha1),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, Rsa, RSA, Aes256, Sha1),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA256, Rsa, RSA, Aes128, Sha256),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA256, Rsa, RSA, Aes256, Sha256),
    suite!(TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA, Dh, RSA, TripleDes, Sha1),
    suite!(TLS_DHE_RSA_WITH_AES_128_CBC_SHA, Dh, RSA, Aes128, Sha1),
    suite!(TLS_DHE_RSA_WITH_AES_256_CBC_SHA, Dh, RSA, Aes256, Sha1),
    suite!(TLS_DHE_RSA_WITH_AES_128_CBC_SHA256, Dh, RSA, Aes128, Sha256),
    suite!(TLS_DHE_RSA_WITH_AES_256_CBC_SHA256, Dh, RSA, Aes256, Sha256),
    suite!(TLS_PSK_WITH_RC4_128_SHA, Psk, ANON, Rc4_128, Sha1),
    suite!(TLS_PSK_WITH_3DES_EDE_CBC_SHA, Psk, ANON, TripleDes, Sha1),
    suite!(TLS_PSK_WITH_AES_128_CBC_SHA, Psk, ANON, Aes128, Sha1),
    suite!(TLS_PSK_WITH_AES_256_CBC_SHA, Psk, ANON, Aes256, Sha1),
    suite!(TLS_PSK_WITH_AES_128_CBC_SHA256, Psk, ANON, Aes128, Sha256),
    suite!(TLS_PSK_WITH_AES_256_CBC_SHA384, Psk, ANON, Aes256, Sha384),
    suite!(TLS_DHE_PSK_WITH_RC4_128_SHA, DhePsk, ANON, Rc4_128, Sha1),
    suite!(TLS_DHE_PSK_WITH_3DES_EDE_CBC_SHA, DhePsk, ANON, TripleDes, Sha1),
    suite!(TLS_DHE_PSK_WITH_AES_128_CBC_SHA, DhePsk, ANON, Aes128, Sha1),
    suite!(TLS_DHE_PSK_WITH_AES_256_CBC_SHA, DhePsk, ANON, Aes256, Sha1),
    suite!(TLS_DHE_PSK_WITH_AES_128_CBC_SHA256, DhePsk, ANON, Aes128, Sha256),
    suite!(TLS_DHE_PSK_WITH_AES_256_CBC_SHA384, DhePsk, ANON, Aes256, Sha384),
    suite!(TLS_ECDHE_ECDSA_WITH_RC4_128_SHA, Ecdh, ECDSA, Rc4_128, Sha1),
    suite!(TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA, Ecdh, ECDSA, TripleDes, Sha1),
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA, Ecdh, ECDSA, Aes128, Sha1),
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA, Ecdh, ECDSA, Aes256, Sha1),
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256, Ecdh, ECDSA, Aes128, Sha256),
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384, Ecdh, ECDSA, Aes256, Sha384),
    suite!(TLS_ECDHE_RSA_WITH_RC4_128_SHA, Ecdh, RSA, Rc4_128, Sha1),
    suite!(TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA, Ecdh, RSA, TripleDes, Sha1),
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA, Ecdh, RSA, Aes128, Sha1),
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA, Ecdh, RSA, Aes256, Sha1),
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256, Ecdh, RSA, Aes128, Sha256),
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384, Ecdh, RSA, Aes256, Sha384),
    suite!(TLS_SRP_SHA_WITH_3DES_EDE_CBC_SHA, SrpSha, ANON, TripleDes, Sha1),
    suite!(TLS_SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA, SrpSha, RSA, TripleDes, Sha1),
    suite!(TLS_SRP_SHA_WITH_AES_128_CBC_SHA, SrpSha, ANON, Aes128, Sha1),
    suite!(TLS_SRP_SHA_RSA_WITH_AES_128_CBC_SHA, SrpSha, RSA, Aes128, Sha1),
    suite!(TLS_SRP_SHA_WITH_AES_256_CBC_SHA, SrpSha, ANON, Aes256, Sha1),
    suite!(TLS_SRP_SHA_RSA_WITH_AES_256_CBC_SHA, SrpSha, RSA, Aes256, Sha1),
    suite!(TLS_ECDHE_PSK_WITH_RC4_128_SHA, EcdhePsk, ANON, Rc4_128, Sha1),
    suite!(TLS_ECDHE_PSK_WITH_3DES_EDE_CBC_SHA, EcdhePsk, ANON, TripleDes, Sha1),
    suite!(TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA, EcdhePsk, ANON, Aes128, Sha1),
    suite!(TLS_ECDHE_PSK_WITH_AES_256_CBC_SHA, EcdhePsk, ANON, Aes256, Sha1),
    suite!(TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256, EcdhePsk, ANON, Aes128, Sha256),
    suite!(TLS_ECDHE_PSK_WITH_AES_256_CBC_SHA384, EcdhePsk, ANON, Aes256, Sha384),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_rsa_aes128_sha() {
        let s = CipherSuiteInfo::by_id(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA).unwrap();
        assert_eq!(s.kex, KexAlgo::Rsa);
        assert_eq!(s.sig, Some(SigAlgo::Rsa));
        assert_eq!(s.cipher, CipherAlgId::Aes128);
        assert_eq!(s.mac, HashAlgId::Sha1);
        assert!(!s.is_ecc());
        assert_eq!(s.cipher_keylen(), 16);
        assert_eq!(s.cipher_ivlen(), 16);
        assert_eq!(s.mac_keylen(), 20);
        assert_eq!(s.name, "TLS_RSA_WITH_AES_128_CBC_SHA");
    }

    #[test]
    fn test_unknown_and_scsv_not_in_table() {
        assert!(CipherSuiteInfo::by_id(CipherSuite(0x1301)).is_none());
        assert!(CipherSuiteInfo::by_id(TLS_EMPTY_RENEGOTIATION_INFO_SCSV).is_none());
    }

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<u16> = CipherSuiteInfo::all().iter().map(|s| s.suite.0).collect();
        assert_eq!(ids.len(), CipherSuiteInfo::all().len());
    }

    #[test]
    fn test_ecc_flag() {
        let ecdsa =
            CipherSuiteInfo::by_id(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA).unwrap();
        assert!(ecdsa.is_ecc());
        let psk = CipherSuiteInfo::by_id(CipherSuite::TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA).unwrap();
        assert!(psk.is_ecc());
        assert!(psk.kex.is_psk());
        let dhe = CipherSuiteInfo::by_id(CipherSuite::TLS_DHE_RSA_WITH_AES_128_CBC_SHA).unwrap();
        assert!(!dhe.is_ecc());
    }

    #[test]
    fn test_tls12_only_suites() {
        let s = CipherSuiteInfo::by_id(CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384).unwrap();
        assert!(!s.usable_in(ProtocolVersion::TLS_V11));
        assert!(s.usable_in(ProtocolVersion::TLS_V12));
        assert_eq!(s.prf_hash(), HashAlgId::Sha384);
        let s = CipherSuiteInfo::by_id(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA).unwrap();
        assert!(s.usable_in(ProtocolVersion::SSL_V3));
        assert_eq!(s.prf_hash(), HashAlgId::Sha256);
    }

    #[test]
    fn test_mac_names() {
        let s = CipherSuiteInfo::by_id(CipherSuite::TLS_RSA_WITH_RC4_128_MD5).unwrap();
        assert_eq!(s.mac_name(ProtocolVersion::SSL_V3), "SSL3-MAC(MD5)");
        assert_eq!(s.mac_name(ProtocolVersion::TLS_V10), "HMAC(MD5)");
        assert_eq!(s.cipher_ivlen(), 0);
    }
}

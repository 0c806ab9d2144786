//! Negotiation policy with builder pattern.

use std::cmp::Ordering;

use bastion_types::{CipherAlgId, EccCurveId, HashAlgId, TlsError};

use crate::crypt::ciphersuite::{CipherSuiteInfo, KexAlgo, SigAlgo};
use crate::crypt::kex::DhGroup;
use crate::extensions::Extension;
use crate::record::NO_COMPRESSION;
use crate::{CipherSuite, ProtocolVersion};

/// Default lifetime of issued session tickets: one day.
pub const DEFAULT_SESSION_TICKET_LIFETIME: u32 = 24 * 60 * 60;

/// What a connection is willing to negotiate.
///
/// Every list is in preference order, most preferred first.
#[derive(Debug, Clone)]
pub struct Policy {
    min_version: ProtocolVersion,
    pref_version: ProtocolVersion,
    ciphers: Vec<CipherAlgId>,
    macs: Vec<HashAlgId>,
    key_exchange: Vec<KexAlgo>,
    signatures: Vec<SigAlgo>,
    signature_hashes: Vec<HashAlgId>,
    ecc_curves: Vec<EccCurveId>,
    compression: Vec<u8>,
    session_ticket_lifetime: u32,
    require_secure_renegotiation: bool,
    heartbeat: bool,
    max_fragment_length: Option<usize>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_version: ProtocolVersion::SSL_V3,
            pref_version: ProtocolVersion::TLS_V12,
            ciphers: vec![
                CipherAlgId::Aes256,
                CipherAlgId::Aes128,
                CipherAlgId::TripleDes,
                CipherAlgId::Rc4_128,
            ],
            macs: vec![
                HashAlgId::Sha384,
                HashAlgId::Sha256,
                HashAlgId::Sha1,
                HashAlgId::Md5,
            ],
            key_exchange: vec![
                KexAlgo::SrpSha,
                KexAlgo::EcdhePsk,
                KexAlgo::DhePsk,
                KexAlgo::Psk,
                KexAlgo::Ecdh,
                KexAlgo::Dh,
                KexAlgo::Rsa,
            ],
            signatures: vec![SigAlgo::Ecdsa, SigAlgo::Rsa],
            signature_hashes: vec![HashAlgId::Sha384, HashAlgId::Sha256, HashAlgId::Sha1],
            ecc_curves: vec![EccCurveId::X25519, EccCurveId::Secp256r1],
            compression: vec![NO_COMPRESSION],
            session_ticket_lifetime: DEFAULT_SESSION_TICKET_LIFETIME,
            require_secure_renegotiation: true,
            heartbeat: false,
            max_fragment_length: None,
        }
    }
}

impl Policy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder {
            policy: Policy::default(),
        }
    }

    /// Oldest version we accept from a peer.
    pub fn min_version(&self) -> ProtocolVersion {
        self.min_version
    }

    /// Version a client offers and the highest a server negotiates.
    pub fn pref_version(&self) -> ProtocolVersion {
        self.pref_version
    }

    pub fn allowed_ciphers(&self) -> &[CipherAlgId] {
        &self.ciphers
    }

    pub fn allowed_macs(&self) -> &[HashAlgId] {
        &self.macs
    }

    pub fn allowed_key_exchange_methods(&self) -> &[KexAlgo] {
        &self.key_exchange
    }

    pub fn allowed_signature_methods(&self) -> &[SigAlgo] {
        &self.signatures
    }

    /// Hashes offered for TLS 1.2 signatures.
    pub fn allowed_signature_hashes(&self) -> &[HashAlgId] {
        &self.signature_hashes
    }

    pub fn allowed_ecc_curves(&self) -> &[EccCurveId] {
        &self.ecc_curves
    }

    pub fn compression(&self) -> &[u8] {
        &self.compression
    }

    /// Ticket lifetime in seconds; 0 disables the age check.
    pub fn session_ticket_lifetime(&self) -> u32 {
        self.session_ticket_lifetime
    }

    pub fn require_secure_renegotiation(&self) -> bool {
        self.require_secure_renegotiation
    }

    pub fn negotiate_heartbeat_support(&self) -> bool {
        self.heartbeat
    }

    /// Fragment limit a client requests, if any.
    pub fn max_fragment_length(&self) -> Option<usize> {
        self.max_fragment_length
    }

    /// Group used for DHE, DHE_PSK and SRP.
    pub fn dh_group(&self) -> DhGroup {
        DhGroup::modp_2048()
    }

    /// Our most preferred curve among those the peer offered.
    pub fn choose_curve(&self, offered: &[EccCurveId]) -> Option<EccCurveId> {
        self.ecc_curves
            .iter()
            .copied()
            .find(|c| offered.contains(c))
    }

    /// Every known suite the policy allows, best first. SRP suites are
    /// only listed when `have_srp`.
    ///
    /// Suites are ranked by key exchange, then cipher, then signature, then
    /// MAC, each by its position in the policy list.
    pub fn ciphersuite_list(&self, have_srp: bool) -> Vec<CipherSuite> {
        let mut suites: Vec<&CipherSuiteInfo> = CipherSuiteInfo::all()
            .iter()
            .filter(|s| have_srp || s.kex != KexAlgo::SrpSha)
            .filter(|s| self.key_exchange.contains(&s.kex))
            .filter(|s| s.sig.map_or(true, |sig| self.signatures.contains(&sig)))
            .filter(|s| self.ciphers.contains(&s.cipher))
            .filter(|s| self.macs.contains(&s.mac))
            .collect();
        suites.sort_by(|a, b| self.compare_suites(a, b));
        suites.into_iter().map(|s| s.suite).collect()
    }

    fn compare_suites(&self, a: &CipherSuiteInfo, b: &CipherSuiteInfo) -> Ordering {
        fn rank<T: PartialEq>(list: &[T], v: &T) -> usize {
            list.iter().position(|x| x == v).unwrap_or(usize::MAX)
        }
        // Anonymous suites rank after every signed one.
        let sig_rank = |s: &CipherSuiteInfo| match s.sig {
            Some(sig) => rank(&self.signatures, &sig),
            None => self.signatures.len(),
        };
        rank(&self.key_exchange, &a.kex)
            .cmp(&rank(&self.key_exchange, &b.kex))
            .then_with(|| rank(&self.ciphers, &a.cipher).cmp(&rank(&self.ciphers, &b.cipher)))
            .then_with(|| sig_rank(a).cmp(&sig_rank(b)))
            .then_with(|| rank(&self.macs, &a.mac).cmp(&rank(&self.macs, &b.mac)))
    }
}

/// Builder for [`Policy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    pub fn min_version(mut self, version: ProtocolVersion) -> Self {
        self.policy.min_version = version;
        self
    }

    pub fn pref_version(mut self, version: ProtocolVersion) -> Self {
        self.policy.pref_version = version;
        self
    }

    pub fn ciphers(mut self, ciphers: &[CipherAlgId]) -> Self {
        self.policy.ciphers = ciphers.to_vec();
        self
    }

    pub fn macs(mut self, macs: &[HashAlgId]) -> Self {
        self.policy.macs = macs.to_vec();
        self
    }

    pub fn key_exchange_methods(mut self, kex: &[KexAlgo]) -> Self {
        self.policy.key_exchange = kex.to_vec();
        self
    }

    pub fn signature_methods(mut self, sigs: &[SigAlgo]) -> Self {
        self.policy.signatures = sigs.to_vec();
        self
    }

    pub fn signature_hashes(mut self, hashes: &[HashAlgId]) -> Self {
        self.policy.signature_hashes = hashes.to_vec();
        self
    }

    pub fn ecc_curves(mut self, curves: &[EccCurveId]) -> Self {
        self.policy.ecc_curves = curves.to_vec();
        self
    }

    pub fn compression(mut self, methods: &[u8]) -> Self {
        self.policy.compression = methods.to_vec();
        self
    }

    pub fn session_ticket_lifetime(mut self, secs: u32) -> Self {
        self.policy.session_ticket_lifetime = secs;
        self
    }

    pub fn require_secure_renegotiation(mut self, required: bool) -> Self {
        self.policy.require_secure_renegotiation = required;
        self
    }

    pub fn heartbeat(mut self, enabled: bool) -> Self {
        self.policy.heartbeat = enabled;
        self
    }

    pub fn max_fragment_length(mut self, size: Option<usize>) -> Self {
        self.policy.max_fragment_length = size;
        self
    }

    /// Validate and produce the policy.
    pub fn build(self) -> Result<Policy, TlsError> {
        let p = self.policy;
        if !p.min_version.is_known() || !p.pref_version.is_known() {
            return Err(TlsError::Config("unsupported protocol version".into()));
        }
        if p.min_version > p.pref_version {
            return Err(TlsError::Config(format!(
                "minimum version {} above preferred {}",
                p.min_version, p.pref_version
            )));
        }
        if p.ciphers.is_empty() || p.macs.is_empty() || p.key_exchange.is_empty() {
            return Err(TlsError::Config("empty algorithm list".into()));
        }
        if p.signature_hashes.is_empty() {
            return Err(TlsError::Config("empty signature hash list".into()));
        }
        if !p.compression.contains(&NO_COMPRESSION) {
            return Err(TlsError::Config(
                "null compression must be allowed".into(),
            ));
        }
        if let Some(size) = p.max_fragment_length {
            Extension::max_fragment_code(size)?;
        }
        Ok(p)
    }
}

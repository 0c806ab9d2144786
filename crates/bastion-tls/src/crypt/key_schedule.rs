//! Master secret and key block derivation (RFC 5246 §6.3, §8.1) and the
//! Finished verify_data computation.

use bastion_types::TlsError;
use zeroize::Zeroize;

use super::ciphersuite::CipherSuiteInfo;
use super::prf::Prf;
use super::transcript::{TranscriptHash, SSL3_CLIENT_SENDER, SSL3_SERVER_SENDER};
use crate::{ProtocolVersion, TlsRole};

/// Length of the master secret in every supported version.
pub const MASTER_SECRET_LEN: usize = 48;
/// Length of TLS Finished verify_data.
pub const VERIFY_DATA_LEN: usize = 12;

/// Master secret plus the per-direction MAC keys, cipher keys and IVs.
///
/// Key block layout:
/// ```text
/// client_write_MAC_key || server_write_MAC_key ||
/// client_write_key     || server_write_key     ||
/// client_write_IV      || server_write_IV
/// ```
pub struct SessionKeys {
    master_secret: Vec<u8>,
    client_mac_key: Vec<u8>,
    server_mac_key: Vec<u8>,
    client_cipher_key: Vec<u8>,
    server_cipher_key: Vec<u8>,
    client_iv: Vec<u8>,
    server_iv: Vec<u8>,
}

impl SessionKeys {
    /// Derive the key material for a handshake.
    ///
    /// When `resuming`, `secret` is the saved master secret; otherwise it
    /// is the pre-master secret and the master secret is derived first:
    /// ```text
    /// master_secret = PRF(pre_master_secret, "master secret",
    ///                     ClientHello.random + ServerHello.random)[0..47]
    /// key_block     = PRF(master_secret, "key expansion",
    ///                     ServerHello.random + ClientHello.random)
    /// ```
    pub fn derive(
        version: ProtocolVersion,
        suite: &CipherSuiteInfo,
        secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        resuming: bool,
    ) -> Result<Self, TlsError> {
        let prf = Prf::for_version(version, suite);

        let master_secret = if resuming {
            if secret.len() != MASTER_SECRET_LEN {
                return Err(TlsError::InternalError(
                    "resumed master secret has wrong length".into(),
                ));
            }
            secret.to_vec()
        } else {
            let mut seed = Vec::with_capacity(64);
            seed.extend_from_slice(client_random);
            seed.extend_from_slice(server_random);
            prf.derive(secret, "master secret", &seed, MASTER_SECRET_LEN)?
        };

        // Note: key expansion seed is server_random + client_random (reversed from master_secret)
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);

        let mac_len = suite.mac_keylen();
        let key_len = suite.cipher_keylen();
        let iv_len = suite.cipher_ivlen();
        let total_len = 2 * (mac_len + key_len + iv_len);
        let mut key_block = prf.derive(&master_secret, "key expansion", &seed, total_len)?;

        let mut offset = 0;
        let mut take = |n: usize| {
            let part = key_block[offset..offset + n].to_vec();
            offset += n;
            part
        };
        let client_mac_key = take(mac_len);
        let server_mac_key = take(mac_len);
        let client_cipher_key = take(key_len);
        let server_cipher_key = take(key_len);
        let client_iv = take(iv_len);
        let server_iv = take(iv_len);
        key_block.zeroize();

        Ok(Self {
            master_secret,
            client_mac_key,
            server_mac_key,
            client_cipher_key,
            server_cipher_key,
            client_iv,
            server_iv,
        })
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    /// MAC key used by records written by `side`.
    pub fn mac_key(&self, side: TlsRole) -> &[u8] {
        match side {
            TlsRole::Client => &self.client_mac_key,
            TlsRole::Server => &self.server_mac_key,
        }
    }

    /// Cipher key used by records written by `side`.
    pub fn cipher_key(&self, side: TlsRole) -> &[u8] {
        match side {
            TlsRole::Client => &self.client_cipher_key,
            TlsRole::Server => &self.server_cipher_key,
        }
    }

    /// Initial CBC IV used by records written by `side`.
    pub fn iv(&self, side: TlsRole) -> &[u8] {
        match side {
            TlsRole::Client => &self.client_iv,
            TlsRole::Server => &self.server_iv,
        }
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.master_secret.zeroize();
        self.client_mac_key.zeroize();
        self.server_mac_key.zeroize();
        self.client_cipher_key.zeroize();
        self.server_cipher_key.zeroize();
        self.client_iv.zeroize();
        self.server_iv.zeroize();
    }
}

/// Compute the Finished verify_data sent by `sender`.
///
/// TLS (RFC 5246 §7.4.9):
/// ```text
/// verify_data = PRF(master_secret, finished_label,
///                   Hash(handshake_messages))[0..11]
/// ```
/// SSLv3 uses the 36-byte MD5 || SHA-1 construction with the
/// "CLNT"/"SRVR" sender labels.
pub fn compute_verify_data(
    version: ProtocolVersion,
    suite: &CipherSuiteInfo,
    master_secret: &[u8],
    sender: TlsRole,
    transcript: &TranscriptHash,
) -> Result<Vec<u8>, TlsError> {
    if version == ProtocolVersion::SSL_V3 {
        let label = match sender {
            TlsRole::Client => SSL3_CLIENT_SENDER,
            TlsRole::Server => SSL3_SERVER_SENDER,
        };
        return transcript.final_ssl3(master_secret, label);
    }

    let label = match sender {
        TlsRole::Client => "client finished",
        TlsRole::Server => "server finished",
    };
    let prf = Prf::for_version(version, suite);
    let handshake_hash = transcript.final_hash(version, suite.prf_hash());
    prf.derive(master_secret, label, &handshake_hash, VERIFY_DATA_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CipherSuite;

    fn suite(id: CipherSuite) -> &'static CipherSuiteInfo {
        CipherSuiteInfo::by_id(id).unwrap()
    }

    #[test]
    fn test_key_block_partition_lengths() {
        let s = suite(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA);
        let keys = SessionKeys::derive(
            ProtocolVersion::TLS_V10,
            s,
            &[3u8; 48],
            &[1u8; 32],
            &[2u8; 32],
            false,
        )
        .unwrap();
        assert_eq!(keys.master_secret().len(), 48);
        assert_eq!(keys.mac_key(TlsRole::Client).len(), 20);
        assert_eq!(keys.cipher_key(TlsRole::Server).len(), 16);
        assert_eq!(keys.iv(TlsRole::Client).len(), 16);
        assert_ne!(keys.cipher_key(TlsRole::Client), keys.cipher_key(TlsRole::Server));
    }

    #[test]
    fn test_rc4_has_no_iv() {
        let s = suite(CipherSuite::TLS_RSA_WITH_RC4_128_SHA);
        let keys = SessionKeys::derive(
            ProtocolVersion::SSL_V3,
            s,
            &[3u8; 48],
            &[1u8; 32],
            &[2u8; 32],
            false,
        )
        .unwrap();
        assert!(keys.iv(TlsRole::Client).is_empty());
    }

    #[test]
    fn test_resumption_reuses_master_secret() {
        let s = suite(CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA256);
        let fresh = SessionKeys::derive(
            ProtocolVersion::TLS_V12,
            s,
            &[9u8; 48],
            &[1u8; 32],
            &[2u8; 32],
            false,
        )
        .unwrap();
        let resumed = SessionKeys::derive(
            ProtocolVersion::TLS_V12,
            s,
            fresh.master_secret(),
            &[1u8; 32],
            &[2u8; 32],
            true,
        )
        .unwrap();
        assert_eq!(fresh.master_secret(), resumed.master_secret());
        assert_eq!(fresh.cipher_key(TlsRole::Client), resumed.cipher_key(TlsRole::Client));
        assert!(SessionKeys::derive(
            ProtocolVersion::TLS_V12,
            s,
            &[0u8; 10],
            &[1u8; 32],
            &[2u8; 32],
            true
        )
        .is_err());
    }

    #[test]
    fn test_verify_data_lengths_and_sides() {
        let s = suite(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA);
        let mut th = TranscriptHash::new();
        th.update(1, b"client hello");
        let master = [5u8; 48];
        for v in [ProtocolVersion::TLS_V10, ProtocolVersion::TLS_V12] {
            let c = compute_verify_data(v, s, &master, TlsRole::Client, &th).unwrap();
            let srv = compute_verify_data(v, s, &master, TlsRole::Server, &th).unwrap();
            assert_eq!(c.len(), VERIFY_DATA_LEN);
            assert_ne!(c, srv);
        }
        let ssl3 =
            compute_verify_data(ProtocolVersion::SSL_V3, s, &master, TlsRole::Client, &th).unwrap();
        assert_eq!(ssl3.len(), 36);
    }
}

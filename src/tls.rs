//! TLS termination: certificate material, handshake policy and peer
//! identity.
//!
//! A [`TlsContext`] collects certificate chain, private key, optional
//! client-auth CA bundle and protocol policy, then bakes them into a
//! `tokio_rustls::TlsAcceptor` at server start. Only TLS 1.2 and 1.3 with
//! the default AEAD suites are offered; the non-blocking handshake and
//! record I/O are driven by awaiting the acceptor and stream futures.
//! Early data (0-RTT) stays disabled.

use crate::errors::Error;
use sha1::{Digest, Sha1};
use std::{fs::File, io::BufReader, sync::Arc};
use tokio_rustls::rustls::{
    self,
    server::{
        AllowAnyAnonymousOrAuthenticatedClient, AllowAnyAuthenticatedClient,
        ServerSessionMemoryCache,
    },
    Certificate, PrivateKey, RootCertStore, SupportedCipherSuite,
};
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientAuth {
    Off,
    Optional,
    Required,
}

/// TLS configuration for one server instance.
///
/// Immutable once the server starts; the built acceptor is shared by all
/// connections.
pub struct TlsContext {
    cert_chain: Vec<Certificate>,
    private_key: Option<PrivateKey>,
    client_roots: Option<RootCertStore>,
    client_auth: ClientAuth,
    cipher_suites: Option<Vec<SupportedCipherSuite>>,
    session_tickets: bool,
    session_cache_size: usize,
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsContext {
    pub fn new() -> Self {
        TlsContext {
            cert_chain: Vec::new(),
            private_key: None,
            client_roots: None,
            client_auth: ClientAuth::Off,
            cipher_suites: None,
            session_tickets: true,
            session_cache_size: 256,
        }
    }

    /// Loads the server certificate chain from a PEM file.
    pub fn load_cert_chain(&mut self, path: &str) -> Result<&mut Self, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .map_err(|e| Error::TlsConfig(format!("{path}: {e}")))?;
        if certs.is_empty() {
            return Err(Error::TlsConfig(format!(
                "{path}: no certificates in PEM file"
            )));
        }
        self.cert_chain = certs.into_iter().map(Certificate).collect();
        Ok(self)
    }

    /// Loads the server private key (PKCS#8, RSA or EC) from a PEM file.
    pub fn load_private_key(&mut self, path: &str) -> Result<&mut Self, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        loop {
            match rustls_pemfile::read_one(&mut reader)
                .map_err(|e| Error::TlsConfig(format!("{path}: {e}")))?
            {
                Some(rustls_pemfile::Item::PKCS8Key(der))
                | Some(rustls_pemfile::Item::RSAKey(der))
                | Some(rustls_pemfile::Item::ECKey(der)) => {
                    self.private_key = Some(PrivateKey(der));
                    return Ok(self);
                }
                Some(_) => continue,
                None => {
                    return Err(Error::TlsConfig(format!("{path}: no private key in PEM file")))
                }
            }
        }
    }

    /// Loads a CA bundle used to verify client certificates.
    pub fn load_ca_file(&mut self, path: &str) -> Result<&mut Self, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .map_err(|e| Error::TlsConfig(format!("{path}: {e}")))?;
        if certs.is_empty() {
            return Err(Error::TlsConfig(format!("{path}: no CA certificates")));
        }

        let mut roots = RootCertStore::empty();
        for der in certs {
            roots
                .add(&Certificate(der))
                .map_err(|e| Error::TlsConfig(format!("{path}: {e}")))?;
        }
        self.client_roots = Some(roots);
        Ok(self)
    }

    /// Requests client certificates. With `required = false` a client
    /// without a certificate is still admitted; with `required = true` the
    /// handshake fails instead. Needs a CA bundle from
    /// [`TlsContext::load_ca_file`].
    pub fn enable_client_auth(&mut self, required: bool) -> &mut Self {
        self.client_auth = match required {
            true => ClientAuth::Required,
            false => ClientAuth::Optional,
        };
        self
    }

    /// Restricts the offered cipher suites to the named ones, e.g.
    /// `TLS13_AES_256_GCM_SHA384`. Unknown names are rejected.
    pub fn set_cipher_suites(&mut self, names: &[&str]) -> Result<&mut Self, Error> {
        let mut suites = Vec::with_capacity(names.len());
        for name in names {
            let found = rustls::ALL_CIPHER_SUITES
                .iter()
                .find(|suite| format!("{:?}", suite.suite()) == *name)
                .copied()
                .ok_or_else(|| Error::TlsConfig(format!("unknown cipher suite {name}")))?;
            suites.push(found);
        }
        if suites.is_empty() {
            return Err(Error::TlsConfig("empty cipher suite list".into()));
        }
        self.cipher_suites = Some(suites);
        Ok(self)
    }

    /// Toggles stateless session resumption tickets (on by default). The
    /// ticket key rotates automatically inside rustls' ticketer.
    pub fn enable_session_tickets(&mut self, enabled: bool) -> &mut Self {
        self.session_tickets = enabled;
        self
    }

    /// Bounds the server-side session-id resumption cache.
    pub fn set_session_cache_size(&mut self, size: usize) -> &mut Self {
        self.session_cache_size = size.max(1);
        self
    }

    /// Builds the acceptor, verifying that the private key matches the leaf
    /// certificate. Fatal configuration errors surface here, at server
    /// start.
    pub(crate) fn build_acceptor(&self) -> Result<TlsAcceptor, Error> {
        if self.cert_chain.is_empty() {
            return Err(Error::TlsConfig("no certificate chain loaded".into()));
        }
        let key = self
            .private_key
            .clone()
            .ok_or_else(|| Error::TlsConfig("no private key loaded".into()))?;

        let suites = self
            .cipher_suites
            .clone()
            .unwrap_or_else(|| rustls::DEFAULT_CIPHER_SUITES.to_vec());

        let builder = rustls::ServerConfig::builder()
            .with_cipher_suites(&suites)
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| Error::TlsConfig(e.to_string()))?;

        let builder = match self.client_auth {
            ClientAuth::Off => builder.with_no_client_auth(),
            ClientAuth::Optional | ClientAuth::Required => {
                let roots = self.client_roots.clone().ok_or_else(|| {
                    Error::TlsConfig("client auth enabled without a CA bundle".into())
                })?;
                match self.client_auth {
                    ClientAuth::Required => builder
                        .with_client_cert_verifier(AllowAnyAuthenticatedClient::new(roots).boxed()),
                    _ => builder.with_client_cert_verifier(
                        AllowAnyAnonymousOrAuthenticatedClient::new(roots).boxed(),
                    ),
                }
            }
        };

        let mut config = builder
            .with_single_cert(self.cert_chain.clone(), key)
            .map_err(|e| Error::TlsConfig(format!("certificate/key mismatch: {e}")))?;

        if self.session_tickets {
            config.ticketer =
                rustls::Ticketer::new().map_err(|e| Error::TlsConfig(e.to_string()))?;
        }
        config.session_storage = ServerSessionMemoryCache::new(self.session_cache_size);

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("certs", &self.cert_chain.len())
            .field("has_key", &self.private_key.is_some())
            .field("client_auth", &self.client_auth)
            .field("session_tickets", &self.session_tickets)
            .finish()
    }
}

/// Leaf certificate presented by a TLS client, as raw DER.
///
/// Chain validation, signature checks and the notBefore/notAfter window are
/// enforced by the verifier during the handshake; this value identifies the
/// already-verified peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    der: Vec<u8>,
}

impl PeerIdentity {
    pub(crate) fn from_connection(conn: &rustls::ServerConnection) -> Option<Self> {
        conn.peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| PeerIdentity { der: cert.0.clone() })
    }

    /// DER-encoded certificate bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Printable SHA-1 fingerprint, colon-separated uppercase hex.
    pub fn fingerprint(&self) -> String {
        let digest = Sha1::digest(&self.der);
        let mut out = String::with_capacity(digest.len() * 3);
        for (i, byte) in digest.iter().enumerate() {
            if i > 0 {
                out.push(':');
            }
            out.push_str(&format!("{byte:02X}"));
        }
        out
    }
}

/// Matches a certificate name pattern against a hostname: exact match, or a
/// single `*.` wildcard covering exactly one leading DNS label. ASCII
/// case-insensitive, as DNS names are.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    if pattern.is_empty() || host.is_empty() {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        let Some(first_dot) = host.find('.') else {
            return false;
        };
        let host_suffix = &host[first_dot + 1..];
        !host[..first_dot].is_empty() && host_suffix.eq_ignore_ascii_case(suffix)
    } else {
        pattern.eq_ignore_ascii_case(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hostname_matching() {
        #[rustfmt::skip]
        let cases = [
            ("example.com",       "example.com",        true),
            ("Example.COM",       "example.com",        true),
            ("example.com",       "example.org",        false),
            ("*.example.com",     "api.example.com",    true),
            ("*.example.com",     "API.EXAMPLE.COM",    true),
            ("*.example.com",     "example.com",        false),
            ("*.example.com",     "a.b.example.com",    false),
            ("*.example.com",     ".example.com",       false),
            ("*.example.com",     "apiexample.com",     false),
            ("",                  "example.com",        false),
            ("example.com",       "",                   false),
        ];

        for (pattern, host, expected) in cases {
            assert_eq!(hostname_matches(pattern, host), expected, "{pattern} vs {host}");
        }
    }

    #[test]
    fn cipher_suite_selection_by_name() {
        let mut ctx = TlsContext::new();
        ctx.set_cipher_suites(&["TLS13_AES_256_GCM_SHA384", "TLS13_AES_128_GCM_SHA256"])
            .unwrap();
        assert_eq!(ctx.cipher_suites.as_ref().unwrap().len(), 2);

        assert!(TlsContext::new()
            .set_cipher_suites(&["TLS_RSA_WITH_RC4_128_MD5"])
            .is_err());
        assert!(TlsContext::new().set_cipher_suites(&[]).is_err());
    }

    #[test]
    fn acceptor_requires_cert_and_key() {
        assert!(matches!(
            TlsContext::new().build_acceptor(),
            Err(Error::TlsConfig(_))
        ));
    }

    #[test]
    fn client_auth_requires_ca_bundle() {
        // A chain/key pair is checked later; the missing CA bundle must
        // already fail with a config error.
        let mut ctx = TlsContext::new();
        ctx.cert_chain = vec![Certificate(vec![0u8; 8])];
        ctx.private_key = Some(PrivateKey(vec![0u8; 8]));
        ctx.enable_client_auth(true);

        match ctx.build_acceptor() {
            Err(Error::TlsConfig(msg)) => assert!(msg.contains("CA bundle")),
            Err(other) => panic!("expected TlsConfig error, got {other:?}"),
            Ok(_) => panic!("expected TlsConfig error, got Ok"),
        }
    }

    #[test]
    fn pem_files_without_material_are_rejected() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "# not a pem file").unwrap();
        let path = empty.path().to_str().unwrap();

        assert!(matches!(
            TlsContext::new().load_cert_chain(path),
            Err(Error::TlsConfig(_))
        ));
        assert!(matches!(
            TlsContext::new().load_private_key(path),
            Err(Error::TlsConfig(_))
        ));
        assert!(matches!(
            TlsContext::new().load_ca_file(path),
            Err(Error::TlsConfig(_))
        ));

        assert!(matches!(
            TlsContext::new().load_cert_chain("/nonexistent/cert.pem"),
            Err(Error::Network(_))
        ));
    }

    #[test]
    fn mismatched_key_fails_at_build() {
        let mut ctx = TlsContext::new();
        ctx.cert_chain = vec![Certificate(vec![0u8; 16])];
        ctx.private_key = Some(PrivateKey(vec![0u8; 16]));

        match ctx.build_acceptor() {
            Err(Error::TlsConfig(msg)) => assert!(msg.contains("mismatch")),
            Err(other) => panic!("expected TlsConfig error, got {other:?}"),
            Ok(_) => panic!("expected TlsConfig error, got Ok"),
        }
    }

    #[test]
    fn fingerprint_is_printable_hex() {
        let identity = PeerIdentity { der: b"certificate".to_vec() };
        let fp = identity.fingerprint();
        assert_eq!(fp.split(':').count(), 20);
        assert!(fp
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':'));
        assert!(!fp.contains(char::is_lowercase));
    }
}

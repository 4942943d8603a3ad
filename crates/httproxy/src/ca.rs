//! On-the-fly leaf certificate minting for TLS interception (spec's
//! "Certificate authority" section). A single long-lived CA keypair signs
//! a fresh leaf per intercepted host the first time it's seen, then caches
//! it for the life of the process — mirrors the one-CA/many-leaves split
//! in hudsucker's `RcgenAuthority` (`epli2-phantom`'s `generate_ca`) without
//! depending on hudsucker itself.

use std::collections::HashMap;
use std::sync::Mutex;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::{ProxyError, Result};

/// A leaf certificate and its private key, ready to be handed to
/// `rustls::ServerConfig`.
#[derive(Clone)]
pub struct CertifiedLeaf {
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivatePkcs8KeyDer<'static>,
}

impl CertifiedLeaf {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key_der.clone_key())
    }
}

/// Mints leaf certificates for a given host, signed by whatever CA the
/// implementation holds. Kept as a trait so tests and alternative
/// deployments (a pre-provisioned CA loaded from disk) can swap in a
/// fake without touching the TLS layer.
pub trait CertificateAuthority: Send + Sync {
    fn mint(&self, host: &str, sans: &[String]) -> Result<CertifiedLeaf>;
    fn ca_cert_der(&self) -> CertificateDer<'static>;
}

/// Default implementation: an in-memory self-signed root, generated once
/// at startup, that signs leaves on demand.
pub struct RcgenAuthority {
    ca_key: KeyPair,
    ca_cert_der: CertificateDer<'static>,
    ca_params: CertificateParams,
    cache: Mutex<HashMap<String, CertifiedLeaf>>,
}

impl RcgenAuthority {
    pub fn generate(common_name: &str) -> Result<Self> {
        let key_pair = KeyPair::generate().map_err(|e| ProxyError::Tls(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "httproxy MITM CA");

        let ca_cert = params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| ProxyError::Tls(e.to_string()))?;

        Ok(Self {
            ca_key: key_pair,
            ca_cert_der: ca_cert.der().clone(),
            ca_params: params,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn sign_leaf(&self, host: &str, sans: &[String]) -> Result<CertifiedLeaf> {
        let mut names = vec![host.to_string()];
        names.extend(sans.iter().cloned());
        names.dedup();

        let mut params = CertificateParams::new(names).map_err(|e| ProxyError::Tls(e.to_string()))?;
        params
            .distinguished_name
            .push(DnType::CommonName, host);

        let leaf_key = KeyPair::generate().map_err(|e| ProxyError::Tls(e.to_string()))?;
        let issuer = Issuer::new(self.ca_params.clone(), &self.ca_key);
        let leaf_cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| ProxyError::Tls(e.to_string()))?;

        Ok(CertifiedLeaf {
            cert_der: leaf_cert.der().clone(),
            key_der: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        })
    }
}

impl CertificateAuthority for RcgenAuthority {
    fn mint(&self, host: &str, sans: &[String]) -> Result<CertifiedLeaf> {
        if let Some(leaf) = self.cache.lock().unwrap().get(host) {
            return Ok(leaf.clone());
        }
        let leaf = self.sign_leaf(host, sans)?;
        self.cache.lock().unwrap().insert(host.to_string(), leaf.clone());
        Ok(leaf)
    }

    fn ca_cert_der(&self) -> CertificateDer<'static> {
        self.ca_cert_der.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_and_caches_a_leaf_per_host() {
        let ca = RcgenAuthority::generate("test CA").unwrap();
        let a = ca.mint("example.com", &[]).unwrap();
        let b = ca.mint("example.com", &[]).unwrap();
        assert_eq!(a.cert_der, b.cert_der);
    }

    #[test]
    fn different_hosts_get_different_leaves() {
        let ca = RcgenAuthority::generate("test CA").unwrap();
        let a = ca.mint("a.example.com", &[]).unwrap();
        let b = ca.mint("b.example.com", &[]).unwrap();
        assert_ne!(a.cert_der, b.cert_der);
    }
}

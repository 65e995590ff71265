//! Root CA used by hudsucker to mint per-host certificates.
//!
//! Only persistence lives here: the CA is generated once, stored as PEM
//! files, and loaded into an [`RcgenAuthority`] on every start.

use std::fs;
use std::path::{Path, PathBuf};

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

pub use crate::error::CaManagerError;

const CA_CERT_FILENAME: &str = "flowgate-ca.crt";
const CA_KEY_FILENAME: &str = "flowgate-ca.key";
const CA_COMMON_NAME: &str = "Flowgate Root CA";

/// Number of leaf certificates hudsucker keeps cached.
const LEAF_CACHE_SIZE: u64 = 1000;

/// Manages the root CA certificate for the MITM proxy.
#[derive(Debug, Clone)]
pub struct CaManager {
    ca_dir: PathBuf,
}

impl CaManager {
    /// Creates a new CA manager with the given directory.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
        }
    }

    /// Creates a CA manager under the platform data directory.
    pub fn with_default_dir() -> Result<Self, CaManagerError> {
        let project_dirs = directories::ProjectDirs::from("com", "flowgate", "Flowgate")
            .ok_or_else(|| CaManagerError::Generation("Failed to get project dirs".into()))?;

        Ok(Self::new(project_dirs.data_dir().join("ca")))
    }

    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Loads the CA, generating it first if it is missing.
    pub fn ensure_ca(&self) -> Result<RcgenAuthority, CaManagerError> {
        if !self.ca_exists() {
            self.generate_ca()?;
        }
        self.load_authority()
    }

    /// Generates a new root CA certificate and key.
    pub fn generate_ca(&self) -> Result<(), CaManagerError> {
        fs::create_dir_all(&self.ca_dir)?;

        let key_pair =
            KeyPair::generate().map_err(|e| CaManagerError::Generation(e.to_string()))?;
        let cert = ca_params()?
            .self_signed(&key_pair)
            .map_err(|e| CaManagerError::Generation(e.to_string()))?;

        fs::write(self.cert_path(), cert.pem()).map_err(|e| CaManagerError::Write(e.to_string()))?;
        fs::write(self.key_path(), key_pair.serialize_pem())
            .map_err(|e| CaManagerError::Write(e.to_string()))?;

        tracing::info!("Generated new CA certificate at {:?}", self.cert_path());
        Ok(())
    }

    /// Loads the stored CA as a hudsucker authority.
    pub fn load_authority(&self) -> Result<RcgenAuthority, CaManagerError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let key_pem = fs::read_to_string(self.key_path())?;

        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaManagerError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaManagerError::Parse(e.to_string()))?;

        Ok(RcgenAuthority::new(issuer, LEAF_CACHE_SIZE, default_provider()))
    }

    /// Reads the stored certificate PEM, for installing into trust stores.
    pub fn read_cert_pem(&self) -> Result<String, CaManagerError> {
        Ok(fs::read_to_string(self.cert_path())?)
    }
}

fn ca_params() -> Result<CertificateParams, CaManagerError> {
    let mut params = CertificateParams::new(vec![CA_COMMON_NAME.to_string()])
        .map_err(|e| CaManagerError::Generation(e.to_string()))?;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    Ok(params)
}

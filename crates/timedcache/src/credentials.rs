//! Caching of constructed credential objects.
//!
//! Building a credential (an OAuth client, a certificate-based token source, ...) is expensive
//! and the result can be reused for as long as the process lives. [`CredentialCache`] keeps one
//! instance per distinct combination of authentication parameters, as identified by a
//! [`CredentialKey`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// The kind of credential a [`CredentialKey`] refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CredentialType {
    ClientSecret,
    ClientCertificate,
    ManagedIdentity,
    WorkloadIdentity,
}

impl CredentialType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecret => "client-secret",
            Self::ClientCertificate => "client-certificate",
            Self::ManagedIdentity => "managed-identity",
            Self::WorkloadIdentity => "workload-identity",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a credential by all the parameters that went into constructing it.
///
/// Two keys are equal if their metadata is equal. Secret material only contributes its SHA-256
/// digest to the metadata, so neither [`Debug`] nor [`Display`] output can leak it.
#[derive(Clone, Eq)]
pub struct CredentialKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl CredentialKey {
    pub fn builder(authority_host: &str, credential_type: CredentialType) -> CredentialKeyBuilder {
        let mut builder = CredentialKeyBuilder {
            metadata: String::new(),
        };
        builder.push_line("authority", authority_host);
        builder.push_line("type", credential_type.as_str());
        builder
    }

    /// Returns the human-readable metadata that forms the basis of the [`CredentialKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// A hex representation of the key hash, suitable for logs.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl PartialEq for CredentialKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CredentialKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash_hex()[..16])
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialKey")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A builder for [`CredentialKey`]s.
///
/// Parameters are appended in the order they are given, so callers must add them in a stable
/// order for equal credentials to produce equal keys. Values are quoted and escaped, one
/// parameter per line.
pub struct CredentialKeyBuilder {
    metadata: String,
}

impl CredentialKeyBuilder {
    pub fn tenant_id(mut self, tenant_id: &str) -> Self {
        self.push_line("tenant", tenant_id);
        self
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.push_line("client", client_id);
        self
    }

    /// Adds secret material such as a client secret or certificate bytes.
    ///
    /// Only the digest of `secret` is kept.
    pub fn secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(secret.as_ref());
        self.push_line("secret", &hex::encode(digest));
        self
    }

    fn push_line(&mut self, field: &str, value: &str) {
        self.metadata.push_str(&format!("{field}: {value:?}\n"));
    }

    /// Finalize the [`CredentialKey`].
    pub fn build(self) -> CredentialKey {
        let mut hash = [0; 32];
        hash.copy_from_slice(&Sha256::digest(&self.metadata));

        CredentialKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

/// Keeps one constructed credential per [`CredentialKey`] for the lifetime of the cache.
///
/// Entries never expire. Construction runs while the cache lock is held, so concurrent callers
/// asking for the same key construct the credential only once. Constructors are expected to be
/// synchronous and quick, they do not perform network calls themselves.
pub struct CredentialCache<C> {
    entries: Mutex<HashMap<CredentialKey, Arc<C>>>,
}

impl<C> Default for CredentialCache<C> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

impl<C> fmt::Debug for CredentialCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl<C> CredentialCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the credential for `key`, constructing it with `make` if there is none yet.
    ///
    /// If `make` fails, nothing is stored and the error is returned as is.
    pub fn get_or_store<E>(
        &self,
        key: &CredentialKey,
        make: impl FnOnce() -> Result<C, E>,
    ) -> Result<Arc<C>, E> {
        let mut entries = self.entries.lock();
        if let Some(credential) = entries.get(key) {
            tracing::trace!(%key, "Reusing cached credential");
            return Ok(Arc::clone(credential));
        }

        let credential = Arc::new(make()?);
        tracing::debug!(%key, "Storing new credential");
        entries.insert(key.clone(), Arc::clone(&credential));
        Ok(credential)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

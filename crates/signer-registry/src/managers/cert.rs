use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyconf_database::{CertEntity, CertRequestEntity};
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::error::{SignerError, SignerResult, StoreResult};
use crate::info::CertificateInfo;
use crate::lookup::find_key;
use crate::managers::storage_id;
use crate::model::{Cert, ClientId, KeyUsage};
use crate::registry::TokenRegistry;
use crate::services::{CertRequestWriteService, CertWriteService, KeyWriteService};

/// A certificate to be stored under a key.
#[derive(Debug, Clone, Default)]
pub struct NewCert {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub active: bool,
    pub status: String,
    /// DER bytes.
    pub certificate: Vec<u8>,
}

/// A certificate signing request made with a key.
#[derive(Debug, Clone)]
pub struct NewCertRequest {
    pub member_id: Option<ClientId>,
    pub subject_name: String,
    pub subject_alt_name: Option<String>,
    pub usage: KeyUsage,
    pub certificate_profile: Option<String>,
}

pub struct CertManager {
    registry: Arc<TokenRegistry>,
    keys: Arc<dyn KeyWriteService>,
    certs: Arc<dyn CertWriteService>,
    cert_requests: Arc<dyn CertRequestWriteService>,
}

impl CertManager {
    pub fn new(
        registry: Arc<TokenRegistry>,
        keys: Arc<dyn KeyWriteService>,
        certs: Arc<dyn CertWriteService>,
        cert_requests: Arc<dyn CertRequestWriteService>,
    ) -> Self {
        Self {
            registry,
            keys,
            certs,
            cert_requests,
        }
    }

    /// Store `cert` under `key_id`. Fails if a certificate with the same id
    /// already exists, with [`SignerError::TransientCert`] if that one is
    /// transient.
    pub fn add_cert(&self, key_id: &str, cert: NewCert) -> SignerResult<()> {
        trace!(key_id, cert_id = %cert.id, "add_cert()");
        self.registry.write_action(|ctx| {
            let (_, key) = find_key(ctx.snapshot(), key_id)?;
            if let Some(existing) = ctx.snapshot().find_cert(&cert.id) {
                if existing.cert.is_transient() {
                    return Err(SignerError::TransientCert(cert.id.clone()));
                }
                return Err(SignerError::Internal(format!(
                    "Certificate '{}' already exists",
                    cert.id
                )));
            }
            let key_row = storage_id("Key", key_id, key.internal_id())?;

            let entity = CertEntity {
                cert_id: cert.id.clone(),
                member_id: cert.member_id.as_ref().map(|m| m.as_str().to_string()),
                active: cert.active,
                status: Some(cert.status.clone()).filter(|s| !s.is_empty()),
                contents: cert.certificate.clone(),
                ..Default::default()
            };

            ctx.invalidate_cache();
            self.certs.save(key_row, &entity)?;
            info!(key_id, cert_id = %cert.id, "Added certificate");
            Ok(())
        })
    }

    /// Attach a certificate to the live key without persisting it.
    pub fn add_transient_cert(
        &self,
        key_id: &str,
        cert_id: &str,
        member_id: Option<ClientId>,
        certificate: Vec<u8>,
    ) -> SignerResult<CertificateInfo> {
        trace!(key_id, cert_id, "add_transient_cert()");
        self.registry.write_action(|ctx| {
            let (_, key) = find_key(ctx.snapshot(), key_id)?;
            let mut cert = Cert::new(cert_id, certificate);
            cert.member_id = member_id;
            let added = key.add_transient_cert(cert);
            Ok(CertificateInfo::from_runtime(&added))
        })
    }

    /// Returns `false` if the certificate does not exist. Transient
    /// certificates are dropped from memory only.
    pub fn remove_cert(&self, cert_id: &str) -> SignerResult<bool> {
        trace!(cert_id, "remove_cert()");
        self.registry.write_action(|ctx| {
            let Some(found) = ctx.snapshot().find_cert(cert_id) else {
                warn!(cert_id, "Certificate to remove not found");
                return Ok(false);
            };
            if found.cert.is_transient() {
                return Ok(found.key.remove_transient_cert(cert_id));
            }
            let id = storage_id("Certificate", cert_id, found.cert.internal_id())?;

            ctx.invalidate_cache();
            let deleted = self.certs.delete(id)?;
            info!(cert_id, deleted, "Removed certificate");
            Ok(deleted)
        })
    }

    pub fn set_cert_active(&self, cert_id: &str, active: bool) -> SignerResult<()> {
        trace!(cert_id, active, "set_cert_active()");
        self.update_cert(cert_id, |certs, id| certs.update_active(id, active))
    }

    pub fn set_cert_status(&self, cert_id: &str, status: &str) -> SignerResult<()> {
        trace!(cert_id, status, "set_cert_status()");
        self.update_cert(cert_id, |certs, id| certs.update_status(id, status))
    }

    pub fn set_renewed_cert_hash(&self, cert_id: &str, hash: &str) -> SignerResult<()> {
        trace!(cert_id, hash, "set_renewed_cert_hash()");
        self.update_cert(cert_id, |certs, id| certs.update_renewed_cert_hash(id, hash))
    }

    pub fn set_renewal_error(&self, cert_id: &str, error: Option<&str>) -> SignerResult<()> {
        trace!(cert_id, ?error, "set_renewal_error()");
        let error = error.map(str::to_string);
        self.update_cert(cert_id, |certs, id| certs.update_renewal_error(id, error))
    }

    pub fn set_next_planned_renewal(
        &self,
        cert_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> SignerResult<()> {
        trace!(cert_id, ?at, "set_next_planned_renewal()");
        self.update_cert(cert_id, |certs, id| certs.update_next_planned_renewal(id, at))
    }

    pub fn set_ocsp_verify_error(&self, cert_id: &str, error: Option<&str>) -> SignerResult<()> {
        trace!(cert_id, ?error, "set_ocsp_verify_error()");
        let error = error.map(str::to_string);
        self.update_cert(cert_id, |certs, id| certs.update_ocsp_verify_error(id, error))
    }

    /// Runtime only: cache an OCSP response on the certificate with
    /// `cert_hash`.
    pub fn set_ocsp_response(&self, cert_hash: &str, response: Option<Vec<u8>>) -> SignerResult<()> {
        trace!(cert_hash, "set_ocsp_response()");
        let snapshot = self.registry.current_tokens();
        let found = snapshot
            .find_cert_by_hash(cert_hash)
            .ok_or_else(|| SignerError::CertWithHashNotFound(cert_hash.to_string()))?;
        found.cert.set_ocsp_response(response);
        Ok(())
    }

    /// Create a certificate request on `key_id`, or return the id of an
    /// existing request for the same member and subject.
    ///
    /// A key without usage takes the requested one, written together with a
    /// new request. A key whose usage
    /// differs fails with [`SignerError::WrongCertUsage`] before anything is
    /// written.
    pub fn add_cert_request(&self, key_id: &str, request: NewCertRequest) -> SignerResult<String> {
        trace!(
            key_id,
            member_id = ?request.member_id,
            subject_name = %request.subject_name,
            usage = %request.usage,
            "add_cert_request()"
        );

        self.registry.write_action(|ctx| {
            let (_, key) = find_key(ctx.snapshot(), key_id)?;
            if let Some(existing) = key.usage() {
                if existing != request.usage {
                    return Err(SignerError::WrongCertUsage {
                        requested: request.usage,
                        existing,
                    });
                }
            }
            let key_row = storage_id("Key", key_id, key.internal_id())?;
            let fix_usage = key
                .usage()
                .is_none()
                .then(|| request.usage.as_str().to_string());

            if let Some(existing) =
                key.find_cert_request(request.member_id.as_ref(), &request.subject_name)
            {
                if fix_usage.is_some() {
                    ctx.invalidate_cache();
                    self.keys.update_usage(key_row, fix_usage)?;
                }
                warn!(
                    key_id,
                    cert_request_id = %existing.id,
                    "Certificate request for this member and subject already exists"
                );
                return Ok(existing.id.clone());
            }

            let id = Uuid::new_v4().to_string();
            let entity = CertRequestEntity {
                cert_request_id: id.clone(),
                member_id: request.member_id.as_ref().map(|m| m.as_str().to_string()),
                subject_name: request.subject_name.clone(),
                subject_alt_name: request.subject_alt_name.clone(),
                certificate_profile: request.certificate_profile.clone(),
                ..Default::default()
            };

            ctx.invalidate_cache();
            self.cert_requests.save(key_row, &entity, fix_usage)?;
            info!(key_id, cert_request_id = %id, "Added certificate request");
            Ok(id)
        })
    }

    /// Returns `false` if the request does not exist.
    pub fn remove_cert_request(&self, cert_request_id: &str) -> SignerResult<bool> {
        trace!(cert_request_id, "remove_cert_request()");
        self.registry.write_action(|ctx| {
            let Some(found) = ctx.snapshot().find_cert_request(cert_request_id) else {
                warn!(cert_request_id, "Certificate request to remove not found");
                return Ok(false);
            };
            let id = storage_id("Certificate request", cert_request_id, found.request.internal_id)?;

            ctx.invalidate_cache();
            let deleted = self.cert_requests.delete(id)?;
            info!(cert_request_id, deleted, "Removed certificate request");
            Ok(deleted)
        })
    }

    /// Resolve a persisted certificate and write one of its fields.
    fn update_cert<F>(&self, cert_id: &str, write: F) -> SignerResult<()>
    where
        F: FnOnce(&dyn CertWriteService, i64) -> StoreResult<bool>,
    {
        self.registry.write_action(|ctx| {
            let found = ctx
                .snapshot()
                .find_cert(cert_id)
                .ok_or_else(|| SignerError::CertNotFound(cert_id.to_string()))?;
            if found.cert.is_transient() {
                return Err(SignerError::TransientCert(cert_id.to_string()));
            }
            let id = storage_id("Certificate", cert_id, found.cert.internal_id())?;

            ctx.invalidate_cache();
            if !write(self.certs.as_ref(), id)? {
                warn!(cert_id, "Certificate vanished from the key configuration");
                return Err(SignerError::CertNotFound(cert_id.to_string()));
            }
            info!(cert_id, "Updated certificate");
            Ok(())
        })
    }
}

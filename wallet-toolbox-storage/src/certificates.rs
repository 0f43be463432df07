//! `list_certificates` / `relinquish_certificate` / `acquire_direct_certificate`
//! persistence: CRUD siblings of `list_outputs` sharing the same
//! pagination/count-before-page shape.

use crate::error::StorageResult;
use crate::models::{Certificate, CertificateField};
use crate::provider::{CertificateQuery, NewCertificate, NewCertificateField, StorageProvider};

/// One field to attach to a freshly-acquired certificate.
pub struct PendingCertificateField {
    pub name: String,
    pub value: String,
    pub master_key: String,
}

pub struct AcquireCertificateRequest {
    pub user_id: i64,
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub verifier: Option<String>,
    pub revocation_outpoint: String,
    pub signature: String,
    pub fields: Vec<PendingCertificateField>,
}

/// Persists a certificate and its typed fields as one logical unit
/// (`acquire_direct_certificate`).
pub async fn acquire_direct_certificate(
    storage: &dyn StorageProvider,
    req: AcquireCertificateRequest,
) -> StorageResult<Certificate> {
    let cert = storage
        .insert_certificate(NewCertificate {
            user_id: req.user_id,
            r#type: req.r#type,
            serial_number: req.serial_number,
            certifier: req.certifier,
            subject: req.subject,
            verifier: req.verifier,
            revocation_outpoint: req.revocation_outpoint,
            signature: req.signature,
        })
        .await?;

    for field in req.fields {
        storage
            .insert_certificate_field(NewCertificateField {
                certificate_id: cert.certificate_id,
                field_name: field.name,
                field_value: field.value,
                master_key: field.master_key,
            })
            .await?;
    }

    Ok(cert)
}

/// A certificate together with its typed fields, as returned to a
/// `list_certificates` caller.
pub struct CertificateWithFields {
    pub certificate: Certificate,
    pub fields: Vec<CertificateField>,
}

pub async fn list_certificates(
    storage: &dyn StorageProvider,
    query: CertificateQuery,
) -> StorageResult<(Vec<CertificateWithFields>, i64)> {
    let (certs, total) = storage.find_certificates(query).await?;
    let mut out = Vec::with_capacity(certs.len());
    for certificate in certs {
        let fields = storage.certificate_fields(certificate.certificate_id).await?;
        out.push(CertificateWithFields { certificate, fields });
    }
    Ok((out, total))
}

/// Soft-deletes a certificate (`relinquish_certificate`).
pub async fn relinquish_certificate(storage: &dyn StorageProvider, certificate_id: i64) -> StorageResult<()> {
    storage.relinquish_certificate(certificate_id).await
}

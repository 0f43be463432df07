//! `acquire_direct_certificate` / `prove_certificate`: create
//! or sign a certificate, and selectively reveal its fields to a verifier by
//! re-encrypting each field's master key under the verifier's counterparty
//! key.

use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::types::{Counterparty, Protocol};
use wallet_toolbox_crypto::KeyDeriver;
use wallet_toolbox_storage::certificates::{
    self, AcquireCertificateRequest, CertificateWithFields, PendingCertificateField,
};
use wallet_toolbox_storage::StorageProvider;

/// One field the caller wants embedded in a freshly-created certificate,
/// prior to master-key derivation.
pub struct NewCertificateField {
    pub name: String,
    pub value: String,
}

pub struct AcquireDirectCertificateArgs {
    pub user_id: i64,
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub verifier: Option<String>,
    pub revocation_outpoint: String,
    pub fields: Vec<NewCertificateField>,
}

/// The fixed protocol under which certificate master keys are derived and
/// the certificate's own signature is produced.
fn certificate_protocol() -> Protocol {
    Protocol {
        security_level: wallet_toolbox_common::types::SecurityLevel::Private,
        name: "certificate signing".to_string(),
    }
}

/// `acquire_direct_certificate`: derives a per-field master key, signs the
/// certificate body, and persists the result.
pub async fn acquire_direct_certificate(
    storage: &dyn StorageProvider,
    key_deriver: &dyn KeyDeriver,
    args: AcquireDirectCertificateArgs,
) -> WalletResult<CertificateWithFields> {
    let protocol = certificate_protocol();
    let body = format!(
        "{}|{}|{}|{}",
        args.r#type, args.serial_number, args.certifier, args.subject
    );
    let hash = wallet_toolbox_common::hash::sha256(body.as_bytes());
    let signature = key_deriver
        .sign(&protocol, &args.serial_number, &Counterparty::Myself, &hash)
        .map_err(|e| WalletError::runtime(format!("failed to sign certificate: {e}")))?;

    let mut fields = Vec::with_capacity(args.fields.len());
    for field in &args.fields {
        let master_key = key_deriver
            .derive_symmetric_key(&protocol, &field.name, &Counterparty::Myself)
            .map_err(|e| WalletError::runtime(format!("failed to derive field master key for {}: {e}", field.name)))?;
        fields.push(PendingCertificateField {
            name: field.name.clone(),
            value: field.value.clone(),
            master_key: hex::encode(master_key),
        });
    }

    let cert = certificates::acquire_direct_certificate(
        storage,
        AcquireCertificateRequest {
            user_id: args.user_id,
            r#type: args.r#type,
            serial_number: args.serial_number,
            certifier: args.certifier,
            subject: args.subject,
            verifier: args.verifier,
            revocation_outpoint: args.revocation_outpoint,
            signature: hex::encode(signature.serialize_der()),
            fields,
        },
    )
    .await
    .map_err(|e| WalletError::runtime(format!("failed to persist certificate: {e}")))?;

    let fields = storage
        .certificate_fields(cert.certificate_id)
        .await
        .map_err(|e| WalletError::runtime(format!("failed to load certificate fields: {e}")))?;

    Ok(CertificateWithFields { certificate: cert, fields })
}

/// One field revealed to a verifier: its name and its master key
/// re-encrypted under the verifier's counterparty key (a "keyring" entry).
pub struct RevealedField {
    pub name: String,
    pub encrypted_master_key: Vec<u8>,
}

/// `prove_certificate`: re-encrypts the master key of each field named in
/// `fields_to_reveal` for `verifier`, so the verifier (and only the
/// verifier) can decrypt those specific field values.
pub async fn prove_certificate(
    storage: &dyn StorageProvider,
    key_deriver: &dyn KeyDeriver,
    certificate_id: i64,
    fields_to_reveal: &[String],
    verifier: &Counterparty,
) -> WalletResult<Vec<RevealedField>> {
    let protocol = certificate_protocol();
    let all_fields = storage
        .certificate_fields(certificate_id)
        .await
        .map_err(|e| WalletError::runtime(format!("failed to load certificate fields: {e}")))?;

    let mut revealed = Vec::with_capacity(fields_to_reveal.len());
    for name in fields_to_reveal {
        let field = all_fields
            .iter()
            .find(|f| &f.field_name == name)
            .ok_or_else(|| WalletError::invalid_parameter("fieldsToReveal", format!("no such field: {name}")))?;
        let master_key = hex::decode(&field.master_key)
            .map_err(|e| WalletError::runtime(format!("stored master key for {name} is not valid hex: {e}")))?;
        let encrypted_master_key = key_deriver
            .encrypt(&protocol, name, verifier, &master_key)
            .map_err(|e| WalletError::runtime(format!("failed to re-encrypt master key for {name}: {e}")))?;
        revealed.push(RevealedField {
            name: name.clone(),
            encrypted_master_key,
        });
    }

    Ok(revealed)
}

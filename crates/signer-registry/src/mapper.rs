//! Conversion between store entities and the domain model.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyconf_database::{CertEntity, CertRequestEntity, DeviceEntity, KeyEntity};

use crate::error::{StoreError, StoreResult};
use crate::model::{
    calculate_cert_hash, Cert, CertRequest, ClientId, Key, KeyUsage, SignMechanism, Token,
};

pub fn token_from_entity(device: DeviceEntity) -> StoreResult<Token> {
    let sign_mechanism = device
        .sign_mechanism
        .as_deref()
        .map(parse_sign_mechanism)
        .transpose()?;

    let keys = device
        .keys
        .into_iter()
        .map(|key| key_from_entity(key, sign_mechanism))
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Token {
        id: device.device_id,
        internal_id: device.id,
        token_type: device.device_type,
        friendly_name: device.friendly_name,
        serial_number: device.token_id,
        label: device.slot_id,
        slot_index: device.pin_index,
        read_only: device.read_only,
        active: false,
        info: Default::default(),
        sign_mechanism,
        pin_hash: device.pin_hash,
        keys,
    })
}

/// Keys without an explicit mechanism inherit the token's.
fn key_from_entity(key: KeyEntity, token_mechanism: Option<SignMechanism>) -> StoreResult<Key> {
    let sign_mechanism = match key.sign_mechanism.as_deref() {
        Some(name) => parse_sign_mechanism(name)?,
        None => token_mechanism.unwrap_or_default(),
    };
    let usage = key
        .usage
        .as_deref()
        .map(|u| u.parse::<KeyUsage>().map_err(StoreError::InvalidData))
        .transpose()?;

    Ok(Key {
        id: key.key_id,
        internal_id: key.id,
        friendly_name: key.friendly_name,
        label: key.label,
        public_key: key.public_key.map(|bytes| BASE64.encode(bytes)),
        sign_mechanism,
        usage,
        available: false,
        software_keystore: key.keystore,
        certs: key.certs.into_iter().map(cert_from_entity).collect(),
        cert_requests: key
            .cert_requests
            .into_iter()
            .map(cert_request_from_entity)
            .collect(),
    })
}

fn cert_from_entity(cert: CertEntity) -> Cert {
    Cert {
        id: cert.cert_id,
        internal_id: cert.id,
        hash: calculate_cert_hash(&cert.contents),
        certificate: cert.contents,
        active: cert.active,
        status: cert.status.unwrap_or_default(),
        member_id: cert.member_id.map(ClientId::from_string),
        saved_to_configuration: true,
        next_renewal_time: cert.next_renewal_time,
        renewal_error: cert.renewal_error,
        renewed_cert_hash: cert.renewed_cert_hash,
        ocsp_verify_error: cert.ocsp_verify_error,
        ocsp_response: None,
        transient: false,
    }
}

fn cert_request_from_entity(request: CertRequestEntity) -> CertRequest {
    CertRequest {
        id: request.cert_request_id,
        internal_id: request.id,
        member_id: request.member_id.map(ClientId::from_string),
        subject_name: request.subject_name,
        subject_alt_name: request.subject_alt_name,
        certificate_profile: request.certificate_profile,
    }
}

/// Map a token for persistence. Keys with no saved certificate and no
/// request are dropped; transient certificates are never persisted.
pub fn token_to_entity(token: &Token) -> StoreResult<DeviceEntity> {
    let keys = token
        .keys
        .iter()
        .filter(|key| key.has_certs_or_cert_requests())
        .map(key_to_entity)
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(DeviceEntity {
        keys,
        ..device_header(token)
    })
}

/// Device row without children.
pub fn device_header(token: &Token) -> DeviceEntity {
    DeviceEntity {
        id: token.internal_id,
        device_id: token.id.clone(),
        device_type: token.token_type.clone(),
        friendly_name: token.friendly_name.clone(),
        token_id: token.serial_number.clone(),
        slot_id: token.label.clone(),
        pin_index: token.slot_index,
        sign_mechanism: token.sign_mechanism.map(|m| m.as_str().to_string()),
        pin_hash: token.pin_hash.clone(),
        read_only: token.read_only,
        keys: Vec::new(),
    }
}

pub fn key_to_entity(key: &Key) -> StoreResult<KeyEntity> {
    let public_key = key
        .public_key
        .as_deref()
        .map(decode_public_key)
        .transpose()?;

    Ok(KeyEntity {
        id: key.internal_id,
        key_id: key.id.clone(),
        friendly_name: key.friendly_name.clone(),
        label: key.label.clone(),
        public_key,
        usage: key.usage.map(|u| u.as_str().to_string()),
        sign_mechanism: Some(key.sign_mechanism.as_str().to_string()),
        keystore: key.software_keystore.clone(),
        certs: key
            .certs
            .iter()
            .filter(|c| !c.transient && c.saved_to_configuration)
            .map(cert_to_entity)
            .collect(),
        cert_requests: key.cert_requests.iter().map(cert_request_to_entity).collect(),
    })
}

pub fn cert_to_entity(cert: &Cert) -> CertEntity {
    CertEntity {
        id: cert.internal_id,
        cert_id: cert.id.clone(),
        member_id: cert.member_id.as_ref().map(|m| m.as_str().to_string()),
        active: cert.active,
        status: Some(cert.status.clone()).filter(|s| !s.is_empty()),
        contents: cert.certificate.clone(),
        renewed_cert_hash: cert.renewed_cert_hash.clone(),
        renewal_error: cert.renewal_error.clone(),
        next_renewal_time: cert.next_renewal_time,
        ocsp_verify_error: cert.ocsp_verify_error.clone(),
    }
}

pub fn cert_request_to_entity(request: &CertRequest) -> CertRequestEntity {
    CertRequestEntity {
        id: request.internal_id,
        cert_request_id: request.id.clone(),
        member_id: request.member_id.as_ref().map(|m| m.as_str().to_string()),
        subject_name: request.subject_name.clone(),
        subject_alt_name: request.subject_alt_name.clone(),
        certificate_profile: request.certificate_profile.clone(),
    }
}

pub fn decode_public_key(encoded: &str) -> StoreResult<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| StoreError::InvalidData(format!("public key is not base64: {}", e)))
}

fn parse_sign_mechanism(name: &str) -> StoreResult<SignMechanism> {
    name.parse().map_err(StoreError::InvalidData)
}

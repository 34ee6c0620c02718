//! Date-bound QR credentials.
//!
//! Token format: `base64url(json payload) "." base64url(hmac-sha256)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::utils::error::AppError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrError {
    #[error("QR token is malformed")]
    Malformed,

    #[error("QR token signature does not match")]
    BadSignature,
}

pub trait QrSigner: Send + Sync {
    fn sign(&self, payload: &QrPayload) -> Result<String, AppError>;

    fn verify(&self, token: &str) -> Result<QrPayload, QrError>;
}

pub struct HmacQrSigner {
    key: Vec<u8>,
}

impl HmacQrSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::InternalServerError(format!("Failed to create HMAC: {e}")))
    }
}

impl QrSigner for HmacQrSigner {
    fn sign(&self, payload: &QrPayload) -> Result<String, AppError> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| AppError::InternalServerError(format!("Failed to encode QR: {e}")))?;
        let body = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{body}.{signature}"))
    }

    fn verify(&self, token: &str) -> Result<QrPayload, QrError> {
        let (body, signature) = token.trim().split_once('.').ok_or(QrError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| QrError::Malformed)?;

        let mut mac = self.mac().map_err(|_| QrError::BadSignature)?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| QrError::BadSignature)?;

        let json = URL_SAFE_NO_PAD.decode(body).map_err(|_| QrError::Malformed)?;
        serde_json::from_slice(&json).map_err(|_| QrError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> QrPayload {
        QrPayload {
            ticket_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ticket_code: "TK-0123456789AB".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        }
    }

    #[test]
    fn test_signed_token_verifies() {
        let signer = HmacQrSigner::new("secret");
        let original = payload();
        let token = signer.sign(&original).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), original);
    }

    #[test]
    fn test_tampered_date_is_rejected() {
        let signer = HmacQrSigner::new("secret");
        let token = signer.sign(&payload()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let mut forged = payload();
        forged.date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(
            signer.verify(&format!("{forged_body}.{signature}")),
            Err(QrError::BadSignature)
        );
    }

    #[test]
    fn test_other_key_and_garbage_are_rejected() {
        let token = HmacQrSigner::new("secret").sign(&payload()).unwrap();
        assert_eq!(
            HmacQrSigner::new("other").verify(&token),
            Err(QrError::BadSignature)
        );
        assert_eq!(
            HmacQrSigner::new("secret").verify("not-a-token"),
            Err(QrError::Malformed)
        );
    }
}

//! Authentication of the payment collaborator's settlement callback.
//!
//! The collaborator signs the order id it is settling with a shared secret:
//! `base64url(hmac-sha256(order_id))`, sent in the `x-payment-signature`
//! header.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::utils::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub struct PaymentSignatureVerifier {
    key: Vec<u8>,
}

impl PaymentSignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, order_id: Uuid) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::InternalServerError(format!("Failed to create HMAC: {e}")))?;
        mac.update(order_id.to_string().as_bytes());
        Ok(mac)
    }

    /// Signature the collaborator is expected to send for `order_id`.
    pub fn sign(&self, order_id: Uuid) -> Result<String, AppError> {
        Ok(URL_SAFE_NO_PAD.encode(self.mac(order_id)?.finalize().into_bytes()))
    }

    /// Constant-time comparison against the expected signature.
    pub fn verify(&self, order_id: Uuid, signature: &str) -> bool {
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature.trim()) else {
            return false;
        };
        self.mac(order_id)
            .map(|mac| mac.verify_slice(&signature).is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_bound_to_order_and_key() {
        let verifier = PaymentSignatureVerifier::new("webhook-secret");
        let order_id = Uuid::new_v4();
        let signature = verifier.sign(order_id).unwrap();

        assert!(verifier.verify(order_id, &signature));
        assert!(!verifier.verify(Uuid::new_v4(), &signature));
        assert!(!PaymentSignatureVerifier::new("other").verify(order_id, &signature));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        let verifier = PaymentSignatureVerifier::new("webhook-secret");
        assert!(!verifier.verify(Uuid::new_v4(), "not base64!"));
        assert!(!verifier.verify(Uuid::new_v4(), ""));
    }
}

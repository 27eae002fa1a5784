//! 请求签名认证
//! 客户端用私钥对自己的邮箱做 RSA PKCS#1 v1.5 (SHA-256) 签名，以 base64 放在
//! Authorization 头里；服务端用用户记录中的 PEM 公钥验证。

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{
    pkcs1::DecodeRsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::Verifier,
    RsaPublicKey,
};
use sha2::Sha256;

/// Accepts both `PUBLIC KEY` (SPKI) and `RSA PUBLIC KEY` (PKCS#1) PEM blocks.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, AppError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Validation(format!("invalid RSA public key: {}", e)))
}

/// Checks that `signature_b64` is the signature of `email` under `public_key_pem`.
pub fn verify_email_signature(
    public_key_pem: &str,
    email: &str,
    signature_b64: &str,
) -> Result<(), AppError> {
    if public_key_pem.trim().is_empty() {
        tracing::debug!(email = %email, "user has no public key on record");
        return Err(AppError::Unauthorized);
    }

    let key = parse_public_key(public_key_pem).map_err(|e| {
        tracing::warn!(email = %email, error = %e, "stored public key does not parse");
        AppError::Unauthorized
    })?;

    let raw = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| AppError::Unauthorized)?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|_| AppError::Unauthorized)?;

    VerifyingKey::<Sha256>::new(key)
        .verify(email.as_bytes(), &signature)
        .map_err(|_| {
            tracing::debug!(email = %email, "signature verification failed");
            AppError::Unauthorized
        })
}

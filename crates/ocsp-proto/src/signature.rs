//! Signature verification for OCSP responses
//!
//! Maps the X.509 signature algorithm OID (plus the key's algorithm and curve)
//! onto a `ring` verification algorithm.

use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};

use crate::error::ProtoError;

const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const ED25519: &str = "1.3.101.112";

const P256: &str = "1.2.840.10045.3.1.7";
const P384: &str = "1.3.132.0.34";

/// subjectPublicKeyInfo essentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublicKey {
    pub(crate) algorithm: String,
    pub(crate) curve: Option<String>,
    pub(crate) bits: Vec<u8>,
}

fn algorithm_for(
    key: &PublicKey,
    signature_algorithm: &str,
) -> Result<&'static dyn VerificationAlgorithm, ProtoError> {
    let alg: &'static dyn VerificationAlgorithm =
        match (signature_algorithm, key.algorithm.as_str(), key.curve.as_deref()) {
            ("1.2.840.10045.4.3.2", EC_PUBLIC_KEY, Some(P256)) => &signature::ECDSA_P256_SHA256_ASN1,
            ("1.2.840.10045.4.3.2", EC_PUBLIC_KEY, Some(P384)) => &signature::ECDSA_P384_SHA256_ASN1,
            ("1.2.840.10045.4.3.3", EC_PUBLIC_KEY, Some(P256)) => &signature::ECDSA_P256_SHA384_ASN1,
            ("1.2.840.10045.4.3.3", EC_PUBLIC_KEY, Some(P384)) => &signature::ECDSA_P384_SHA384_ASN1,
            ("1.2.840.113549.1.1.5", RSA_ENCRYPTION, _) => {
                &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY
            }
            ("1.2.840.113549.1.1.11", RSA_ENCRYPTION, _) => &signature::RSA_PKCS1_2048_8192_SHA256,
            ("1.2.840.113549.1.1.12", RSA_ENCRYPTION, _) => &signature::RSA_PKCS1_2048_8192_SHA384,
            ("1.2.840.113549.1.1.13", RSA_ENCRYPTION, _) => &signature::RSA_PKCS1_2048_8192_SHA512,
            (ED25519, ED25519, _) => &signature::ED25519,
            (sig, key_alg, curve) => {
                return Err(ProtoError::UnsupportedSignatureAlgorithm(format!(
                    "{sig} with key {key_alg} ({})",
                    curve.unwrap_or("-")
                )))
            }
        };
    Ok(alg)
}

/// Verify `signature` over `message` with `key`
pub(crate) fn verify(
    key: &PublicKey,
    signature_algorithm: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ProtoError> {
    let alg = algorithm_for(key, signature_algorithm)?;
    UnparsedPublicKey::new(alg, &key.bits)
        .verify(message, signature)
        .map_err(|_| ProtoError::BadSignature("OCSP response signature".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ec_key(curve: &str) -> PublicKey {
        PublicKey {
            algorithm: EC_PUBLIC_KEY.to_string(),
            curve: Some(curve.to_string()),
            bits: vec![0x04; 65],
        }
    }

    #[test]
    fn test_unsupported_pairing() {
        let result = algorithm_for(&ec_key(P256), "1.2.840.113549.1.1.11");
        assert!(matches!(
            result,
            Err(ProtoError::UnsupportedSignatureAlgorithm(_))
        ));
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let result = verify(&ec_key(P256), "1.2.840.10045.4.3.2", b"msg", &[0x30, 0x00]);
        assert!(matches!(result, Err(ProtoError::BadSignature(_))));
    }
}

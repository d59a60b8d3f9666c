use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    traits::PublicKeyParts,
    BigUint, RsaPrivateKey, RsaPublicKey,
};

use crate::{
    db::models::{Header, PrivateSigningKey, PublicJwk, SigningAlgorithm},
    error::KeyError,
};

pub const KEY_TYPE_RSA: &str = "RSA";
pub const KEY_USE_SIGNATURE: &str = "sig";

/// Generate an RSA keypair for `audience`, returning the private record and its JWK.
///
/// The key identifier is derived from the modulus, so the JWK `kid` always names exactly one
/// private key. This is CPU bound; async callers should run it on a blocking thread.
pub fn generate_rsa_keypair(
    audience: &str,
    bits: usize,
) -> Result<(PrivateSigningKey, PublicJwk), KeyError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyError::KeyGenerationFailed(e.to_string()))?;

    let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());

    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| KeyError::KeyGenerationFailed(e.to_string()))?;

    let key = PrivateSigningKey {
        header: Header::new(&n),
        algorithm: SigningAlgorithm::RS256,
        key_material: STANDARD.encode(der.as_bytes()),
        size: (private_key.size() * 8) as u32,
        is_current: true,
        audience: audience.to_string(),
    };

    let jwk = PublicJwk {
        kty: KEY_TYPE_RSA.to_string(),
        use_: KEY_USE_SIGNATURE.to_string(),
        kid: key.header.identifier.to_string(),
        alg: SigningAlgorithm::RS256.to_string(),
        n,
        e,
    };

    Ok((key, jwk))
}

/// Decode a stored key and check its internal consistency before it is used to sign.
pub fn to_rsa_private_key(key: &PrivateSigningKey) -> Result<RsaPrivateKey, KeyError> {
    let der = STANDARD
        .decode(&key.key_material)
        .map_err(|e| KeyError::MalformedKey(e.to_string()))?;
    let private_key =
        RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| KeyError::MalformedKey(e.to_string()))?;
    private_key
        .validate()
        .map_err(|e| KeyError::MalformedKey(e.to_string()))?;
    Ok(private_key)
}

/// Rebuild the public key from a JWK's modulus and exponent.
pub fn to_rsa_public_key(jwk: &PublicJwk) -> Result<RsaPublicKey, KeyError> {
    if jwk.kty != KEY_TYPE_RSA {
        return Err(KeyError::MalformedKey(format!("unexpected key type {}", jwk.kty)));
    }
    let n = URL_SAFE_NO_PAD
        .decode(&jwk.n)
        .map_err(|e| KeyError::MalformedKey(e.to_string()))?;
    let e = URL_SAFE_NO_PAD
        .decode(&jwk.e)
        .map_err(|e| KeyError::MalformedKey(e.to_string()))?;

    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| KeyError::MalformedKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::identifier_for;

    #[test]
    fn test_generate_keypair() {
        let (key, jwk) = generate_rsa_keypair("billing", 2048).expect("Failed to generate keypair");

        assert_eq!(key.size, 2048);
        assert_eq!(key.audience, "billing");
        assert_eq!(key.algorithm, SigningAlgorithm::RS256);
        assert!(key.is_current);

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.e, "AQAB");
        assert_eq!(jwk.kid, key.header.identifier.to_string());
        assert_eq!(key.header.identifier, identifier_for(&jwk.n));
    }

    #[test]
    fn test_stored_key_reconstructs_matching_public_key() {
        let (key, jwk) = generate_rsa_keypair("billing", 2048).unwrap();

        let private_key = to_rsa_private_key(&key).expect("stored key should decode");
        let public_key = to_rsa_public_key(&jwk).expect("jwk should decode");

        assert_eq!(private_key.to_public_key(), public_key);
    }

    #[test]
    fn test_each_generation_yields_a_new_identifier() {
        let (first, _) = generate_rsa_keypair("billing", 2048).unwrap();
        let (second, _) = generate_rsa_keypair("billing", 2048).unwrap();
        assert_ne!(first.header.identifier, second.header.identifier);
    }

    #[test]
    fn test_malformed_material_is_rejected() {
        let (mut key, mut jwk) = generate_rsa_keypair("billing", 2048).unwrap();

        key.key_material = "not base64!".to_string();
        assert!(matches!(to_rsa_private_key(&key), Err(KeyError::MalformedKey(_))));

        key.key_material = STANDARD.encode(b"definitely not a pkcs8 document");
        assert!(matches!(to_rsa_private_key(&key), Err(KeyError::MalformedKey(_))));

        jwk.kty = "oct".to_string();
        assert!(matches!(to_rsa_public_key(&jwk), Err(KeyError::MalformedKey(_))));
    }
}

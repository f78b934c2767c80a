//! BLS signatures over BLS12-381 curve, backed by `blst`
//!
//! Both flavours use the proof-of-possession ciphersuites from the [BLS draft]: aggregates over
//! the same message are verified against the sum of public keys, which is sound as long as the
//! keys in the [tree](crate::Tree) were checked for possession when the tree was assembled.
//!
//! [BLS draft]: https://www.ietf.org/archive/id/draft-irtf-cfrg-bls-signature-05.html#name-ciphersuites

use rand_core::{CryptoRng, RngCore};

use crate::{
    scheme::{InvalidKey, InvalidSignature},
    Mask, Scheme,
};

macro_rules! bls_scheme {
    (
        $(#[$doc:meta])*
        $scheme:ident, $module:ident, name: $name:literal, dst: $dst:literal, signature_size: $sig_size:literal
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $scheme;

        impl $scheme {
            const DST: &'static [u8] = $dst;

            fn parse_signature(bytes: &[u8]) -> Result<blst::$module::Signature, InvalidSignature> {
                if bytes.len() != $sig_size {
                    return Err(InvalidSignature);
                }
                blst::$module::Signature::from_bytes(bytes).map_err(|_| InvalidSignature)
            }
        }

        impl Scheme for $scheme {
            const NAME: &'static str = $name;

            type SecretKey = blst::$module::SecretKey;
            type PublicKey = blst::$module::PublicKey;

            fn generate_secret_key(
                rng: &mut (impl RngCore + CryptoRng),
            ) -> Result<Self::SecretKey, InvalidKey> {
                let mut ikm = [0u8; 32];
                rng.fill_bytes(&mut ikm);
                blst::$module::SecretKey::key_gen(&ikm, &[]).map_err(|_| InvalidKey)
            }

            fn public_key(secret_key: &Self::SecretKey) -> Self::PublicKey {
                secret_key.sk_to_pk()
            }

            fn sign(secret_key: &Self::SecretKey, msg: &[u8]) -> Vec<u8> {
                secret_key.sign(msg, Self::DST, &[]).compress().to_vec()
            }

            fn verify_share(
                public_key: &Self::PublicKey,
                msg: &[u8],
                share: &[u8],
            ) -> Result<(), InvalidSignature> {
                let share = Self::parse_signature(share)?;
                match share.verify(true, msg, Self::DST, &[], public_key, true) {
                    blst::BLST_ERROR::BLST_SUCCESS => Ok(()),
                    _ => Err(InvalidSignature),
                }
            }

            fn combine(parts: &[&[u8]]) -> Result<Vec<u8>, InvalidSignature> {
                let parts = parts
                    .iter()
                    .map(|part| Self::parse_signature(part))
                    .collect::<Result<Vec<_>, _>>()?;
                if parts.is_empty() {
                    return Err(InvalidSignature);
                }
                let parts = parts.iter().collect::<Vec<_>>();
                let aggregate = blst::$module::AggregateSignature::aggregate(&parts, true)
                    .map_err(|_| InvalidSignature)?;
                Ok(aggregate.to_signature().compress().to_vec())
            }

            fn verify_aggregate(
                public_keys: &[Self::PublicKey],
                msg: &[u8],
                aggregate: &[u8],
                mask: &Mask,
            ) -> Result<(), InvalidSignature> {
                if usize::from(mask.len()) != public_keys.len() {
                    return Err(InvalidSignature);
                }
                let signers = mask
                    .iter()
                    .map(|i| public_keys.get(usize::from(i)))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(InvalidSignature)?;
                if signers.is_empty() {
                    return Err(InvalidSignature);
                }

                let aggregate = Self::parse_signature(aggregate)?;
                match aggregate.fast_aggregate_verify(true, msg, Self::DST, &signers) {
                    blst::BLST_ERROR::BLST_SUCCESS => Ok(()),
                    _ => Err(InvalidSignature),
                }
            }

            const SIGNATURE_SIZE: usize = $sig_size;

            fn serialize_public_key(public_key: &Self::PublicKey) -> Vec<u8> {
                public_key.compress().to_vec()
            }

            fn deserialize_public_key(bytes: &[u8]) -> Result<Self::PublicKey, InvalidKey> {
                blst::$module::PublicKey::key_validate(bytes).map_err(|_| InvalidKey)
            }
        }
    };
}

#[cfg(feature = "scheme-bls12381-min-pk")]
bls_scheme! {
    /// BLS12-381 with public keys in G1 (48 bytes) and signatures in G2 (96 bytes)
    ///
    /// Smaller public keys, bigger signatures. This is the most common flavour, it's used in
    /// Ethereum consensus layer among others.
    Bls12381MinPk, min_pk,
    name: "BLS12381-MINPK-POP",
    dst: b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_",
    signature_size: 96
}

#[cfg(feature = "scheme-bls12381-min-sig")]
bls_scheme! {
    /// BLS12-381 with public keys in G2 (96 bytes) and signatures in G1 (48 bytes)
    ///
    /// Smaller signatures, bigger public keys.
    Bls12381MinSig, min_sig,
    name: "BLS12381-MINSIG-POP",
    dst: b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_POP_",
    signature_size: 48
}

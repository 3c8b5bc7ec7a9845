//! Key descriptor and key identifier derivation
//!
//! Both derivations must match the kernel bit for bit:
//! - Descriptor: first 8 bytes of SHA-512(SHA-512(key))
//! - Identifier: HKDF-SHA512(salt = none, ikm = key, info = "fscrypt\0" || 0x01), 16 bytes
//!
//! The kernel recomputes the identifier when a key is added, so a mismatch
//! here would make every v2 policy reference an unknown key.

use crate::crypto::{
    KeyDescriptor, KeyIdentifier, KeyMaterial, KEY_DESCRIPTOR_SIZE, KEY_IDENTIFIER_SIZE,
};
use ring::digest::{digest, SHA512};
use ring::hkdf::{self, Salt, HKDF_SHA512};
use zeroize::Zeroizing;

/// Prefix of every HKDF info string used by fs/crypto/
const HKDF_INFO_PREFIX: &[u8] = b"fscrypt\0";

/// HKDF context byte reserved for key identifiers
const HKDF_CONTEXT_KEY_IDENTIFIER: u8 = 1;

/// Compute the legacy v1 descriptor of a key.
pub fn descriptor_of(key: &KeyMaterial) -> KeyDescriptor {
    let first = Zeroizing::new(digest(&SHA512, key.as_bytes()).as_ref().to_vec());
    let second = digest(&SHA512, &first);

    let mut descriptor = [0u8; KEY_DESCRIPTOR_SIZE];
    descriptor.copy_from_slice(&second.as_ref()[..KEY_DESCRIPTOR_SIZE]);
    KeyDescriptor::from_bytes(descriptor)
}

/// Compute the v2 identifier of a key.
pub fn identifier_of(key: &KeyMaterial) -> KeyIdentifier {
    let salt = Salt::new(HKDF_SHA512, &[]);
    let prk = salt.extract(key.as_bytes());

    let info: [&[u8]; 2] = [HKDF_INFO_PREFIX, &[HKDF_CONTEXT_KEY_IDENTIFIER]];
    let mut identifier = [0u8; KEY_IDENTIFIER_SIZE];
    // Only fails when the output length exceeds 255 * hash length.
    prk.expand(&info, IdentifierLen)
        .and_then(|okm| okm.fill(&mut identifier))
        .unwrap_or_else(|_| unreachable!("16-byte HKDF-SHA512 output is always valid"));

    KeyIdentifier::from_bytes(identifier)
}

/// HKDF output length for ring
struct IdentifierLen;

impl hkdf::KeyType for IdentifierLen {
    fn len(&self) -> usize {
        KEY_IDENTIFIER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vector {
        raw: Vec<u8>,
        descriptor: &'static str,
        identifier: &'static str,
    }

    fn vectors() -> Vec<Vector> {
        let mut key64 = vec![b'a'; 32];
        key64.extend_from_slice(&[b'1'; 32]);
        vec![
            Vector {
                raw: key64,
                descriptor: "e355a76a11a1be18",
                identifier: "912ae510a458723a839a9fad701538ac",
            },
            Vector {
                raw: b"abcdefghijklmnopqrstuvwxyz0123456".to_vec(),
                descriptor: "e8dab99234bb312e",
                identifier: "1c2d6754b6cc7daacb599875d7faf9bb",
            },
            Vector {
                raw: b"abcdefghijklmnop".to_vec(),
                descriptor: "85baa174f0cb1142",
                identifier: "7eb80af3f24ef086726a4cea3a154ce0",
            },
        ]
    }

    #[test]
    fn test_descriptor_vectors() {
        for v in vectors() {
            let key = KeyMaterial::new(&v.raw).unwrap();
            assert_eq!(descriptor_of(&key).to_string(), v.descriptor);
        }
    }

    #[test]
    fn test_identifier_vectors() {
        for v in vectors() {
            let key = KeyMaterial::new(&v.raw).unwrap();
            assert_eq!(identifier_of(&key).to_string(), v.identifier);
        }
    }

    #[test]
    fn test_derivation_deterministic() {
        let key = KeyMaterial::new(&[0x42; 32]).unwrap();
        assert_eq!(descriptor_of(&key), descriptor_of(&key));
        assert_eq!(identifier_of(&key), identifier_of(&key));
    }

    #[test]
    fn test_different_keys_different_identities() {
        let key1 = KeyMaterial::new(&[0x01; 32]).unwrap();
        let key2 = KeyMaterial::new(&[0x02; 32]).unwrap();

        assert_ne!(descriptor_of(&key1), descriptor_of(&key2));
        assert_ne!(identifier_of(&key1), identifier_of(&key2));
    }

    #[test]
    fn test_length_is_part_of_the_key() {
        let short = KeyMaterial::new(&[0u8; 16]).unwrap();
        let long = KeyMaterial::new(&[0u8; 17]).unwrap();
        assert_ne!(identifier_of(&short), identifier_of(&long));
    }
}

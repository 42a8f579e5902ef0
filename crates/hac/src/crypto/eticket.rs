//! Personalized-ticket title-key unwrap.
//!
//! The console's eTicket RSA device key never leaves the key provider in its bare form:
//! it's handed to us as a 0x240-byte blob that is itself AES-CTR encrypted under a KEK.
//! Once decrypted, it gives us the raw RSA-2048 private exponent and modulus (no CRT
//! primes - the console doesn't have them either), which is enough to do textbook RSA
//! decryption followed by manual OAEP unpadding.

use crate::crypto::AesKey;
use rsa::BigUint;
use sha2::{Digest, Sha256};
use snafu::{OptionExt, Snafu};

const RSA_SIZE: usize = 0x100;
const HASH_LEN: usize = 0x20; // SHA-256

#[derive(Snafu, Debug)]
pub enum OaepUnwrapError {
    #[snafu(display("OAEP-encoded message has an invalid leading byte"))]
    BadLeadingByte {},
    #[snafu(display("OAEP label hash does not match"))]
    LabelHashMismatch {},
    #[snafu(display("OAEP padding string is not terminated by a 0x01 byte"))]
    MissingSeparator {},
}

/// The console's eTicket RSA device key, decrypted from the key provider's opaque blob.
#[derive(Clone)]
pub struct EticketRsaDeviceKey {
    d: [u8; RSA_SIZE],
    n: [u8; RSA_SIZE],
}

impl EticketRsaDeviceKey {
    /// `raw` is `0x10 CTR || 0x100 exponent || 0x100 modulus || u32-be public exponent
    /// || 0x14 padding || u64 device id || 0x10 GHASH`, AES-CTR encrypted after the CTR.
    pub fn decrypt(raw: &[u8; 0x240], kek: AesKey) -> Self {
        let mut buf = *raw;
        let (ctr, rest) = buf.split_at_mut(0x10);
        let ctr: [u8; 0x10] = ctr.try_into().unwrap();
        kek.decrypt_ctr(rest, &ctr);

        let mut d = [0; RSA_SIZE];
        let mut n = [0; RSA_SIZE];
        d.copy_from_slice(&rest[0..RSA_SIZE]);
        n.copy_from_slice(&rest[RSA_SIZE..2 * RSA_SIZE]);

        Self { d, n }
    }

    /// Decrypts an RSA-2048-OAEP(SHA-256, empty label) ciphertext, as used to wrap a
    /// personalized ticket's title key. Returns the unwrapped message (the title key is
    /// its first 16 bytes).
    pub fn oaep_decrypt(&self, ciphertext: &[u8; RSA_SIZE]) -> Result<Vec<u8>, OaepUnwrapError> {
        let n = BigUint::from_bytes_be(&self.n);
        let d = BigUint::from_bytes_be(&self.d);
        let c = BigUint::from_bytes_be(ciphertext);

        let m = c.modpow(&d, &n);
        let mut em = m.to_bytes_be();
        if em.len() < RSA_SIZE {
            let mut padded = vec![0u8; RSA_SIZE - em.len()];
            padded.extend_from_slice(&em);
            em = padded;
        }

        oaep_decode(&em)
    }
}

fn mgf1(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u32 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn oaep_decode(em: &[u8]) -> Result<Vec<u8>, OaepUnwrapError> {
    use snafu::ensure;

    ensure!(em[0] == 0, BadLeadingByteSnafu {});

    let masked_seed = &em[1..1 + HASH_LEN];
    let masked_db = &em[1 + HASH_LEN..];

    let seed_mask = mgf1(masked_db, HASH_LEN);
    let seed: Vec<u8> = masked_seed
        .iter()
        .zip(seed_mask.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    let db_mask = mgf1(&seed, masked_db.len());
    let db: Vec<u8> = masked_db
        .iter()
        .zip(db_mask.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    let empty_label_hash = Sha256::digest(b"");
    ensure!(
        db[..HASH_LEN] == empty_label_hash.as_slice()[..],
        LabelHashMismatchSnafu {}
    );

    let sep_index = db[HASH_LEN..]
        .iter()
        .position(|&b| b != 0)
        .context(MissingSeparatorSnafu {})?;
    ensure!(db[HASH_LEN + sep_index] == 1, MissingSeparatorSnafu {});

    Ok(db[HASH_LEN + sep_index + 1..].to_vec())
}

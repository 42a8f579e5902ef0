//! Certificate chain assembly.
//!
//! Certificates are signed blobs, structurally similar to tickets: a signature-type
//! word, a variable-sized signature, an issuer string and a public key whose size
//! depends on the key type. The system stores them by name in a certificate savefile;
//! a ticket's issuer string names the chain of certificates needed to verify it.

use crate::hexstring::HexData;
use binrw::{BinRead, BinWrite, NullString};
use snafu::{OptionExt, Snafu};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[repr(u32)]
pub enum SigType {
    #[brw(magic = 0x10000u32)]
    Rsa4096Sha1(#[brw(pad_after = 0x3c)] HexData<0x200>),
    #[brw(magic = 0x10001u32)]
    Rsa2048Sha1(#[brw(pad_after = 0x3c)] HexData<0x100>),
    #[brw(magic = 0x10002u32)]
    EcdsaSha1(#[brw(pad_after = 0x40)] HexData<0x3c>),
    #[brw(magic = 0x10003u32)]
    Rsa4096Sha256(#[brw(pad_after = 0x3c)] HexData<0x200>),
    #[brw(magic = 0x10004u32)]
    Rsa2048Sha256(#[brw(pad_after = 0x3c)] HexData<0x100>),
    #[brw(magic = 0x10005u32)]
    EcdsaSha256(#[brw(pad_after = 0x40)] HexData<0x3c>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum PubKeyType {
    Rsa4096 = 0,
    Rsa2048 = 1,
    Ecc480 = 2,
}

impl PubKeyType {
    /// Raw public-key material size, not counting the common `TikCertHeader` fields.
    const fn key_size(self) -> usize {
        match self {
            PubKeyType::Rsa4096 => 0x200 + 4 + 0x34,
            PubKeyType::Rsa2048 => 0x100 + 4 + 0x34,
            PubKeyType::Ecc480 => 0x3c + 0x3c,
        }
    }
}

fn sig_size(sig: &SigType) -> usize {
    match sig {
        SigType::Rsa4096Sha1(_) | SigType::Rsa4096Sha256(_) => 4 + 0x200 + 0x3c,
        SigType::Rsa2048Sha1(_) | SigType::Rsa2048Sha256(_) => 4 + 0x100 + 0x3c,
        SigType::EcdsaSha1(_) | SigType::EcdsaSha256(_) => 4 + 0x3c + 0x40,
    }
}

/// Smallest and largest valid total certificate size across every SigType x PubKeyType
/// combination, used to reject obviously-truncated or oversized blobs before parsing.
pub fn valid_size_bounds() -> (usize, usize) {
    let sig_sizes = [4 + 0x3c + 0x40, 4 + 0x200 + 0x3c];
    let common_header = 0x40 + 4; // issuer + pubkey type tag
    let key_sizes = [
        PubKeyType::Ecc480.key_size(),
        PubKeyType::Rsa4096.key_size(),
    ];

    let min = sig_sizes.iter().min().unwrap() + common_header + key_sizes.iter().min().unwrap();
    let max = sig_sizes.iter().max().unwrap() + common_header + key_sizes.iter().max().unwrap();
    (min, max)
}

/// Unlike tickets, certificates are big-endian throughout.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct Certificate {
    pub signature: SigType,
    #[brw(pad_size_to = 0x40)]
    pub issuer: NullString,
    pub pub_key_type: PubKeyType,
    #[brw(pad_size_to = 0x40)]
    pub subject: NullString,
    pub date: u32,
}

#[derive(Snafu, Debug)]
pub enum CertChainError {
    #[snafu(display("Certificate chain has no certificates (empty issuer)"))]
    EmptyIssuer {},
    #[snafu(display("Unknown certificate {name:?}"))]
    UnknownCertificate { name: String },
}

/// Certificates known to the system, keyed by name (e.g. `"CA00000003"`, `"XS00000020"`).
#[derive(Debug, Default, Clone)]
pub struct CertificateStore {
    certs: HashMap<String, Vec<u8>>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, raw: Vec<u8>) {
        self.certs.insert(name.into(), raw);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.certs.get(name).map(Vec::as_slice)
    }

    /// Assembles the raw certificate chain for a ticket/certificate issuer string, e.g.
    /// `"Root-CA00000003-XS00000020"`. The `"Root-"` prefix is skipped; each remaining
    /// dash-separated component is looked up by name and concatenated in order.
    pub fn assemble_chain(&self, issuer: &str) -> Result<Vec<u8>, CertChainError> {
        let names: Vec<&str> = issuer
            .strip_prefix("Root-")
            .unwrap_or(issuer)
            .split('-')
            .filter(|s| !s.is_empty())
            .collect();
        snafu::ensure!(!names.is_empty(), EmptyIssuerSnafu {});

        let mut out = Vec::new();
        for name in names {
            let cert = self.get(name).context(UnknownCertificateSnafu {
                name: name.to_string(),
            })?;
            out.extend_from_slice(cert);
        }
        Ok(out)
    }
}

use crate::hexstring::HexData;
use binrw::{BinRead, BinWrite};
use hex::FromHexError;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Snafu, Debug)]
pub enum IdParseError {
    InvalidLength { expected: usize, actual: usize },
    InvalidChar { char: char, index: usize },
}

fn parse_id(s: &str, result: &mut [u8]) -> Result<(), IdParseError> {
    hex::decode_to_slice(s, result).map_err(|e| match e {
        FromHexError::InvalidHexCharacter { c, index } => {
            IdParseError::InvalidChar { char: c, index }
        }
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            IdParseError::InvalidLength {
                expected: result.len() * 2,
                actual: s.len(),
            }
        }
    })?;
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
pub struct TitleId(u64);

impl Debug for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}
impl Display for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
pub struct NcaId([u8; 0x10]);

// wanna lowercase, hence the separate type
impl Debug for NcaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
impl Display for NcaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for NcaId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_id(s, &mut result).map(|_| NcaId(result))
    }
}

/// Identifies a title key in the keyset.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    BinRead,
    BinWrite,
)]
pub struct RightsId(HexData<0x10>);

impl RightsId {
    pub fn zero() -> Self {
        RightsId(HexData([0; 0x10]))
    }

    pub fn is_empty(&self) -> bool {
        self.0 .0.iter().all(|&x| x == 0)
    }

    /// The titlekek generation a ticket's title-key was wrapped under. Taken from the
    /// rights-id's last byte, not the ticket's own key-generation field.
    pub fn key_generation(&self) -> u8 {
        self.0 .0[0xf]
    }
}

impl Display for RightsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RightsId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_id(s, &mut result).map(|_| RightsId(HexData(result)))
    }
}

/// Identifies a single piece of content (an NCA) within a title, by the SHA-256 hash
/// prefix of its header. This is the file name NCAs are stored under (sans extension).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
pub struct ContentId([u8; 0x10]);

impl Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
impl Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for ContentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_id(s, &mut result).map(|_| ContentId(result))
    }
}

impl From<[u8; 0x10]> for ContentId {
    fn from(value: [u8; 0x10]) -> Self {
        ContentId(value)
    }
}

impl From<NcaId> for ContentId {
    fn from(id: NcaId) -> Self {
        ContentId(id.0)
    }
}
impl From<ContentId> for NcaId {
    fn from(id: ContentId) -> Self {
        NcaId(id.0)
    }
}

macro_rules! id64 {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
        pub struct $name(u64);

        impl $name {
            pub fn new(v: u64) -> Self {
                Self(v)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Debug::fmt(self, f)
            }
        }
        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                u64::from_str_radix(s, 16).map(Self)
            }
        }
        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

// A content meta ID as it comes out of a CNMT record, before we know which of the
// concrete ID kinds below it actually identifies (that's determined by the meta type).
id64!(AnyId);
id64!(ApplicationId);
id64!(PatchId);
id64!(DataId);
id64!(DataPatchId);

impl From<AnyId> for ApplicationId {
    fn from(id: AnyId) -> Self {
        ApplicationId(id.0)
    }
}
impl From<AnyId> for PatchId {
    fn from(id: AnyId) -> Self {
        PatchId(id.0)
    }
}
impl From<AnyId> for DataId {
    fn from(id: AnyId) -> Self {
        DataId(id.0)
    }
}
impl From<AnyId> for DataPatchId {
    fn from(id: AnyId) -> Self {
        DataPatchId(id.0)
    }
}

/// Identifies a single executable within an [`ApplicationInfo`]/[`PatchInfo`] (most
/// applications only have one, but some ship several, e.g. a game and its companion app).
///
/// Not a real on-disk ID: synthesized from the owning application/patch ID plus the
/// content's `id_offset` field, the same way horizon's `ncm` library derives it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(u64);

impl ProgramId {
    pub fn new(base: impl Into<u64>, id_offset: u8) -> Self {
        ProgramId(base.into() + id_offset as u64)
    }
}

impl Debug for ProgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
impl Display for ProgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

use crate::crypto::eticket::{EticketRsaDeviceKey, OaepUnwrapError};
use crate::crypto::keyset::KeySet;
use crate::crypto::TitleKey;
use crate::hexstring::HexData;
use crate::ids::RightsId;
use binrw::{BinRead, BinWrite, NullString};
use bitflags::bitflags;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[repr(u32)]
pub enum Signature {
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

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum TitleKeyType {
    Common,
    Personalized,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum LicenseType {
    Permanent,
    Demo,
    Trial,
    Rental,
    Subscription,
    Service,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u32 {
        const PRE_INSTALL = 1 << 0;
        const SHARED_TITLE = 1 << 1;
        const ALLOW_ALL_CONTENT = 1 << 2;
        /// Licence must be verified against the console before the title will launch.
        /// Always cleared by [`Ticket::to_common`].
        const E_LICENSE_REQUIRED = 1 << 3;
        /// Ticket must not be persisted to storage as-is. Always cleared by
        /// [`Ticket::to_common`].
        const VOLATILE = 1 << 4;
    }
}

impl BinRead for PropertyFlags {
    type Args<'a> = ();

    fn read_options<R: std::io::Read + std::io::Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<Self> {
        let bits = u32::read_options(reader, endian, args)?;
        Ok(Self::from_bits_retain(bits))
    }
}

impl BinWrite for PropertyFlags {
    type Args<'a> = ();

    fn write_options<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<()> {
        self.bits().write_options(writer, endian, args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Ticket {
    pub signature: Signature,
    #[brw(pad_size_to = 0x40)]
    pub issuer: NullString,
    pub title_key_block: HexData<0x100>,
    pub format_version: u8,
    pub title_key_type: TitleKeyType,
    pub ticket_version: u16,
    pub license_type: LicenseType,
    pub crypto_type: u8,
    pub property_flags: PropertyFlags,
    #[brw(pad_before = 0x6)]
    pub ticket_id: u64,
    pub device_id: u64,
    pub rights_id: RightsId,
    pub account_id: u32,
    pub sect_total_size: u32,
    pub sect_header_offset: u32,
    pub sect_num: u16,
    pub sect_entry_size: u16,
}

impl Signature {
    /// Replaces the signature payload with an all-`0xFF` filler of the same size/variant,
    /// used by [`Ticket::to_common`] step 2 (a common ticket carries no real signature).
    fn filled_with_ff(&self) -> Signature {
        match self {
            Signature::Rsa4096Sha1(_) => Signature::Rsa4096Sha1(HexData([0xff; 0x200])),
            Signature::Rsa2048Sha1(_) => Signature::Rsa2048Sha1(HexData([0xff; 0x100])),
            Signature::EcdsaSha1(_) => Signature::EcdsaSha1(HexData([0xff; 0x3c])),
            Signature::Rsa4096Sha256(_) => Signature::Rsa4096Sha256(HexData([0xff; 0x200])),
            Signature::Rsa2048Sha256(_) => Signature::Rsa2048Sha256(HexData([0xff; 0x100])),
            Signature::EcdsaSha256(_) => Signature::EcdsaSha256(HexData([0xff; 0x3c])),
        }
    }
}

#[derive(Snafu, Debug)]
pub enum TitleKeyUnwrapError {
    #[snafu(display("Ticket is personalized but no eTicket device key is available"))]
    MissingDeviceKey {},
    #[snafu(display("Ticket is personalized but no eTicket RSA KEK is available"))]
    MissingRsaKek {},
    #[snafu(display("Failed to RSA-OAEP decrypt the personalized title key"))]
    Oaep { source: OaepUnwrapError },
    #[snafu(display("RSA-OAEP unwrap of the title key produced fewer than 16 bytes"))]
    TooShort {},
}

#[derive(Snafu, Debug)]
pub enum CommonConversionError {
    #[snafu(display("Failed to unwrap the personalized title key"))]
    Unwrap { source: TitleKeyUnwrapError },
    #[snafu(display("Failed to serialize the converted ticket"))]
    Serialize { source: binrw::Error },
}

impl Ticket {
    /// `"Root-CA00000003-XS00000020"` (retail) / `"Root-CA00000004-XS00000021"` (dev):
    /// the issuer every common ticket is rewritten to point at.
    pub fn common_issuer(is_dev: bool) -> &'static str {
        if is_dev {
            "Root-CA00000004-XS00000021"
        } else {
            "Root-CA00000003-XS00000020"
        }
    }

    /// Converts a personalized ticket into an equivalent common one: the RSA-OAEP-wrapped
    /// title key is unwrapped down to its titlekek-encrypted form and copied directly into
    /// `title_key_block` (a common ticket's title key is titlekek-encrypted only, with no
    /// outer RSA layer), the signature is replaced with filler, and every
    /// personalization-only field is cleared.
    pub fn to_common(&self, keyset: &KeySet, is_dev: bool) -> Result<Ticket, CommonConversionError> {
        let wrapped_title_key = self.title_key(keyset).context(UnwrapSnafu)?;

        let mut ticket = self.clone();
        ticket.signature = self.signature.filled_with_ff();
        ticket.issuer = NullString(Self::common_issuer(is_dev).as_bytes().to_vec());

        let mut title_key_block = [0u8; 0x100];
        title_key_block[..0x10].copy_from_slice(&wrapped_title_key.raw());
        ticket.title_key_block = HexData(title_key_block);

        ticket.title_key_type = TitleKeyType::Common;
        ticket
            .property_flags
            .remove(PropertyFlags::E_LICENSE_REQUIRED | PropertyFlags::VOLATILE);
        ticket.ticket_id = 0;
        ticket.device_id = 0;
        ticket.account_id = 0;
        ticket.sect_total_size = 0;
        ticket.sect_num = 0;
        ticket.sect_entry_size = 0;

        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        ticket.write(&mut cursor).context(SerializeSnafu)?;
        ticket.sect_header_offset = buf.len() as u32;

        Ok(ticket)
    }
}

impl Ticket {
    /// Returns the titlekek-encrypted title-key, still needing `KeySet::title_kek`
    /// decryption. Common tickets carry it plain in `title_key_block`; personalized
    /// ones wrap it in an RSA-2048-OAEP(SHA-256) ciphertext under the console's eTicket
    /// device key.
    pub fn title_key(&self, keyset: &KeySet) -> Result<TitleKey, TitleKeyUnwrapError> {
        match self.title_key_type {
            TitleKeyType::Common => {
                let mut title_key = [0; 0x10];
                title_key.copy_from_slice(&self.title_key_block.0[..0x10]);
                Ok(TitleKey::from(title_key))
            }
            TitleKeyType::Personalized => {
                let device_key_raw = keyset
                    .eticket_rsa_device_key()
                    .context(MissingDeviceKeySnafu {})?;
                let kek = keyset
                    .eticket_rsa_kek(true)
                    .context(MissingRsaKekSnafu {})?;
                let device_key = EticketRsaDeviceKey::decrypt(&device_key_raw, kek);

                let msg = device_key
                    .oaep_decrypt(&self.title_key_block.0)
                    .context(OaepSnafu)?;
                ensure!(msg.len() >= 0x10, TooShortSnafu {});

                let mut title_key = [0; 0x10];
                title_key.copy_from_slice(&msg[..0x10]);
                Ok(TitleKey::from(title_key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keyset::KeySet;

    fn common_ticket(title_key: [u8; 0x10]) -> Ticket {
        let mut title_key_block = [0u8; 0x100];
        title_key_block[..0x10].copy_from_slice(&title_key);

        Ticket {
            signature: Signature::Rsa2048Sha256(HexData([0x11; 0x100])),
            issuer: NullString(b"Root-CA00000003-XS00000020".to_vec()),
            title_key_block: HexData(title_key_block),
            format_version: 2,
            title_key_type: TitleKeyType::Common,
            ticket_version: 1,
            license_type: LicenseType::Permanent,
            crypto_type: 0,
            property_flags: PropertyFlags::E_LICENSE_REQUIRED | PropertyFlags::VOLATILE,
            ticket_id: 0x0102030405060708,
            device_id: 0xaabbccdd,
            rights_id: RightsId::zero(),
            account_id: 42,
            sect_total_size: 0x20,
            sect_header_offset: 0x10,
            sect_num: 1,
            sect_entry_size: 0x20,
        }
    }

    #[test]
    fn title_key_roundtrips_for_common_tickets() {
        let ticket = common_ticket([0x42; 0x10]);
        let keyset = KeySet::from_file_contents("", "").unwrap();

        let key = ticket.title_key(&keyset).unwrap();
        assert_eq!(key.raw(), [0x42; 0x10]);
    }

    #[test]
    fn to_common_clears_personalization_fields_and_keeps_the_key() {
        let ticket = common_ticket([0x77; 0x10]);
        let keyset = KeySet::from_file_contents("", "").unwrap();

        let common = ticket.to_common(&keyset, false).unwrap();

        assert_eq!(common.title_key_type, TitleKeyType::Common);
        assert_eq!(common.issuer.0, Ticket::common_issuer(false).as_bytes());
        assert_eq!(common.ticket_id, 0);
        assert_eq!(common.device_id, 0);
        assert_eq!(common.account_id, 0);
        assert_eq!(common.sect_num, 0);
        assert_eq!(common.sect_entry_size, 0);
        assert!(!common.property_flags.contains(PropertyFlags::E_LICENSE_REQUIRED));
        assert!(!common.property_flags.contains(PropertyFlags::VOLATILE));
        assert_eq!(
            common.title_key(&keyset).unwrap().raw(),
            ticket.title_key(&keyset).unwrap().raw()
        );
    }

    #[test]
    fn to_common_replaces_the_signature_with_filler() {
        let ticket = common_ticket([0x01; 0x10]);
        let keyset = KeySet::from_file_contents("", "").unwrap();

        let common = ticket.to_common(&keyset, false).unwrap();
        match common.signature {
            Signature::Rsa2048Sha256(data) => assert_eq!(data.0, [0xff; 0x100]),
            other => panic!("unexpected signature variant: {other:?}"),
        }
    }
}

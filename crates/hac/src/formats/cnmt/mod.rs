use crate::hexstring::HexData;
use crate::ids::{AnyId, ApplicationId, ContentId, DataId, DataPatchId, PatchId};
use crate::version::Version;
use binrw::{BinRead, BinWrite};
use bitflags::bitflags;
use std::io::SeekFrom;

pub mod patch_meta_extended_data;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum ContentMetaType {
    // Unknown = 0,
    SystemProgram = 1,
    SystemData = 2,
    SystemUpdate = 3,
    BootImagePackage = 4,
    BootImagePackageSafe = 5,
    /// A user program (commonly know as base game / app)
    Application = 0x80,
    /// A patch for a user program (commonly known as update)
    Patch = 0x81,
    /// DLC for a user program
    AddOnContent = 0x82,
    Delta = 0x83,
    DataPatch = 0x84,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum StorageId {
    None = 0,
    Host = 1,
    GameCard = 2,
    BuiltInSystem = 3,
    BuiltInUser = 4,
    SdCard = 5,
    Any = 6,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum ContentInstallType {
    Full = 0,
    FragmentOnly = 1,
    // Unknown = 7,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, BinRead, BinWrite)]
pub struct ContentMetaKey {
    pub id: AnyId,
    pub version: Version,
    pub ty: ContentMetaType,
    #[brw(pad_after = 2)]
    pub install_ty: ContentInstallType,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentMetaAttribute(u8);
bitflags! {
    impl ContentMetaAttribute: u8 {
        const INCLUDES_EXFAT_DRIVER = 0x01;
        const REBOOTLESS = 0x02;
        const COMPACTED = 0x04;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentMetaInstallState(u8);
bitflags! {
    impl ContentMetaInstallState: u8 {
        const COMMITTED = 0x01;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum UpdateType {
    ApplyAsDelta = 0,
    Overwrite = 1,
    Create = 2,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[br(import(meta_type: ContentMetaType, extended_header_size: u16))]
pub enum ExtendedMetaHeader {
    #[br(pre_assert(meta_type == ContentMetaType::SystemUpdate && extended_header_size != 0))]
    SystemUpdate {
        extended_data_size: u32,
    },
    #[br(pre_assert(meta_type == ContentMetaType::Application))]
    Application {
        patch_id: PatchId,
        required_system_version: Version,
        required_application_version: Version,
    },
    #[br(pre_assert(meta_type == ContentMetaType::Patch))]
    Patch {
        application_id: ApplicationId,
        required_system_version: Version,
        #[brw(pad_after = 8)]
        extended_data_size: u32,
    },
    /// Pre-15.0.0 layout: no accessibility flags, no associated data patch.
    #[br(pre_assert(meta_type == ContentMetaType::AddOnContent && extended_header_size == 0x10))]
    AddOnContentLegacy {
        application_id: ApplicationId,
        #[brw(pad_after = 4)]
        required_application_version: Version,
    },
    /// 15.0.0+ layout, distinguished from the legacy one only by `extended_header_size`
    /// (0x18 vs 0x10) since both share the `AddOnContent` meta type.
    #[br(pre_assert(meta_type == ContentMetaType::AddOnContent && extended_header_size == 0x18))]
    AddOnContent {
        application_id: ApplicationId,
        required_application_version: Version,
        #[brw(pad_after = 3)]
        content_accessibilities: u8,
        data_patch_id: DataPatchId,
    },
    #[br(pre_assert(meta_type == ContentMetaType::Delta))]
    Delta {
        application_id: ApplicationId,
        #[brw(pad_after = 4)]
        extended_data_size: u32,
    },
    #[br(pre_assert(meta_type == ContentMetaType::DataPatch))]
    DataPatch {
        data_id: DataId,
        application_id: ApplicationId,
        required_application_version: Version,
        #[brw(pad_after = 8)]
        extended_data_size: u32,
    },
    None,
}

impl ExtendedMetaHeader {
    pub fn extended_data_size(&self) -> u32 {
        match *self {
            ExtendedMetaHeader::SystemUpdate { extended_data_size }
            | ExtendedMetaHeader::Patch {
                extended_data_size, ..
            }
            | ExtendedMetaHeader::Delta {
                extended_data_size, ..
            }
            | ExtendedMetaHeader::DataPatch {
                extended_data_size, ..
            } => extended_data_size,
            ExtendedMetaHeader::Application { .. }
            | ExtendedMetaHeader::AddOnContentLegacy { .. }
            | ExtendedMetaHeader::AddOnContent { .. }
            | ExtendedMetaHeader::None => 0,
        }
    }

    /// `required_title_id`/`required_title_version` per the required-title-id/version
    /// accessor table: `None` for meta types with no associated required title (e.g.
    /// SystemUpdate, Delta, or an unparsed header).
    pub fn required_title_id(&self) -> Option<u64> {
        match *self {
            ExtendedMetaHeader::Application { patch_id, .. } => Some(patch_id.into()),
            ExtendedMetaHeader::Patch { application_id, .. } => Some(application_id.into()),
            ExtendedMetaHeader::AddOnContentLegacy { application_id, .. }
            | ExtendedMetaHeader::AddOnContent { application_id, .. } => {
                Some(application_id.into())
            }
            ExtendedMetaHeader::DataPatch { application_id, .. } => Some(application_id.into()),
            ExtendedMetaHeader::SystemUpdate { .. }
            | ExtendedMetaHeader::Delta { .. }
            | ExtendedMetaHeader::None => None,
        }
    }

    pub fn required_title_version(&self) -> Option<Version> {
        match *self {
            ExtendedMetaHeader::Application {
                required_application_version,
                ..
            } => Some(required_application_version),
            ExtendedMetaHeader::Patch {
                required_system_version,
                ..
            } => Some(required_system_version),
            ExtendedMetaHeader::AddOnContentLegacy {
                required_application_version,
                ..
            }
            | ExtendedMetaHeader::AddOnContent {
                required_application_version,
                ..
            } => Some(required_application_version),
            ExtendedMetaHeader::DataPatch {
                required_application_version,
                ..
            } => Some(required_application_version),
            ExtendedMetaHeader::SystemUpdate { .. }
            | ExtendedMetaHeader::Delta { .. }
            | ExtendedMetaHeader::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcmContentType {
    Meta = 0,
    Program = 1,
    Data = 2,
    Control = 3,
    HtmlDocument = 4,
    LegalInformation = 5,
    DeltaFragment = 6,
}

// pub struct Digest {}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentInfo {
    pub id: ContentId,
    #[br(parse_with = crate::brw_utils::read_u40)]
    #[bw(write_with = crate::brw_utils::write_u40)]
    pub size: u64,
    pub content_attributes: u8,
    pub ty: NcmContentType,
    pub id_offset: u8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct PackagedContentInfo {
    pub hash: HexData<0x20>,
    pub content_info: ContentInfo,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentMetaInfo {
    pub title_id: AnyId,
    pub version: Version,
    pub ty: NcmContentType,
    #[brw(pad_after = 2)]
    pub attributes: ContentMetaAttribute,
}

#[derive(Debug, Clone, Eq, PartialEq, BinRead, BinWrite)]
#[br(import(meta_type: ContentMetaType, extended_data_size: u32))]
pub enum ExtendedData {
    #[br(pre_assert(extended_data_size != 0 && meta_type == ContentMetaType::Patch))]
    Patch(patch_meta_extended_data::PatchMetaExtendedData),
    #[br(pre_assert(extended_data_size == 0))]
    None,
}

#[derive(Debug, Clone, Eq, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct PackagedContentMeta {
    pub id: AnyId,
    pub version: Version,
    pub ty: ContentMetaType,
    pub field_d: u8,
    /// Must match the size from the extended header struct for this content meta type (SystemUpdate, Application, Patch, AddOnContent, Delta).
    pub extended_header_size: u16,
    /// Determines how many PackagedContentInfo entries are available after the extended header.
    pub content_count: u16,
    /// Determines how many ContentMetaInfo entries are available after the PackagedContentInfo entries. Only used for SystemUpdate.
    pub content_meta_count: u16,
    pub attributes: ContentMetaAttribute,
    pub storage_id: StorageId,
    pub content_install_type: ContentInstallType,
    pub install_state: ContentMetaInstallState,
    pub required_download_system_version: Version,

    #[brw(pad_before = 4)]
    #[br(args(ty, extended_header_size))]
    pub extended_header: ExtendedMetaHeader,

    #[br(seek_before = SeekFrom::Start(0x20 + extended_header_size as u64))]
    #[br(count = content_count)]
    pub content_info: Vec<PackagedContentInfo>,
    #[br(count = content_meta_count)]
    pub content_meta_info: Vec<ContentMetaInfo>,
    // TODO: be more robust by checking/enforcing extended data size (from extended header)
    #[br(args(ty, extended_header.extended_data_size()))]
    pub extended_data: ExtendedData,

    pub hash: HexData<0x20>,
}

impl PackagedContentMeta {
    pub fn content_meta_key(&self) -> ContentMetaKey {
        ContentMetaKey {
            id: self.id,
            version: self.version,
            ty: self.ty,
            install_ty: self.content_install_type,
        }
    }

    /// Overwrites a content's id/size/hash in place, e.g. after the content's NCA has
    /// been re-encrypted and its content-id (a hash of its own header) has changed.
    pub fn update_content_info(&mut self, index: usize, info: PackagedContentInfo) {
        self.content_info[index] = info;
    }

    /// Renders the `.xml` sidecar an authoring tool (hacpack/nxvenom-style NSP builders)
    /// emits next to a packaged NSP: one `<ContentMeta>` listing every content entry plus
    /// its key generation, used by `nsdev`-derived tooling to re-verify a package without
    /// re-parsing every NCA header. No XML crate is in this crate's dependency graph (see
    /// DESIGN.md), so this is hand-built the same way `nsp`'s PFS0 header is.
    pub fn generate_authoring_tool_xml(&self, key_generation: u8) -> String {
        use std::fmt::Write;

        let mut xml = String::new();
        let _ = writeln!(xml, "<ContentMeta>");
        let _ = writeln!(xml, "  <Type>{:?}</Type>", self.ty);
        let _ = writeln!(xml, "  <Id>0x{:016x}</Id>", u64::from(self.id));
        let _ = writeln!(xml, "  <Version>{}</Version>", u32::from(self.version));
        if let Some(required_id) = self.extended_header.required_title_id() {
            let _ = writeln!(xml, "  <RequiredDownloadSystemVersion>{}</RequiredDownloadSystemVersion>",
                u32::from(self.required_download_system_version));
            let _ = writeln!(xml, "  <RequiredApplicationId>0x{:016x}</RequiredApplicationId>", required_id);
        }
        if let Some(required_version) = self.extended_header.required_title_version() {
            let _ = writeln!(xml, "  <RequiredApplicationVersion>{}</RequiredApplicationVersion>",
                u32::from(required_version));
        }

        for content in &self.content_info {
            let _ = writeln!(xml, "  <Content>");
            let _ = writeln!(xml, "    <Type>{:?}</Type>", content.content_info.ty);
            let _ = writeln!(xml, "    <Id>{}</Id>", content.content_info.id);
            let _ = writeln!(xml, "    <Size>{}</Size>", content.content_info.size);
            let _ = writeln!(xml, "    <Hash>{}</Hash>", content.hash);
            let _ = writeln!(xml, "    <KeyGeneration>{}</KeyGeneration>", key_generation);
            let _ = writeln!(xml, "  </Content>");
        }

        let _ = writeln!(xml, "  <Digest>{}</Digest>", self.hash);
        let _ = writeln!(xml, "</ContentMeta>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_content(id_byte: u8) -> PackagedContentInfo {
        PackagedContentInfo {
            hash: HexData([id_byte; 0x20]),
            content_info: ContentInfo {
                id: ContentId::from([id_byte; 0x10]),
                size: 0x1000,
                content_attributes: 0,
                ty: NcmContentType::Program,
                id_offset: 0,
            },
        }
    }

    fn sample_meta() -> PackagedContentMeta {
        PackagedContentMeta {
            id: AnyId::from(0x0100000000010000),
            version: Version::from(0),
            ty: ContentMetaType::Application,
            field_d: 0,
            extended_header_size: 0x10,
            content_count: 1,
            content_meta_count: 0,
            attributes: ContentMetaAttribute::empty(),
            storage_id: StorageId::BuiltInUser,
            content_install_type: ContentInstallType::Full,
            install_state: ContentMetaInstallState::empty(),
            required_download_system_version: Version::from(0),
            extended_header: ExtendedMetaHeader::Application {
                patch_id: 0x0100000000010800u64.into(),
                required_system_version: Version::from(0),
                required_application_version: Version::from(0),
            },
            content_info: vec![sample_content(0xaa)],
            content_meta_info: vec![],
            extended_data: ExtendedData::None,
            hash: HexData([0xff; 0x20]),
        }
    }

    #[test]
    fn update_content_info_replaces_entry() {
        let mut meta = sample_meta();
        meta.update_content_info(0, sample_content(0xbb));
        assert_eq!(
            meta.content_info[0].content_info.id,
            ContentId::from([0xbb; 0x10])
        );
    }

    #[test]
    fn authoring_tool_xml_lists_every_content_entry_and_required_application() {
        let meta = sample_meta();
        let xml = meta.generate_authoring_tool_xml(5);

        assert!(xml.contains("<Type>Application</Type>"));
        assert!(xml.contains("<RequiredApplicationId>0x0100000000010800</RequiredApplicationId>"));
        assert!(xml.contains("<KeyGeneration>5</KeyGeneration>"));
        assert_eq!(xml.matches("<Content>").count(), 1);
    }

    #[test]
    fn authoring_tool_xml_omits_required_application_for_system_update() {
        let mut meta = sample_meta();
        meta.ty = ContentMetaType::SystemUpdate;
        meta.extended_header = ExtendedMetaHeader::SystemUpdate {
            extended_data_size: 0,
        };

        let xml = meta.generate_authoring_tool_xml(0);
        assert!(!xml.contains("<RequiredApplicationId>"));
    }
}

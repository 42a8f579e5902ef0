pub use binrw;

mod brw_utils;
pub mod crypto;
pub mod filesystem;
pub mod formats;
mod hexstring;
pub mod ids;
pub mod nsp;
pub mod storage;
pub mod switch_fs;
pub mod version;

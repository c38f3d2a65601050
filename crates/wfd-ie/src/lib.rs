//! Wi-Fi Display Information Element codec.
//!
//! WFD capability data is advertised inside 802.11 management frames as a
//! vendor-specific IE (element id `0xdd`, WFA OUI + type byte). The IE
//! payload is a stream of TLV sub-elements; a single sub-element may span
//! several consecutive IEs because one IE carries at most 251 payload bytes.
//!
//! [`encode`] serialises sub-elements into that layout, [`decode`]
//! reassembles them, and [`DeviceInfo`] covers the bit-packed device
//! information sub-element.

mod dev_info;
mod ie;

pub use dev_info::{DeviceInfo, DeviceInfoFlags, DeviceRole, DEFAULT_CTRL_PORT};
pub use ie::{decode, encode, Subelement, SubelementId, WFD_IE_DATA_MAX, WFD_IE_ID, WFD_IE_OUI_1_0};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IeError {
    #[error("buffer too short for IE header")]
    ShortBuffer,
    #[error("IE length {0} exceeds remaining input")]
    LengthOverflow(usize),
    #[error("unknown element id {0:#x}")]
    UnknownElementId(u8),
    #[error("unknown OUI {0:#010x}")]
    UnknownOui(u32),
    #[error("sub-element continued past the last IE")]
    TrailingContinuation,
    #[error("sub-element payload of {0} bytes does not match {1:?}")]
    SubelementSize(usize, SubelementId),
}

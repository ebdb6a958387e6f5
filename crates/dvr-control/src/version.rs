//! Config protocol version gate.

use std::ops::RangeInclusive;

use dvr_proto::protocol::{CMD_GET_VERSION, VERSION_MAX, VERSION_MIN};

use crate::error::IpcError;
use crate::transport::{Handle, Transport};

pub const SUPPORTED_VERSIONS: RangeInclusive<u32> = VERSION_MIN..=VERSION_MAX;

pub fn is_supported(version: u32) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// `"5 - 17"`, as shown next to a rejected version.
pub fn supported_range_label() -> String {
    format!("{} - {}", VERSION_MIN, VERSION_MAX)
}

/// Single read of the service's protocol version.  The service does not
/// propose alternatives.
pub fn get_version<T: Transport>(handle: &mut Handle<T>) -> Result<u32, IpcError> {
    handle.query_u32(CMD_GET_VERSION)
}

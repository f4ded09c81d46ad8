/// `b"glTF"` read as a little-endian `u32`.
pub const GLB_MAGIC: u32 = 0x4654_6C67;

/// Size of the fixed GLB header (magic, version, length).
pub const GLB_HEADER_LEN: usize = 12;

/// Cheap structural check on raw bytes: header present and magic matches.
///
/// Never panics; anything shorter than the header is rejected.
pub fn is_valid_container(bytes: &[u8]) -> bool {
    if bytes.len() < GLB_HEADER_LEN {
        return false;
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    magic == GLB_MAGIC
}

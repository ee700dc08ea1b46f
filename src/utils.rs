pub fn is_pow2(value: u32) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Replaces the 16-bit lane selected by bit 1 of `offset` inside `dword`.
pub fn merge_u16(dword: u32, offset: u8, value: u16) -> u32 {
    let shift = lane_shift(offset & 0x02);
    (dword & !(0xFFFF << shift)) | ((value as u32) << shift)
}

/// Replaces the byte lane selected by bits 1:0 of `offset` inside `dword`.
pub fn merge_u8(dword: u32, offset: u8, value: u8) -> u32 {
    let shift = lane_shift(offset & 0x03);
    (dword & !(0xFF << shift)) | ((value as u32) << shift)
}

pub fn extract_u16(dword: u32, offset: u8) -> u16 {
    (dword >> lane_shift(offset & 0x02)) as u16
}

pub fn extract_u8(dword: u32, offset: u8) -> u8 {
    (dword >> lane_shift(offset & 0x03)) as u8
}

fn lane_shift(byte_in_dword: u8) -> u32 {
    (byte_in_dword as u32) * 8
}

//! ## [Cyclic Encoding](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/9979fc01-0a3e-496f-900f-a6a867951f23)
//!
//! Used when the header declares [crate::ndb::header::CryptMethod::Cyclic]. The transform is
//! its own inverse, keyed by the low 32 bits of the block id.

use super::*;

/// Encode or decode external block data in place.
pub fn encode_decode_block(data: &mut [u8], key: u32) {
    let r_table = key_data_r();
    let s_table = key_data_s();
    let i_table = key_data_i();

    let mut key = (key ^ (key >> 16)) as u16;

    for b in data.iter_mut() {
        let low_key = key as u8;
        let high_key = (key >> 8) as u8;

        *b = (*b).wrapping_add(low_key);
        *b = r_table[usize::from(*b)];
        *b = (*b).wrapping_add(high_key);
        *b = s_table[usize::from(*b)];
        *b = (*b).wrapping_sub(high_key);
        *b = i_table[usize::from(*b)];
        *b = (*b).wrapping_sub(low_key);

        key = key.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Hello, World!";

    #[test]
    fn test_round_trip() {
        let mut data = SAMPLE.to_vec();
        encode_decode_block(&mut data, 0x1234_5678);
        assert_ne!(SAMPLE, &data);
        encode_decode_block(&mut data, 0x1234_5678);
        assert_eq!(SAMPLE, &data);
    }

    #[test]
    fn test_key_matters() {
        let mut first = SAMPLE.to_vec();
        let mut second = SAMPLE.to_vec();
        encode_decode_block(&mut first, 0x0000_0004);
        encode_decode_block(&mut second, 0x0000_0008);
        assert_ne!(first, second);
    }
}

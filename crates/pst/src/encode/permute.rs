//! ## [Permutative Encoding](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5faf4800-645d-49d1-9457-2ac40eb467bd)
//!
//! Used when the header declares [crate::ndb::header::CryptMethod::Permute].

use super::*;

/// Encode external block data in place.
pub fn encode_block(data: &mut [u8]) {
    substitute(data, key_data_r());
}

/// Decode external block data in place.
pub fn decode_block(data: &mut [u8]) {
    substitute(data, key_data_i());
}

fn substitute(data: &mut [u8], table: &[u8; 256]) {
    for b in data.iter_mut() {
        *b = table[usize::from(*b)];
    }
}

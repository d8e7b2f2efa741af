//! ## [Calculating dwCRC](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/c0e195ad-1ccb-4b1d-bd02-f8ebfc73b9ae)
//!
//! The PST CRC is the reflected CRC-32 (polynomial `0xEDB88320`) without the usual pre and post
//! inversion, so the running value is complemented around [crc32fast].

use crc32fast::Hasher;

/// Continue a PST CRC over `data`, starting from `crc` (0 for a fresh computation).
pub fn compute_crc(crc: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(!crc);
    hasher.update(data);
    !hasher.finalize()
}

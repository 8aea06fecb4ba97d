//! Size arithmetic shared by the allocator and the collection reports.
//!
//! Vector payloads are measured in vector cells ("vcells") of
//! [`VCELL_BYTES`] bytes each.

use static_assertions::const_assert_eq;

/// Bytes per vector cell
pub const VCELL_BYTES: usize = 8;

const_assert_eq!(VCELL_BYTES, std::mem::size_of::<u64>());

/// Round a byte count up to whole vector cells.
pub fn bytes_to_vcells(bytes: usize) -> usize {
    if bytes == 0 {
        0
    } else {
        1 + (bytes - 1) / VCELL_BYTES
    }
}

/// Megabytes, rounded up to one decimal place.
pub fn megabytes(bytes: f64) -> f64 {
    (10.0 * bytes / (1024.0 * 1024.0)).ceil() / 10.0
}

/// "X Gb", "X Mb" or "X Kb" for a block size in bytes.
///
/// Gigabytes and megabytes print one decimal; kilobytes print none.
pub fn format_block_size(bytes: f64) -> String {
    let kb = bytes / 1024.0;
    if kb > 1024.0 * 1024.0 {
        format!("{:.1} Gb", kb / 1024.0 / 1024.0)
    } else if kb > 1024.0 {
        format!("{:.1} Mb", kb / 1024.0)
    } else {
        format!("{:.0} Kb", kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_vcells_rounds_up() {
        assert_eq!(bytes_to_vcells(0), 0);
        assert_eq!(bytes_to_vcells(1), 1);
        assert_eq!(bytes_to_vcells(8), 1);
        assert_eq!(bytes_to_vcells(9), 2);
    }

    #[test]
    fn test_format_block_size_units() {
        assert_eq!(format_block_size(10.0 * 1024.0 * 1024.0), "10.0 Mb");
        assert_eq!(format_block_size(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 Gb");
        assert_eq!(format_block_size(2048.0), "2 Kb");
    }

    #[test]
    fn test_megabytes_rounds_up() {
        assert_eq!(megabytes(1024.0 * 1024.0), 1.0);
        assert_eq!(megabytes(1.0), 0.1);
    }
}

// qfiles.rs — map format limits the light subsystem sizes its tables by

// ============================================================
// Upper bounds on map sizes
// ============================================================

pub const MAX_MAP_PLANES: usize = 65536;
pub const MAX_MAP_NODES: usize = 65536;
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_FACES: usize = 65536;
pub const MAX_MAP_LEAFFACES: usize = 65536;
pub const MAX_MAP_VISIBILITY: usize = 0x100000;

/// Bytes needed for one uncompressed row of leaf visibility bits.
pub const fn vis_row_bytes(numleafs: usize) -> usize {
    numleafs.div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vis_row_bytes() {
        assert_eq!(vis_row_bytes(0), 0);
        assert_eq!(vis_row_bytes(1), 1);
        assert_eq!(vis_row_bytes(8), 1);
        assert_eq!(vis_row_bytes(9), 2);
        assert_eq!(vis_row_bytes(MAX_MAP_LEAFS), MAX_MAP_LEAFS / 8);
    }
}

// rt_model.rs — read-only view of the BSP world used for light placement

use rtgrid_common::q_shared::*;
use rtgrid_common::qfiles::*;

pub const SURF_PLANEBACK: i32 = 2;

// ============================================================
// In-memory representation
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MNode {
    pub plane: usize,
    /// Non-negative values index `nodes`; negative values are `-1 - leaf`.
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MLeaf {
    pub minmaxs: [f32; 6],
    pub first_mark_surface: usize,
    pub num_mark_surfaces: usize,
    /// Offset of this leaf's compressed visibility row in `WorldModel::visdata`.
    /// None means the map carries no vis data for it.
    pub vis_offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MSurface {
    pub plane: usize,
    pub flags: i32,
    /// Local-space bounds of the polygon.
    pub mins: Vec3,
    pub maxs: Vec3,
}

/// Leaf 0 is the shared solid leaf; real leafs are `1..=num_leafs()`.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    pub name: String,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub planes: Vec<CPlane>,
    pub nodes: Vec<MNode>,
    pub leafs: Vec<MLeaf>,
    pub surfaces: Vec<MSurface>,
    pub mark_surfaces: Vec<usize>,
    pub visdata: Vec<u8>,
}

impl WorldModel {
    /// Number of leafs not counting the solid leaf 0.
    pub fn num_leafs(&self) -> usize {
        self.leafs.len().saturating_sub(1)
    }

    pub fn num_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    /// Cross-check every index the light code follows.
    pub fn validate(&self) -> Result<(), String> {
        if self.leafs.is_empty() {
            return Err(format!("{}: world has no leafs", self.name));
        }
        let limits = [
            ("planes", self.planes.len(), MAX_MAP_PLANES),
            ("nodes", self.nodes.len(), MAX_MAP_NODES),
            ("leafs", self.num_leafs(), MAX_MAP_LEAFS),
            ("surfaces", self.surfaces.len(), MAX_MAP_FACES),
            ("mark surfaces", self.mark_surfaces.len(), MAX_MAP_LEAFFACES),
            ("vis bytes", self.visdata.len(), MAX_MAP_VISIBILITY),
        ];
        for (what, count, max) in limits {
            if count > max {
                return Err(format!("{}: too many {} ({} > {})", self.name, what, count, max));
            }
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.plane >= self.planes.len() {
                return Err(format!("{}: node {} has bad plane {}", self.name, i, node.plane));
            }
            for &child in &node.children {
                let ok = if child >= 0 {
                    (child as usize) < self.nodes.len()
                } else {
                    ((-1 - child) as usize) < self.leafs.len()
                };
                if !ok {
                    return Err(format!("{}: node {} has bad child {}", self.name, i, child));
                }
            }
        }

        for (i, leaf) in self.leafs.iter().enumerate() {
            if leaf.first_mark_surface + leaf.num_mark_surfaces > self.mark_surfaces.len() {
                return Err(format!("{}: leaf {} mark surfaces out of range", self.name, i));
            }
            if let Some(ofs) = leaf.vis_offset {
                if ofs > self.visdata.len() {
                    return Err(format!("{}: leaf {} vis offset {} out of range", self.name, i, ofs));
                }
            }
        }

        if let Some(&bad) = self.mark_surfaces.iter().find(|&&s| s >= self.surfaces.len()) {
            return Err(format!("{}: mark surface {} out of range", self.name, bad));
        }

        if let Some(i) = self.surfaces.iter().position(|s| s.plane >= self.planes.len()) {
            return Err(format!("{}: surface {} has bad plane", self.name, i));
        }

        Ok(())
    }

    /// Empty for unknown leafs and for spans past the mark surface table.
    pub fn leaf_mark_surfaces(&self, leaf: usize) -> &[usize] {
        self.leafs
            .get(leaf)
            .and_then(|l| self.mark_surfaces.get(l.first_mark_surface..l.first_mark_surface + l.num_mark_surfaces))
            .unwrap_or(&[])
    }

    pub fn surface_plane(&self, surf: &MSurface) -> Option<&CPlane> {
        self.planes.get(surf.plane)
    }

    /// Walk the BSP tree down to the leaf containing `p`.
    pub fn point_in_leaf(&self, p: &Vec3) -> usize {
        if self.nodes.is_empty() {
            // Single-leaf world
            return if self.leafs.len() > 1 { 1 } else { 0 };
        }

        let mut node = 0usize;
        // A well-formed tree never revisits a node
        for _ in 0..=self.nodes.len() {
            let n = &self.nodes[node];
            let d = self.planes[n.plane].distance(p);
            let child = if d > 0.0 { n.children[0] } else { n.children[1] };
            if child < 0 {
                return (-1 - child) as usize;
            }
            node = child as usize;
        }
        0
    }

    /// Leafs potentially visible from `leaf`, decoded from its compressed row.
    pub fn pvs_leafs(&self, leaf: usize) -> PvsLeafs<'_> {
        let numleafs = self.num_leafs();
        match self.leafs.get(leaf).and_then(|l| l.vis_offset) {
            // An offset past the vis lump sees nothing
            Some(ofs) => PvsLeafs::compressed(self.visdata.get(ofs..).unwrap_or(&[]), numleafs),
            None => PvsLeafs::all(numleafs),
        }
    }
}

// ============================================================
// PVS row decoding
// ============================================================

/// Iterates leaf indices (1-based) set in a run-length encoded vis row.
///
/// A zero byte is followed by a count of zero bytes it stands for, so it
/// skips `count * 8` leafs. Any other byte carries visibility bits for the
/// next 8 leafs, least significant bit first. Bit `i` names leaf `i + 1`.
pub struct PvsLeafs<'a> {
    data: &'a [u8],
    pos: usize,
    numleafs: usize,
    /// Leaf bit index of the next unread byte.
    next_base: usize,
    /// Bit index of bit 0 in `bits`.
    base: usize,
    bits: u8,
    /// No vis data: every leaf is visible.
    fullvis: bool,
}

impl<'a> PvsLeafs<'a> {
    pub fn compressed(data: &'a [u8], numleafs: usize) -> Self {
        Self {
            data,
            pos: 0,
            numleafs,
            next_base: 0,
            base: 0,
            bits: 0,
            fullvis: false,
        }
    }

    pub fn all(numleafs: usize) -> Self {
        Self {
            data: &[],
            pos: 0,
            numleafs,
            next_base: 0,
            base: 0,
            bits: 0,
            fullvis: true,
        }
    }
}

impl Iterator for PvsLeafs<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.fullvis {
            if self.next_base >= self.numleafs {
                return None;
            }
            self.next_base += 1;
            return Some(self.next_base);
        }

        loop {
            if self.bits != 0 {
                let k = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1;
                let index = self.base + k;
                if index >= self.numleafs {
                    // Padding bits past the last leaf
                    self.bits = 0;
                    self.next_base = self.numleafs;
                    continue;
                }
                return Some(index + 1);
            }

            if self.next_base >= self.numleafs || self.pos >= self.data.len() {
                return None;
            }

            let b = self.data[self.pos];
            if b == 0 {
                let skip = *self.data.get(self.pos + 1)? as usize;
                self.next_base += skip * 8;
                self.pos += 2;
                continue;
            }

            self.bits = b;
            self.base = self.next_base;
            self.next_base += 8;
            self.pos += 1;
        }
    }
}

/// Test a bit of an uncompressed leaf bitset.
#[inline]
pub fn check_vis_bit(vis: &[u8], i: usize) -> bool {
    vis.get(i >> 3).is_some_and(|&b| b & (1 << (i & 7)) != 0)
}

// ============================================================
// Tests
// ============================================================

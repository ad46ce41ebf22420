// test_support.rs — synthetic worlds and a service double for unit tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use parking_lot::Mutex;
use rtgrid_common::common::{com_begin_redirect, com_end_redirect};
use rtgrid_common::q_shared::*;

use crate::rt_local::*;
use crate::rt_model::*;

static CAPTURE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Run `f` with console output redirected and return what it printed.
/// Captures are serialized since the redirect buffer is global.
pub fn capture_output(f: impl FnOnce()) -> String {
    let _guard = CAPTURE_LOCK.lock();
    com_begin_redirect();
    f();
    com_end_redirect().unwrap_or_default()
}

/// Four 128-unit leafs in a row along +x, all 128 units tall and wide.
///
/// ```text
///   leaf:   1        2        3        4
///   x:    0..128  128..256 256..384 384..512
/// ```
///
/// PVS: each leaf sees itself and its direct neighbours.
/// Surfaces:
/// - 0: floor of leaf 1 (z = 0, facing up)
/// - 1: end wall at x = 512, facing -x (stored with SURF_PLANEBACK)
/// - 2: floor shared by leafs 2 and 3
pub fn corridor_world() -> WorldModel {
    let planes = vec![
        CPlane::new([1.0, 0.0, 0.0], 128.0),
        CPlane::new([1.0, 0.0, 0.0], 256.0),
        CPlane::new([1.0, 0.0, 0.0], 384.0),
        CPlane::new([0.0, 0.0, 1.0], 0.0),
        CPlane::new([1.0, 0.0, 0.0], 512.0),
    ];

    let nodes = vec![
        MNode {
            plane: 1,
            children: [2, 1],
        },
        MNode {
            plane: 0,
            children: [-3, -2],
        },
        MNode {
            plane: 2,
            children: [-5, -4],
        },
    ];

    let mut leafs = vec![MLeaf::default()];
    for i in 0..4usize {
        let x0 = i as f32 * 128.0;
        leafs.push(MLeaf {
            minmaxs: [x0, 0.0, 0.0, x0 + 128.0, 128.0, 128.0],
            first_mark_surface: i,
            num_mark_surfaces: 1,
            vis_offset: Some(i),
        });
    }

    let surfaces = vec![
        MSurface {
            plane: 3,
            flags: 0,
            mins: [16.0, 16.0, 0.0],
            maxs: [112.0, 112.0, 0.0],
        },
        MSurface {
            plane: 4,
            flags: SURF_PLANEBACK,
            mins: [512.0, 0.0, 0.0],
            maxs: [512.0, 128.0, 128.0],
        },
        MSurface {
            plane: 3,
            flags: 0,
            mins: [200.0, 0.0, 0.0],
            maxs: [300.0, 128.0, 0.0],
        },
    ];

    WorldModel {
        name: "maps/corridor.bsp".to_string(),
        mins: [0.0, 0.0, 0.0],
        maxs: [512.0, 128.0, 128.0],
        planes,
        nodes,
        leafs,
        surfaces,
        mark_surfaces: vec![0, 2, 2, 1],
        visdata: vec![0x03, 0x07, 0x0e, 0x0c],
    }
}

/// Service double with call counters.
#[derive(Default)]
pub struct TestServices {
    pub textures: HashMap<String, usize>,
    pub files: HashMap<String, Vec<u8>>,
    /// Returned verbatim by every fat PVS query.
    pub fat_pvs_bits: Vec<u8>,
    pub fat_pvs_calls: Cell<usize>,
    pub last_fat_pvs: Cell<Option<(Vec3, f32)>>,
    pub loaded: RefCell<Vec<String>>,
}

impl TestServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texture(mut self, name: &str, id: usize) -> Self {
        self.textures.insert(name.to_string(), id);
        self
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn with_fat_pvs(mut self, bits: &[u8]) -> Self {
        self.fat_pvs_bits = bits.to_vec();
        self
    }
}

impl LightServices for TestServices {
    fn texture_lookup(&self, name: &str) -> Option<usize> {
        self.textures.get(name).copied()
    }

    fn texture_name(&self, texture: usize) -> Option<String> {
        self.textures
            .iter()
            .find(|(_, &id)| id == texture)
            .map(|(name, _)| name.clone())
    }

    fn load_file(&self, path: &str) -> Option<Vec<u8>> {
        self.loaded.borrow_mut().push(path.to_string());
        self.files.get(path).cloned()
    }

    fn fat_pvs(&self, origin: &Vec3, radius: f32, _merge: bool, _fullvis: bool) -> Vec<u8> {
        self.fat_pvs_calls.set(self.fat_pvs_calls.get() + 1);
        self.last_fat_pvs.set(Some((*origin, radius)));
        self.fat_pvs_bits.clone()
    }
}

pub fn point_entity(origin: Vec3, color: Vec3) -> LightEntity {
    LightEntity {
        light_type: LightType::Point,
        origin,
        color,
        radius: 16.0,
        ..Default::default()
    }
}

pub fn world_geometry(surf: usize, texture: usize, kusok_index: u32) -> RenderGeometry {
    RenderGeometry {
        surf: Some(surf),
        texture,
        material: Material::Regular,
        emissive: [0.0; 3],
        kusok_index,
    }
}

pub fn assert_vec3_near(a: Vec3, b: Vec3) {
    for i in 0..3 {
        assert!((a[i] - b[i]).abs() < 1e-4, "{:?} != {:?}", a, b);
    }
}

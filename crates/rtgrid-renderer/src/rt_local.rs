// rt_local.rs — limits, light types and external services for the ray-traced light grid

use rtgrid_common::common::com_printf_level;
pub use rtgrid_common::common::{PRINT_ALERT, PRINT_ALL, PRINT_DEVELOPER};
pub use rtgrid_common::q_shared::{Matrix3x4, Vec3, MATRIX3X4_IDENTITY, MAX_LIGHTSTYLES};

// ============================================================
// Limits
// ============================================================

/// Edge length of one light grid cell in world units.
pub const LIGHT_GRID_CELL_SIZE: f32 = 128.0;
/// Upper bound on grid cells; also sizes the GPU grid buffer.
pub const MAX_LIGHT_CLUSTERS: usize = 262144;

pub const MAX_POINT_LIGHTS: usize = 256;
pub const MAX_EMISSIVE_SURFACES: usize = 256;

// Per-cell capacities. Counts are stored as bytes on the GPU side.
pub const MAX_VISIBLE_POINT_LIGHTS: usize = 31;
pub const MAX_VISIBLE_SURFACE_LIGHTS: usize = 255;

pub const MAX_TEXTURES: usize = 4096;
pub const MAX_DLIGHTS: usize = 32;

/// See DIRECT_SCALE in the level compiler's lightmap stage.
pub const RAD_DIRECT_SCALE: f32 = 0.1;

// ============================================================
// Point / spot / environment lights
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LightFlags: u32 {
        /// Directional sun-like light.
        const ENVIRONMENT = 0x00000001;
    }
}

/// One entry of the point light array. Its index is what cells store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub origin: Vec3,
    pub radius: f32,
    /// Color before lightstyle scaling.
    pub base_color: Vec3,
    pub color: Vec3,
    /// Zero for omnidirectional lights.
    pub dir: Vec3,
    pub stopdot: f32,
    pub stopdot2: f32,
    /// Negative means no style.
    pub lightstyle: i32,
    pub flags: LightFlags,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            radius: 0.0,
            base_color: [0.0; 3],
            color: [0.0; 3],
            dir: [0.0; 3],
            stopdot: -1.0,
            stopdot2: -1.0,
            lightstyle: -1,
            flags: LightFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissiveSurface {
    pub kusok_index: u32,
    pub emissive: Vec3,
    pub transform: Matrix3x4,
}

// ============================================================
// Map entity data (parsed elsewhere)
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LightType {
    #[default]
    Point,
    Spot,
    Environment,
}

impl LightType {
    pub fn label(self) -> &'static str {
        match self {
            LightType::Point => "point",
            LightType::Spot => "spot",
            LightType::Environment => "environment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEntity {
    pub light_type: LightType,
    pub origin: Vec3,
    pub color: Vec3,
    pub dir: Vec3,
    pub stopdot: f32,
    pub stopdot2: f32,
    /// Zero or negative selects the default radius.
    pub radius: f32,
    pub style: i32,
}

impl Default for LightEntity {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            origin: [0.0; 3],
            color: [0.0; 3],
            dir: [0.0; 3],
            stopdot: -1.0,
            stopdot2: -1.0,
            radius: 0.0,
            style: 0,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PatchSurfaceFlags: u32 {
        const EMISSIVE = 0x00000001;
    }
}

/// Per-surface override loaded from a map patch file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PatchSurface {
    pub flags: PatchSurfaceFlags,
    pub emissive: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct MapEntities {
    pub lights: Vec<LightEntity>,
    /// The one environment light that reaches every cell, if the map has exactly one.
    pub single_environment_index: Option<usize>,
    /// Wad names referenced by the worldspawn entity, in declaration order.
    pub wadlist: Vec<String>,
    /// Indexed by world surface.
    pub patch_surfaces: Option<Vec<PatchSurface>>,
}

// ============================================================
// Render geometry handed over by the brush model builder
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Material {
    #[default]
    Regular,
    Emissive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderGeometry {
    /// World surface this chunk was built from. None for non-brush models.
    pub surf: Option<usize>,
    /// Current (possibly animated) texture id.
    pub texture: usize,
    pub material: Material,
    pub emissive: Vec3,
    pub kusok_index: u32,
}

// ============================================================
// Transient lights
// ============================================================

/// Engine-managed short-lived light (muzzle flash, explosion, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DLight {
    pub origin: Vec3,
    /// 0..255 per channel.
    pub color: Vec3,
    pub radius: f32,
    pub die: f32,
    pub key: i32,
}

/// Everything the frame supplies to finalize.
#[derive(Debug, Clone, Copy)]
pub struct FrameLights<'a> {
    pub time: f32,
    /// Current brightness per style, 255 = full.
    pub lightstyles: &'a [i32],
    pub dlights: &'a [DLight],
}

// ============================================================
// External services
// ============================================================

/// Services the light system consumes from the rest of the renderer.
pub trait LightServices {
    fn texture_lookup(&self, name: &str) -> Option<usize>;

    /// Used only for trace output.
    fn texture_name(&self, _texture: usize) -> Option<String> {
        None
    }

    fn load_file(&self, path: &str) -> Option<Vec<u8>>;

    /// Leaf visibility bitset for a sphere. Bit `i` is leaf `i + 1`.
    fn fat_pvs(&self, origin: &Vec3, radius: f32, merge: bool, fullvis: bool) -> Vec<u8>;
}

// ============================================================
// Console output
// ============================================================

pub fn vid_printf(level: i32, msg: &str) {
    com_printf_level(level, msg);
}

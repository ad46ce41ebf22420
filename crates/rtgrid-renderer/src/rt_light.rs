// rt_light.rs — light registry and per-frame lifecycle for the ray-traced light grid

use std::sync::Arc;

use rtgrid_common::com_error_throttled;
use rtgrid_common::common::{com_dprintf, com_printf};
use rtgrid_common::cvar::{cvar_get, cvar_variable_string, CVAR_ARCHIVE};
use rtgrid_common::q_shared::*;

use crate::rt_dlight::{convert_dlight, live_dlights, Flashlight};
use crate::rt_leaf_vis::{point_light_leafs, LeafAccum, LeafCacheStats, SurfaceLeafCache};
use crate::rt_light_grid::{ClusterBitMap, GridGeometry, LightCells};
use crate::rt_lights_dump::{DumpRequest, LightsDump};
use crate::rt_local::*;
use crate::rt_model::{MLeaf, WorldModel, SURF_PLANEBACK};
use crate::rt_rad::EmissiveTextureTable;

/// Radius given to static lights that do not specify one.
const STATIC_LIGHT_DEFAULT_RADIUS: f32 = 2.0;
const THROTTLE_SECS: u64 = 10;
/// Bucket width of the emissive occupancy histogram printed by the dump.
const HISTOGRAM_GROUP: usize = 4;

// ============================================================
// Configuration
// ============================================================

pub const CVAR_LIGHTS_DLIGHTS: &str = "rt_lights_dlights";
pub const CVAR_LIGHTS_CULL_MOVING: &str = "rt_lights_cull_moving";
pub const CVAR_LIGHTS_VERBOSE: &str = "rt_lights_verbose";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightsConfig {
    /// Ingest engine dlights at frame finalize.
    pub dlights: bool,
    /// Apply the plane-side cull to moving emissive surfaces as well.
    pub cull_moving: bool,
    /// Trace leaf collection for every static surface.
    pub verbose: bool,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            dlights: true,
            cull_moving: false,
            verbose: false,
        }
    }
}

fn cvar_flag(name: &str, default: bool) -> bool {
    let value = cvar_variable_string(name);
    if value.is_empty() {
        return default;
    }
    value.trim().parse::<f32>().map_or(default, |v| v != 0.0)
}

impl LightsConfig {
    pub fn register_cvars() {
        cvar_get(CVAR_LIGHTS_DLIGHTS, "1", CVAR_ARCHIVE);
        cvar_get(CVAR_LIGHTS_CULL_MOVING, "0", CVAR_ARCHIVE);
        cvar_get(CVAR_LIGHTS_VERBOSE, "0", 0);
    }

    /// Current cvar values; unregistered cvars keep their defaults.
    pub fn from_cvars() -> Self {
        let defaults = Self::default();
        Self {
            dlights: cvar_flag(CVAR_LIGHTS_DLIGHTS, defaults.dlights),
            cull_moving: cvar_flag(CVAR_LIGHTS_CULL_MOVING, defaults.cull_moving),
            verbose: cvar_flag(CVAR_LIGHTS_VERBOSE, defaults.verbose),
        }
    }
}

// ============================================================
// State and statistics
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LightsState {
    #[default]
    MapUnloaded,
    MapLoaded,
    FrameActive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightStats {
    pub static_point_lights: usize,
    pub static_emissive_surfaces: usize,
    pub point_lights: usize,
    pub emissive_surfaces: usize,
    pub dlights: usize,
    pub flashlights: usize,
    /// Lights rejected because the point light array was full.
    pub dropped_lights: usize,
    /// Surfaces rejected because the emissive surface array was full.
    pub dropped_surfaces: usize,
    /// Surfaces cut by the one-byte count at finalize.
    pub clamped_surfaces: usize,
    pub point_slot_overflows: usize,
    pub surface_slot_overflows: usize,
    pub leaf_cache: LeafCacheStats,
}

// ============================================================
// Geometry helpers
// ============================================================

/// Conservative test whether an emissive surface can light a box.
/// False only when the whole box is behind the surface.
pub fn can_surface_light_affect_aabb(plane: &CPlane, surf_flags: i32, minmaxs: &[f32; 6]) -> bool {
    let bbox_center = [
        (minmaxs[0] + minmaxs[3]) * 0.5,
        (minmaxs[1] + minmaxs[4]) * 0.5,
        (minmaxs[2] + minmaxs[5]) * 0.5,
    ];

    let mut bbox_plane_dist = plane.distance(&bbox_center);
    if surf_flags & SURF_PLANEBACK != 0 {
        bbox_plane_dist = -bbox_plane_dist;
    }

    if bbox_plane_dist >= 0.0 {
        return true;
    }

    // Farthest a box corner can be from its center
    let size = [minmaxs[3] - minmaxs[0], minmaxs[4] - minmaxs[1], minmaxs[5] - minmaxs[2]];
    let plane_dist_guard_sqr = dot_product(&size, &size) * 0.25;

    bbox_plane_dist * bbox_plane_dist <= plane_dist_guard_sqr
}

/// Move a plane by a rigid transform.
fn transform_plane(plane: &CPlane, transform: &Matrix3x4) -> CPlane {
    let normal = matrix3x4_rotate_vector(transform, &plane.normal);
    let origin = matrix3x4_origin(transform);
    CPlane::new(normal, plane.dist + dot_product(&normal, &origin))
}

/// Absolute cells a leaf overlaps for light insertion, clipped to the grid.
/// Upper bounds are exclusive.
fn light_cell_range(grid: &GridGeometry, minmaxs: &[f32; 6]) -> ([i32; 3], [i32; 3]) {
    let mut lo = [0i32; 3];
    let mut hi = [0i32; 3];
    for i in 0..3 {
        lo[i] = ((minmaxs[i] / LIGHT_GRID_CELL_SIZE).floor() as i32).max(grid.min_cell[i]);
        hi[i] = ((minmaxs[i + 3] / LIGHT_GRID_CELL_SIZE).ceil() as i32).min(grid.min_cell[i] + grid.size[i]);
    }
    (lo, hi)
}

/// Like `light_cell_range`, but a leaf ending exactly on a cell boundary
/// also reaches into the next cell.
fn surface_cell_range(grid: &GridGeometry, minmaxs: &[f32; 6]) -> ([i32; 3], [i32; 3]) {
    let mut lo = [0i32; 3];
    let mut hi = [0i32; 3];
    for i in 0..3 {
        lo[i] = ((minmaxs[i] / LIGHT_GRID_CELL_SIZE).floor() as i32).max(grid.min_cell[i]);
        hi[i] = ((minmaxs[i + 3] / LIGHT_GRID_CELL_SIZE).floor() as i32)
            .saturating_add(1)
            .min(grid.min_cell[i] + grid.size[i]);
    }
    (lo, hi)
}

fn cell_minmaxs(x: i32, y: i32, z: i32) -> [f32; 6] {
    [
        x as f32 * LIGHT_GRID_CELL_SIZE,
        y as f32 * LIGHT_GRID_CELL_SIZE,
        z as f32 * LIGHT_GRID_CELL_SIZE,
        (x + 1) as f32 * LIGHT_GRID_CELL_SIZE,
        (y + 1) as f32 * LIGHT_GRID_CELL_SIZE,
        (z + 1) as f32 * LIGHT_GRID_CELL_SIZE,
    ]
}

/// Insert point light `index` into every cell `leaf` overlaps that the
/// bitmap has not seen yet. Returns the number of cells that took it.
fn add_light_to_leaf_cells(
    grid: &GridGeometry,
    cells: &mut LightCells,
    bitmap: &mut ClusterBitMap,
    stats: &mut LightStats,
    leaf: &MLeaf,
    index: usize,
) -> usize {
    let (lo, hi) = light_cell_range(grid, &leaf.minmaxs);
    let mut added = 0;

    for x in lo[0]..hi[0] {
        for y in lo[1]..hi[1] {
            for z in lo[2]..hi[2] {
                let cell_index = grid.world_cell_index(x, y, z);
                if cell_index < 0 {
                    continue;
                }
                let cell_index = cell_index as usize;
                if !bitmap.check_or_set(cell_index) {
                    continue;
                }

                if cells.add_point_light(cell_index, index) {
                    added += 1;
                } else {
                    stats.point_slot_overflows += 1;
                    let c = grid.cell_coords(cell_index);
                    com_error_throttled!(
                        THROTTLE_SECS,
                        "Cluster {},{},{}({}) ran out of light slots",
                        c[0],
                        c[1],
                        c[2],
                        cell_index
                    );
                }
            }
        }
    }

    added
}

// ============================================================
// Light system
// ============================================================

/// Owns the grid, the light arrays and every cache derived from the
/// current map. Static contributions are inserted once per map and kept
/// as a baseline that every frame rewinds to.
pub struct LightSystem {
    state: LightsState,
    config: LightsConfig,

    /// Validated in `new_map`; None while no map is loaded.
    world: Option<Arc<WorldModel>>,

    grid: GridGeometry,
    cells: LightCells,
    bitmap: ClusterBitMap,
    leaf_cache: SurfaceLeafCache,
    accum: LeafAccum,

    point_lights: Vec<PointLight>,
    num_static_point_lights: usize,
    emissive_surfaces: Vec<EmissiveSurface>,
    num_static_emissive_surfaces: usize,

    emissive_textures: EmissiveTextureTable,
    patch_surfaces: Vec<PatchSurface>,

    dump: Arc<LightsDump>,
    trace: Option<DumpRequest>,

    stats: LightStats,
    static_stats: LightStats,
}

impl Default for LightSystem {
    fn default() -> Self {
        Self::new(Arc::new(LightsDump::default()))
    }
}

impl LightSystem {
    pub fn new(dump: Arc<LightsDump>) -> Self {
        Self {
            state: LightsState::MapUnloaded,
            config: LightsConfig::default(),
            world: None,
            grid: GridGeometry::default(),
            cells: LightCells::default(),
            bitmap: ClusterBitMap::default(),
            leaf_cache: SurfaceLeafCache::default(),
            accum: LeafAccum::with_capacity(0),
            point_lights: Vec::with_capacity(MAX_POINT_LIGHTS),
            num_static_point_lights: 0,
            emissive_surfaces: Vec::with_capacity(MAX_EMISSIVE_SURFACES),
            num_static_emissive_surfaces: 0,
            emissive_textures: EmissiveTextureTable::default(),
            patch_surfaces: Vec::new(),
            dump,
            trace: None,
            stats: LightStats::default(),
            static_stats: LightStats::default(),
        }
    }

    // ========================================================
    // Accessors
    // ========================================================

    pub fn state(&self) -> LightsState {
        self.state
    }

    pub fn config(&self) -> LightsConfig {
        self.config
    }

    pub fn set_config(&mut self, config: LightsConfig) {
        self.config = config;
    }

    pub fn world(&self) -> Option<&WorldModel> {
        self.world.as_deref()
    }

    pub fn grid(&self) -> &GridGeometry {
        &self.grid
    }

    pub fn cells(&self) -> &LightCells {
        &self.cells
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    pub fn emissive_surfaces(&self) -> &[EmissiveSurface] {
        &self.emissive_surfaces
    }

    pub fn num_static_point_lights(&self) -> usize {
        self.num_static_point_lights
    }

    pub fn num_static_emissive_surfaces(&self) -> usize {
        self.num_static_emissive_surfaces
    }

    pub fn stats(&self) -> LightStats {
        self.stats
    }

    pub fn emissive_textures(&self) -> &EmissiveTextureTable {
        &self.emissive_textures
    }

    pub fn emissive_for_texture(&self, texture: usize) -> Vec3 {
        self.emissive_textures.emissive_for_texture(texture)
    }

    /// True between a frame init that picked up a dump request and the
    /// matching finalize.
    pub fn is_dumping(&self) -> bool {
        self.trace.is_some()
    }

    fn tracing(&self, label: &str) -> bool {
        self.trace.as_ref().is_some_and(|t| t.matches(label))
    }

    fn refresh_stats(&mut self) {
        self.stats.point_lights = self.point_lights.len();
        self.stats.emissive_surfaces = self.emissive_surfaces.len();
        self.stats.leaf_cache = self.leaf_cache.stats();
    }

    // ========================================================
    // Map lifecycle
    // ========================================================

    /// Size the grid for `world` and drop everything from the previous map.
    /// Every later operation runs against this world.
    pub fn new_map(&mut self, world: Arc<WorldModel>) -> Result<(), String> {
        self.unload_map();

        world.validate()?;
        let grid = GridGeometry::compute(&world.mins, &world.maxs, LIGHT_GRID_CELL_SIZE)
            .map_err(|e| format!("{}: {}", world.name, e))?;

        com_dprintf(&format!(
            "Map mins:({}, {}, {}), maxs:({}, {}, {}), min_cell:({}, {}, {}) cells:({}, {}, {}); total: {}\n",
            world.mins[0],
            world.mins[1],
            world.mins[2],
            world.maxs[0],
            world.maxs[1],
            world.maxs[2],
            grid.min_cell[0],
            grid.min_cell[1],
            grid.min_cell[2],
            grid.size[0],
            grid.size[1],
            grid.size[2],
            grid.cells
        ));

        self.grid = grid;
        self.cells.reset(grid.cells);
        self.bitmap.reset(grid.cells);
        self.leaf_cache.reset(&world);
        self.accum = LeafAccum::with_capacity(world.leafs.len());
        self.world = Some(world);
        self.state = LightsState::MapLoaded;
        Ok(())
    }

    pub fn unload_map(&mut self) {
        self.state = LightsState::MapUnloaded;
        self.world = None;
        self.grid = GridGeometry::default();
        self.cells.reset(0);
        self.bitmap.reset(0);
        self.point_lights.clear();
        self.emissive_surfaces.clear();
        self.num_static_point_lights = 0;
        self.num_static_emissive_surfaces = 0;
        self.emissive_textures.clear();
        self.patch_surfaces.clear();
        self.trace = None;
        self.stats = LightStats::default();
        self.static_stats = LightStats::default();
    }

    /// Insert every light the map itself provides and record the result as
    /// the baseline frames rewind to.
    pub fn load_static_lights(
        &mut self,
        entities: &MapEntities,
        geometries: &[RenderGeometry],
        services: &dyn LightServices,
    ) {
        let Some(world) = self.world.clone() else {
            com_printf("load_static_lights: no map loaded\n");
            return;
        };

        self.point_lights.clear();
        self.emissive_surfaces.clear();
        self.num_static_point_lights = 0;
        self.num_static_emissive_surfaces = 0;
        self.cells.clear_counts();
        self.stats = LightStats::default();
        self.patch_surfaces = entities.patch_surfaces.clone().unwrap_or_default();

        self.process_static_point_lights(&world.name, entities);

        self.emissive_textures.load_rad_data(services, &world.name, &entities.wadlist);

        for geom in geometries {
            self.add_emissive_surface(geom, &MATRIX3X4_IDENTITY, true, services);
        }

        self.num_static_point_lights = self.point_lights.len();
        self.num_static_emissive_surfaces = self.emissive_surfaces.len();
        self.cells.snapshot_static();

        self.stats.static_point_lights = self.num_static_point_lights;
        self.stats.static_emissive_surfaces = self.num_static_emissive_surfaces;
        self.refresh_stats();
        self.static_stats = self.stats;
        self.state = LightsState::MapLoaded;

        com_dprintf(&format!(
            "{}: {} static lights, {} emissive surfaces, {} emissive textures\n",
            world.name,
            self.num_static_point_lights,
            self.num_static_emissive_surfaces,
            self.emissive_textures.num_set()
        ));
    }

    fn process_static_point_lights(&mut self, map_name: &str, entities: &MapEntities) {
        for (i, le) in entities.lights.iter().enumerate() {
            let radius = if le.radius > 0.0 {
                le.radius
            } else {
                STATIC_LIGHT_DEFAULT_RADIUS
            };

            let index = match le.light_type {
                LightType::Point => self.add_point_light(&le.origin, &le.color, radius, le.style, 1.0),
                LightType::Spot | LightType::Environment => {
                    let all_clusters = entities.single_environment_index == Some(i);
                    self.add_spot_light(le, radius, le.style, 1.0, all_clusters)
                }
            };

            if index.is_none() {
                let remaining = entities.lights.len() - i - 1;
                self.stats.dropped_lights += remaining;
                com_printf(&format!(
                    "WARNING: {}: skipping {} remaining static lights\n",
                    map_name, remaining
                ));
                break;
            }
        }
    }

    // ========================================================
    // Point, spot and environment lights
    // ========================================================

    /// Omnidirectional light. None when the light array is full or no map is loaded.
    pub fn add_point_light(
        &mut self,
        origin: &Vec3,
        color: &Vec3,
        radius: f32,
        lightstyle: i32,
        attenuation: f32,
    ) -> Option<usize> {
        let base_color = vector_scale(color, attenuation);
        let light = PointLight {
            origin: *origin,
            radius,
            base_color,
            color: base_color,
            lightstyle,
            ..Default::default()
        };
        self.insert_point_light(light, LightType::Point.label(), false)
    }

    /// Cone light. With `all_clusters` the light skips visibility and goes
    /// into every cell of the grid.
    pub fn add_spot_light(
        &mut self,
        le: &LightEntity,
        radius: f32,
        lightstyle: i32,
        attenuation: f32,
        all_clusters: bool,
    ) -> Option<usize> {
        self.insert_spot_light(le, radius, lightstyle, attenuation, all_clusters, le.light_type.label())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_spot_light(
        &mut self,
        le: &LightEntity,
        radius: f32,
        lightstyle: i32,
        attenuation: f32,
        all_clusters: bool,
        label: &str,
    ) -> Option<usize> {
        let base_color = vector_scale(&le.color, attenuation);
        let flags = if le.light_type == LightType::Environment {
            LightFlags::ENVIRONMENT
        } else {
            LightFlags::empty()
        };

        let light = PointLight {
            origin: le.origin,
            radius,
            base_color,
            color: base_color,
            dir: le.dir,
            stopdot: le.stopdot,
            stopdot2: le.stopdot2,
            lightstyle,
            flags,
        };
        self.insert_point_light(light, label, all_clusters)
    }

    fn insert_point_light(
        &mut self,
        light: PointLight,
        label: &str,
        all_clusters: bool,
    ) -> Option<usize> {
        let Some(world) = self.world.clone() else {
            com_dprintf(&format!("{} light ignored: no map loaded\n", label));
            return None;
        };

        let index = self.point_lights.len();
        if index >= MAX_POINT_LIGHTS {
            self.stats.dropped_lights += 1;
            com_error_throttled!(THROTTLE_SECS, "Too many lights, MAX_POINT_LIGHTS={}", MAX_POINT_LIGHTS);
            return None;
        }

        let tracing = self.tracing(label);
        if tracing {
            vid_printf(
                PRINT_ALL,
                &format!(
                    "{} light {}: origin=({} {} {}) R={} color=({} {} {}) dir=({} {} {})\n",
                    label,
                    index,
                    light.origin[0],
                    light.origin[1],
                    light.origin[2],
                    light.radius,
                    light.base_color[0],
                    light.base_color[1],
                    light.base_color[2],
                    light.dir[0],
                    light.dir[1],
                    light.dir[2]
                ),
            );
        }

        self.point_lights.push(light);

        let (leafs, cells) = if all_clusters {
            (world.num_leafs(), self.add_point_light_to_all_clusters(index))
        } else {
            self.add_point_light_to_clusters(&world, index)
        };

        if tracing {
            vid_printf(PRINT_ALL, &format!("  {} leafs, {} cells\n", leafs, cells));
        }

        Some(index)
    }

    /// Cells of every leaf in the PVS of the light's leaf. Returns (leafs, cells).
    fn add_point_light_to_clusters(&mut self, world: &WorldModel, index: usize) -> (usize, usize) {
        let origin = self.point_lights[index].origin;
        let leafs = point_light_leafs(world, &mut self.accum, &origin);

        self.bitmap.clear();
        let mut cells = 0;
        for &leaf in leafs {
            let Some(leaf) = world.leafs.get(leaf as usize) else {
                continue;
            };
            cells += add_light_to_leaf_cells(&self.grid, &mut self.cells, &mut self.bitmap, &mut self.stats, leaf, index);
        }

        (leafs.len(), cells)
    }

    fn add_point_light_to_all_clusters(&mut self, index: usize) -> usize {
        let mut cells = 0;
        for cell_index in 0..self.cells.len() {
            if self.cells.add_point_light(cell_index, index) {
                cells += 1;
            } else {
                self.stats.point_slot_overflows += 1;
                com_error_throttled!(THROTTLE_SECS, "Cluster {} ran out of light slots", cell_index);
            }
        }
        cells
    }

    // ========================================================
    // Emissive surfaces
    // ========================================================

    /// Per-surface patch first, then an emissive material, then the RAD table.
    fn resolve_emissive(&self, geom: &RenderGeometry, surf: usize) -> Option<Vec3> {
        if let Some(patch) = self
            .patch_surfaces
            .get(surf)
            .filter(|p| p.flags.contains(PatchSurfaceFlags::EMISSIVE))
        {
            return Some(patch.emissive);
        }

        if geom.material == Material::Emissive {
            return Some(geom.emissive);
        }

        self.emissive_textures.get(geom.texture)
    }

    /// Register a render geometry chunk as a light source if it emits.
    ///
    /// Static world surfaces use the memoized leaf sets and are culled
    /// against their plane per leaf and per cell. Moving surfaces use a
    /// sphere PVS query; they are plane-culled only when
    /// `LightsConfig::cull_moving` is set.
    pub fn add_emissive_surface(
        &mut self,
        geom: &RenderGeometry,
        transform: &Matrix3x4,
        static_map: bool,
        services: &dyn LightServices,
    ) -> Option<usize> {
        let world = self.world.clone()?;

        // Only brush surfaces can emit
        let surf = geom.surf?;
        let Some((surface, plane)) = world
            .surfaces
            .get(surf)
            .and_then(|s| world.surface_plane(s).map(|plane| (s, *plane)))
        else {
            com_dprintf(&format!("Emissive geometry references bad surface {}\n", surf));
            return None;
        };

        let emissive = self.resolve_emissive(geom, surf)?;
        if vector_is_zero(&emissive) {
            if static_map {
                com_dprintf(&format!(
                    "Surface {} got zero emissive color, not adding as a light source\n",
                    surf
                ));
            }
            return None;
        }

        let index = self.emissive_surfaces.len();
        if index >= MAX_EMISSIVE_SURFACES {
            self.stats.dropped_surfaces += 1;
            com_error_throttled!(
                THROTTLE_SECS,
                "Too many emissive surfaces, MAX_EMISSIVE_SURFACES={}",
                MAX_EMISSIVE_SURFACES
            );
            return None;
        }

        let tracing = match &self.trace {
            Some(request) => {
                let label = services
                    .texture_name(geom.texture)
                    .unwrap_or_else(|| format!("texture {}", geom.texture));
                let matched = request.matches(&label);
                if matched {
                    vid_printf(
                        PRINT_ALL,
                        &format!(
                            "surface light {}: {} ({} {} {})\n",
                            index, label, emissive[0], emissive[1], emissive[2]
                        ),
                    );
                }
                matched
            }
            None => false,
        };

        self.emissive_surfaces.push(EmissiveSurface {
            kusok_index: geom.kusok_index,
            emissive,
            transform: *transform,
        });

        let cull_plane = if static_map {
            Some(plane)
        } else if self.config.cull_moving {
            Some(transform_plane(&plane, transform))
        } else {
            None
        };

        let verbose = self.config.verbose;
        let leafs: &[u32] = if static_map {
            self.leaf_cache.static_surface_leafs(&world, &mut self.accum, surf, verbose)
        } else {
            self.leaf_cache
                .moving_surface_leafs(&world, services, &mut self.accum, surf, transform, tracing)
        };

        self.bitmap.clear();
        let mut cells = 0;
        for &leaf_index in leafs {
            let Some(leaf) = world.leafs.get(leaf_index as usize) else {
                continue;
            };

            if let Some(plane) = &cull_plane {
                if !can_surface_light_affect_aabb(plane, surface.flags, &leaf.minmaxs) {
                    continue;
                }
            }

            let (lo, hi) = surface_cell_range(&self.grid, &leaf.minmaxs);
            for x in lo[0]..hi[0] {
                for y in lo[1]..hi[1] {
                    for z in lo[2]..hi[2] {
                        let cell_index = self.grid.world_cell_index(x, y, z);
                        if cell_index < 0 {
                            continue;
                        }
                        let cell_index = cell_index as usize;
                        if !self.bitmap.check_or_set(cell_index) {
                            continue;
                        }

                        if let Some(plane) = &cull_plane {
                            if !can_surface_light_affect_aabb(plane, surface.flags, &cell_minmaxs(x, y, z)) {
                                continue;
                            }
                        }

                        if self.cells.add_surface_light(cell_index, index) {
                            cells += 1;
                        } else {
                            self.stats.surface_slot_overflows += 1;
                            let c = self.grid.cell_coords(cell_index);
                            com_error_throttled!(
                                THROTTLE_SECS,
                                "Cluster {},{},{}({}) ran out of emissive surfaces slots",
                                c[0],
                                c[1],
                                c[2],
                                cell_index
                            );
                        }
                    }
                }
            }
        }

        if tracing {
            vid_printf(PRINT_ALL, &format!("  {} leafs, {} cells\n", leafs.len(), cells));
        }

        Some(index)
    }

    // ========================================================
    // Flashlights
    // ========================================================

    pub fn add_flashlight(&mut self, flashlight: &Flashlight) -> Option<usize> {
        let le = flashlight.light_entity();
        let index = self.insert_spot_light(&le, flashlight.radius(), 0, 1.0, false, "flashlight");
        if index.is_some() {
            self.stats.flashlights += 1;
        }
        index
    }

    // ========================================================
    // Frame lifecycle
    // ========================================================

    /// Drop last frame's dynamic lights by rewinding to the static baseline.
    pub fn frame_init(&mut self) {
        if self.state == LightsState::MapUnloaded {
            return;
        }

        self.point_lights.truncate(self.num_static_point_lights);
        self.emissive_surfaces.truncate(self.num_static_emissive_surfaces);
        self.cells.rewind();
        self.stats = self.static_stats;

        self.trace = self.dump.take();
        if let Some(request) = &self.trace {
            match &request.filter {
                Some(filter) => vid_printf(PRINT_ALL, &format!("Light dump for \"{}\":\n", filter)),
                None => vid_printf(PRINT_ALL, "Light dump:\n"),
            }
        }

        self.state = LightsState::FrameActive;
    }

    /// Close the frame: clamp the surface count, apply lightstyles and add
    /// the engine's live dlights.
    pub fn frame_finalize(&mut self, frame: &FrameLights) {
        if self.state == LightsState::MapUnloaded {
            return;
        }

        let max_surfaces = u8::MAX as usize;
        if self.emissive_surfaces.len() > max_surfaces {
            com_error_throttled!(
                THROTTLE_SECS,
                "Too many emissive surfaces found: {}; some areas will be dark",
                self.emissive_surfaces.len()
            );
            self.stats.clamped_surfaces += self.emissive_surfaces.len() - max_surfaces;
            self.emissive_surfaces.truncate(max_surfaces);
        }

        self.apply_lightstyles(frame.lightstyles);

        if self.config.dlights {
            for dl in live_dlights(frame.dlights, frame.time) {
                let Some(converted) = convert_dlight(dl) else {
                    continue;
                };
                let light = PointLight {
                    origin: converted.origin,
                    radius: converted.radius,
                    base_color: converted.color,
                    color: converted.color,
                    ..Default::default()
                };
                if self.insert_point_light(light, "dlight", false).is_some() {
                    self.stats.dlights += 1;
                }
            }
        }

        self.refresh_stats();

        if self.trace.is_some() {
            self.print_grid_stats();
        }
        self.trace = None;
    }

    /// Style 0 and negative styles keep their base color.
    fn apply_lightstyles(&mut self, lightstyles: &[i32]) {
        for light in &mut self.point_lights {
            if light.lightstyle <= 0 || light.lightstyle as usize >= MAX_LIGHTSTYLES {
                continue;
            }
            let Some(&value) = lightstyles.get(light.lightstyle as usize) else {
                continue;
            };
            light.color = vector_scale(&light.base_color, value as f32 / 255.0);
        }
    }

    fn print_grid_stats(&self) {
        vid_printf(
            PRINT_ALL,
            &format!("Emissive surfaces found: {}\n", self.emissive_surfaces.len()),
        );

        let histogram = self.cells.emissive_histogram(HISTOGRAM_GROUP);
        vid_printf(PRINT_ALL, &format!("Built {} light clusters. Stats:\n", self.grid.cells));
        vid_printf(PRINT_ALL, &format!("  0: {}\n", histogram[0]));
        for (i, count) in histogram.iter().enumerate().skip(1) {
            vid_printf(
                PRINT_ALL,
                &format!("  {}-{}: {}\n", (i - 1) * HISTOGRAM_GROUP, i * HISTOGRAM_GROUP - 1, count),
            );
        }
    }
}

// ============================================================
// Tests
// ============================================================

// rt_upload.rs — byte layouts the ray tracing shaders read the light data from

use rtgrid_common::q_shared::Matrix3x4;

use crate::rt_light::LightSystem;
use crate::rt_light_grid::{GridGeometry, LightCell, LightCells};
use crate::rt_local::*;

// ============================================================
// Layouts
// ============================================================

/// Precedes the cell array in the light grid buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLightGridHeader {
    /// xyz plus one padding element.
    pub min_cell: [i32; 4],
    pub size: [i32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuEmissiveHeader {
    pub num_kusochki: u32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuEmissiveKusok {
    pub kusok_index: u32,
    pub pad: [u32; 3],
    pub emissive_color: [f32; 3],
    pub pad2: f32,
    pub transform: Matrix3x4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPointLightsHeader {
    pub num_point_lights: u32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPointLight {
    /// xyz origin, w radius
    pub origin_r: [f32; 4],
    /// rgb current color, w inner cone cosine
    pub color_stopdot: [f32; 4],
    /// xyz direction, w outer cone cosine
    pub dir_stopdot2: [f32; 4],
    pub flags: u32,
    pub pad: [u32; 3],
}

const _: () = {
    assert!(std::mem::size_of::<GpuLightGridHeader>() == 28);
    assert!(std::mem::size_of::<GpuEmissiveHeader>() == 16);
    assert!(std::mem::size_of::<GpuEmissiveKusok>() == 80);
    assert!(std::mem::size_of::<GpuPointLight>() == 64);
};

impl From<&EmissiveSurface> for GpuEmissiveKusok {
    fn from(esurf: &EmissiveSurface) -> Self {
        Self {
            kusok_index: esurf.kusok_index,
            emissive_color: esurf.emissive,
            transform: esurf.transform,
            ..Default::default()
        }
    }
}

impl From<&PointLight> for GpuPointLight {
    fn from(light: &PointLight) -> Self {
        Self {
            origin_r: [light.origin[0], light.origin[1], light.origin[2], light.radius],
            color_stopdot: [light.color[0], light.color[1], light.color[2], light.stopdot],
            dir_stopdot2: [light.dir[0], light.dir[1], light.dir[2], light.stopdot2],
            flags: light.flags.bits(),
            pad: [0; 3],
        }
    }
}

// ============================================================
// Buffer sizes
// ============================================================

pub const fn light_grid_buffer_size(num_cells: usize) -> usize {
    std::mem::size_of::<GpuLightGridHeader>() + num_cells * std::mem::size_of::<LightCell>()
}

pub const fn emissive_buffer_size(num_surfaces: usize) -> usize {
    std::mem::size_of::<GpuEmissiveHeader>() + num_surfaces * std::mem::size_of::<GpuEmissiveKusok>()
}

pub const fn point_lights_buffer_size(num_lights: usize) -> usize {
    std::mem::size_of::<GpuPointLightsHeader>() + num_lights * std::mem::size_of::<GpuPointLight>()
}

// ============================================================
// Writers
// ============================================================

/// Copy `bytes` into `dst` at `offset`. Returns the end offset.
fn write_bytes(dst: &mut [u8], offset: usize, bytes: &[u8], what: &str) -> Result<usize, String> {
    let end = offset + bytes.len();
    let Some(out) = dst.get_mut(offset..end) else {
        return Err(format!("{}: destination holds {} bytes, need {}", what, dst.len(), end));
    };
    out.copy_from_slice(bytes);
    Ok(end)
}

/// Grid header followed by every cell. Returns bytes written.
pub fn write_light_grid(dst: &mut [u8], grid: &GridGeometry, cells: &LightCells) -> Result<usize, String> {
    if cells.len() != grid.cells || grid.cells > MAX_LIGHT_CLUSTERS {
        return Err(format!(
            "light grid: {} cells for a grid of {} (max {})",
            cells.len(),
            grid.cells,
            MAX_LIGHT_CLUSTERS
        ));
    }

    let needed = light_grid_buffer_size(grid.cells);
    if dst.len() < needed {
        return Err(format!("light grid: destination holds {} bytes, need {}", dst.len(), needed));
    }

    let header = GpuLightGridHeader {
        min_cell: [grid.min_cell[0], grid.min_cell[1], grid.min_cell[2], 0],
        size: grid.size,
    };
    let ofs = write_bytes(dst, 0, bytemuck::bytes_of(&header), "light grid")?;
    write_bytes(dst, ofs, bytemuck::cast_slice(cells.cells()), "light grid")
}

/// Count followed by one record per emissive surface.
pub fn write_emissive_surfaces(dst: &mut [u8], surfaces: &[EmissiveSurface]) -> Result<usize, String> {
    if surfaces.len() > MAX_EMISSIVE_SURFACES {
        return Err(format!(
            "emissive surfaces: {} exceeds {}",
            surfaces.len(),
            MAX_EMISSIVE_SURFACES
        ));
    }

    let header = GpuEmissiveHeader {
        num_kusochki: surfaces.len() as u32,
        pad: [0; 3],
    };
    let mut ofs = write_bytes(dst, 0, bytemuck::bytes_of(&header), "emissive surfaces")?;
    for esurf in surfaces {
        let kusok = GpuEmissiveKusok::from(esurf);
        ofs = write_bytes(dst, ofs, bytemuck::bytes_of(&kusok), "emissive surfaces")?;
    }
    Ok(ofs)
}

/// Count followed by one record per point light.
pub fn write_point_lights(dst: &mut [u8], lights: &[PointLight]) -> Result<usize, String> {
    if lights.len() > MAX_POINT_LIGHTS {
        return Err(format!("point lights: {} exceeds {}", lights.len(), MAX_POINT_LIGHTS));
    }

    let gpu: Vec<GpuPointLight> = lights.iter().map(GpuPointLight::from).collect();
    let header = GpuPointLightsHeader {
        num_point_lights: lights.len() as u32,
        pad: [0; 3],
    };
    let ofs = write_bytes(dst, 0, bytemuck::bytes_of(&header), "point lights")?;
    write_bytes(dst, ofs, bytemuck::cast_slice(&gpu), "point lights")
}

/// Upload everything a finalized frame produced.
pub fn write_frame(
    lights: &LightSystem,
    grid_dst: &mut [u8],
    emissive_dst: &mut [u8],
    point_lights_dst: &mut [u8],
) -> Result<(), String> {
    write_light_grid(grid_dst, lights.grid(), lights.cells())?;
    write_emissive_surfaces(emissive_dst, lights.emissive_surfaces())?;
    write_point_lights(point_lights_dst, lights.point_lights())?;
    Ok(())
}

// ============================================================
// Tests
// ============================================================

#![allow(clippy::too_many_arguments, clippy::needless_range_loop,
         clippy::manual_range_contains, clippy::float_cmp,
         clippy::comparison_chain, clippy::type_complexity)]
// Ray-traced light clustering: spatial grid of per-cell light lists

pub mod rt_local;
pub mod rt_model;

// Grid and visibility
pub mod rt_light_grid;
pub mod rt_leaf_vis;

// Light sources
pub mod rt_rad;
pub mod rt_dlight;
pub mod rt_light;

// GPU side
pub mod rt_upload;

// Console
pub mod rt_lights_dump;

#[cfg(test)]
mod test_support;

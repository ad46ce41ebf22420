#![allow(clippy::needless_range_loop, clippy::manual_range_contains, clippy::float_cmp)]
// Engine services shared by every subsystem: console output, cvars,
// console commands, shared math and BSP limits.

pub mod q_shared;
pub mod qfiles;
pub mod common;
pub mod throttle;
pub mod cvar;
pub mod cmd;

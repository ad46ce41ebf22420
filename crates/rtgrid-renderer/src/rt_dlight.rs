// rt_dlight.rs — transient engine lights and player flashlights as grid lights

use rtgrid_common::q_shared::*;

use crate::rt_local::*;

/// Reference radius dlights are shrunk to.
pub const DLIGHT_RADIUS: f32 = 2.0;
/// Brightness a converted dlight keeps at `DLIGHT_RADIUS`.
pub const DLIGHT_THRESHOLD: f32 = 1.0;

/// Fraction of the hemisphere a sphere of radius `r` covers from distance `d`.
pub fn solid_angle_factor(r: f32, d: f32) -> f32 {
    if d <= r {
        return 1.0;
    }
    1.0 - (d * d - r * r).sqrt() / d
}

/// A dlight rescaled into a small point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedDLight {
    pub origin: Vec3,
    pub color: Vec3,
    pub radius: f32,
}

/// Skip dim or tiny dlights; scale the rest so their brightness at the
/// reference radius matches what the full-size sphere gave.
pub fn convert_dlight(dl: &DLight) -> Option<ConvertedDLight> {
    let max_comp = vector_max(&dl.color);
    if max_comp < DLIGHT_THRESHOLD || dl.radius <= DLIGHT_RADIUS {
        return None;
    }

    let scaler = DLIGHT_THRESHOLD / (max_comp * solid_angle_factor(DLIGHT_RADIUS, dl.radius));

    Some(ConvertedDLight {
        origin: dl.origin,
        color: vector_scale(&dl.color, scaler),
        radius: DLIGHT_RADIUS,
    })
}

/// Dlights still alive at `time`, in engine order, at most `MAX_DLIGHTS`.
pub fn live_dlights(dlights: &[DLight], time: f32) -> impl Iterator<Item = &DLight> {
    dlights
        .iter()
        .take(MAX_DLIGHTS)
        .filter(move |dl| dl.die >= time && dl.radius != 0.0)
}

// ============================================================
// Flashlights
// ============================================================

const FLASHLIGHT_LOCAL_RADIUS: f32 = 1.0;
const FLASHLIGHT_LOCAL_INTENSITY: f32 = 400.0;
const FLASHLIGHT_REMOTE_RADIUS: f32 = 10.0;
const FLASHLIGHT_REMOTE_INTENSITY: f32 = 60.0;

const FLASHLIGHT_COLOR: Vec3 = [255.0, 255.0, 210.0];
const FLASHLIGHT_INNER_DEGREES: f32 = 1.0;
const FLASHLIGHT_OUTER_DEGREES: f32 = 32.5;

/// Player model pitch is stored divided by this.
const PLAYER_PITCH_SCALE: f32 = 9.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flashlight {
    pub origin: Vec3,
    pub dir: Vec3,
    pub local_player: bool,
}

impl Flashlight {
    /// First person: slightly left of and in front of the eye.
    pub fn local(vieworg: &Vec3, forward: &Vec3, right: &Vec3) -> Self {
        let mut origin = vector_ma(vieworg, -6.0, right);
        origin = vector_ma(&origin, 14.0, forward);
        origin[2] += 2.0;

        Self {
            origin,
            dir: *forward,
            local_player: true,
        }
    }

    /// Another player. `origin` is already traced against the world by the caller.
    pub fn remote(origin: &Vec3, entity_angles: &Vec3, state_pitch: f32) -> Self {
        let mut angles = [0.0f32; 3];
        angles[PITCH] = state_pitch * PLAYER_PITCH_SCALE;
        angles[YAW] = entity_angles[YAW];
        angles[ROLL] = 0.0;
        let (forward, _, _) = angle_vectors(&angles);

        Self {
            origin: *origin,
            dir: forward,
            local_player: false,
        }
    }

    pub fn radius(&self) -> f32 {
        if self.local_player {
            FLASHLIGHT_LOCAL_RADIUS
        } else {
            FLASHLIGHT_REMOTE_RADIUS
        }
    }

    pub fn intensity(&self) -> f32 {
        if self.local_player {
            FLASHLIGHT_LOCAL_INTENSITY
        } else {
            FLASHLIGHT_REMOTE_INTENSITY
        }
    }

    /// Spot light entity for this flashlight.
    pub fn light_entity(&self) -> LightEntity {
        let mut color = vector_scale(&FLASHLIGHT_COLOR, self.intensity() / 255.0);

        // Same brightness curve the level compiler applies to light entities
        let max = vector_max(&color);
        let l1 = max * max / 10.0;
        color = vector_scale(&color, l1);

        LightEntity {
            light_type: LightType::Spot,
            origin: self.origin,
            color,
            dir: self.dir,
            stopdot: FLASHLIGHT_INNER_DEGREES.to_radians().cos(),
            stopdot2: FLASHLIGHT_OUTER_DEGREES.to_radians().cos(),
            radius: self.radius(),
            style: 0,
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn test_solid_angle_factor_distant() {
        let f = solid_angle_factor(2.0, 100.0);
        assert!((f - 0.0002).abs() < 1e-5, "{}", f);
    }

    #[test]
    fn test_solid_angle_factor_grows_towards_one() {
        assert!(solid_angle_factor(2.0, 4.0) > solid_angle_factor(2.0, 40.0));
        assert_eq!(solid_angle_factor(2.0, 2.0), 1.0);
        assert_eq!(solid_angle_factor(2.0, 1.0), 1.0);
    }

    #[test]
    fn test_convert_dlight_skips_dim_and_small() {
        let dim = DLight {
            color: [0.5, 0.9, 0.2],
            radius: 200.0,
            ..Default::default()
        };
        assert!(convert_dlight(&dim).is_none());

        let small = DLight {
            color: [255.0, 255.0, 255.0],
            radius: 2.0,
            ..Default::default()
        };
        assert!(convert_dlight(&small).is_none());
    }

    #[test]
    fn test_convert_dlight_scales_to_threshold() {
        let dl = DLight {
            origin: [10.0, 20.0, 30.0],
            color: [255.0, 128.0, 0.0],
            radius: 100.0,
            ..Default::default()
        };
        let c = convert_dlight(&dl).unwrap();
        assert_eq!(c.origin, dl.origin);
        assert_eq!(c.radius, DLIGHT_RADIUS);

        let brightness = vector_max(&c.color) * solid_angle_factor(DLIGHT_RADIUS, dl.radius);
        assert!((brightness - DLIGHT_THRESHOLD).abs() < 1e-3, "{}", brightness);
        // hue preserved
        assert!((c.color[1] / c.color[0] - 128.0 / 255.0).abs() < 1e-4);
        assert_eq!(c.color[2], 0.0);
    }

    #[test]
    fn test_live_dlights_filter() {
        let mut dlights = vec![
            DLight {
                radius: 100.0,
                die: 5.0,
                key: 1,
                ..Default::default()
            },
            DLight {
                radius: 100.0,
                die: 1.0,
                key: 2,
                ..Default::default()
            },
            DLight {
                radius: 0.0,
                die: 5.0,
                key: 3,
                ..Default::default()
            },
        ];
        let keys: Vec<i32> = live_dlights(&dlights, 2.0).map(|d| d.key).collect();
        assert_eq!(keys, vec![1]);

        // Only the first MAX_DLIGHTS slots are considered
        dlights.clear();
        for key in 0..(MAX_DLIGHTS as i32 + 4) {
            dlights.push(DLight {
                radius: 50.0,
                die: 10.0,
                key,
                ..Default::default()
            });
        }
        assert_eq!(live_dlights(&dlights, 0.0).count(), MAX_DLIGHTS);
    }

    #[test]
    fn test_local_flashlight_placement() {
        let forward = [1.0, 0.0, 0.0];
        let right = [0.0, -1.0, 0.0];
        let f = Flashlight::local(&[100.0, 0.0, 50.0], &forward, &right);
        assert_vec3_near(f.origin, [114.0, 6.0, 52.0]);
        assert_eq!(f.dir, forward);
        assert_eq!(f.radius(), 1.0);
    }

    #[test]
    fn test_remote_flashlight_direction() {
        // Yaw 90 looks down +y; stored pitch is scaled up by 9
        let f = Flashlight::remote(&[0.0; 3], &[0.0, 90.0, 45.0], 0.0);
        assert_vec3_near(f.dir, [0.0, 1.0, 0.0]);
        assert!(!f.local_player);
        assert_eq!(f.radius(), 10.0);

        let down = Flashlight::remote(&[0.0; 3], &[0.0, 0.0, 0.0], 10.0).dir;
        // pitch 90 points straight down
        assert_vec3_near(down, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_flashlight_entity() {
        let f = Flashlight::local(&[0.0; 3], &[1.0, 0.0, 0.0], &[0.0, -1.0, 0.0]);
        let le = f.light_entity();
        assert_eq!(le.light_type, LightType::Spot);
        assert!((le.stopdot - 1.0f32.to_radians().cos()).abs() < 1e-6);
        assert!((le.stopdot2 - 32.5f32.to_radians().cos()).abs() < 1e-6);
        assert!(le.stopdot > le.stopdot2);

        let base = 255.0 * 400.0 / 255.0;
        let scale = base * base / 10.0;
        assert!((le.color[0] - base * scale).abs() / (base * scale) < 1e-5);
        assert!((le.color[2] / le.color[0] - 210.0 / 255.0).abs() < 1e-5);
    }
}

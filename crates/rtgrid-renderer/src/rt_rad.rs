// rt_rad.rs — RAD light override files: which textures emit light and how much

use rtgrid_common::common::{com_dprintf, com_printf};
use rtgrid_common::q_shared::*;

use crate::rt_local::*;

pub const GLOBAL_RAD_FILE: &str = "maps/lights.rad";

// ============================================================
// Parsing
// ============================================================

/// One accepted line of a RAD file.
#[derive(Debug, Clone, PartialEq)]
pub struct RadEntry {
    pub wad: Option<String>,
    pub texture: String,
    /// Final emissive color, already multiplied by `RAD_DIRECT_SCALE`.
    pub color: Vec3,
    /// False when the line gave zero intensity, which disables the texture.
    pub enabled: bool,
}

/// Number of leading fields a `"%s %f %f %f %f"` scan would fill.
fn scan_fields(tokens: &[&str]) -> (usize, [f32; 4]) {
    let mut values = [0.0f32; 4];
    let mut num = if tokens.is_empty() { 0 } else { 1 };
    for (i, tok) in tokens.iter().skip(1).take(4).enumerate() {
        match tok.parse::<f32>() {
            Ok(v) => {
                values[i] = v;
                num += 1;
            }
            Err(_) => break,
        }
    }
    (num, values)
}

/// Parse one line. Comment lines and malformed lines give None.
pub fn parse_rad_line(line: &str) -> Option<RadEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let name = *tokens.first()?;

    if name.contains("//") {
        return None;
    }

    let (num, v) = scan_fields(&tokens);
    com_dprintf(&format!("raw rad entry ({}): {}\n", num, line.trim()));

    let (r, g, b) = match num {
        2 => (v[0], v[0], v[0]),
        4 => (v[0], v[1], v[2]),
        5 => {
            let scale = v[3] / 255.0;
            (v[0] * scale, v[1] * scale, v[2] * scale)
        }
        _ => {
            com_printf(&format!("skipping rad entry {}\n", name));
            return None;
        }
    };

    let (wad, texture) = match name.split_once('/') {
        Some((wad, texture)) => (Some(wad.to_string()), texture.to_string()),
        None => (None, name.to_string()),
    };

    Some(RadEntry {
        wad,
        texture,
        color: vector_scale(&[r, g, b], RAD_DIRECT_SCALE),
        enabled: r != 0.0 || g != 0.0 || b != 0.0,
    })
}

pub fn parse_rad(text: &str) -> Vec<RadEntry> {
    text.lines().filter_map(parse_rad_line).collect()
}

/// Resolve an entry to a texture id: texture embedded in the map first,
/// then the wad named by the entry, then every wad the map references.
pub fn resolve_rad_texture(
    services: &dyn LightServices,
    map_name: &str,
    wadlist: &[String],
    entry: &RadEntry,
) -> Option<usize> {
    if let Some(id) = services.texture_lookup(&format!("#{}:{}.mip", map_name, entry.texture)) {
        return Some(id);
    }

    if let Some(wad) = &entry.wad {
        if let Some(id) = services.texture_lookup(&format!("{}.wad/{}.mip", wad, entry.texture)) {
            return Some(id);
        }
    }

    wadlist
        .iter()
        .find_map(|wad| services.texture_lookup(&format!("{}/{}.mip", wad, entry.texture)))
}

/// Per-map RAD file: the map path with a trailing ".bsp" replaced by ".rad".
pub fn map_rad_file(map_name: &str) -> String {
    let stem = match map_name.len().checked_sub(4) {
        Some(cut) if map_name.is_char_boundary(cut) && map_name[cut..].eq_ignore_ascii_case(".bsp") => {
            &map_name[..cut]
        }
        _ => map_name,
    };
    format!("{}.rad", stem)
}

// ============================================================
// Emissive texture table
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmissiveTexture {
    pub emissive: Vec3,
    pub set: bool,
}

#[derive(Debug, Clone)]
pub struct EmissiveTextureTable {
    textures: Vec<EmissiveTexture>,
}

impl Default for EmissiveTextureTable {
    fn default() -> Self {
        Self {
            textures: vec![EmissiveTexture::default(); MAX_TEXTURES],
        }
    }
}

impl EmissiveTextureTable {
    pub fn clear(&mut self) {
        self.textures.fill(EmissiveTexture::default());
    }

    pub fn set(&mut self, texture: usize, emissive: Vec3, enabled: bool) -> bool {
        match self.textures.get_mut(texture) {
            Some(etex) => {
                etex.emissive = emissive;
                etex.set = enabled;
                true
            }
            None => false,
        }
    }

    /// Emissive color if the texture is marked emissive.
    pub fn get(&self, texture: usize) -> Option<Vec3> {
        self.textures.get(texture).filter(|t| t.set).map(|t| t.emissive)
    }

    /// Table color or zero.
    pub fn emissive_for_texture(&self, texture: usize) -> Vec3 {
        self.get(texture).unwrap_or([0.0; 3])
    }

    pub fn num_set(&self) -> usize {
        self.textures.iter().filter(|t| t.set).count()
    }

    /// Load one RAD file into the table. Returns false if the file is missing.
    pub fn load_rad_file(
        &mut self,
        services: &dyn LightServices,
        map_name: &str,
        wadlist: &[String],
        path: &str,
    ) -> bool {
        let Some(buffer) = services.load_file(path) else {
            com_printf(&format!(
                "ERROR: Couldn't load RAD data from file {}, the map will be completely black\n",
                path
            ));
            return false;
        };

        com_dprintf(&format!("Loading RAD data from file {}\n", path));

        let text = String::from_utf8_lossy(&buffer);
        for entry in parse_rad(&text) {
            let Some(tex_id) = resolve_rad_texture(services, map_name, wadlist, &entry) else {
                com_dprintf(&format!("rad entry {}: texture not found\n", entry.texture));
                continue;
            };

            if !self.set(tex_id, entry.color, entry.enabled) {
                com_printf(&format!(
                    "rad entry {}: texture id {} out of range (max {})\n",
                    entry.texture, tex_id, MAX_TEXTURES
                ));
                continue;
            }

            if !entry.enabled {
                com_dprintf(&format!("rad entry {} disabled due to zero intensity\n", entry.texture));
            }
        }

        true
    }

    /// Reset, then apply the global file followed by the map's own file.
    pub fn load_rad_data(&mut self, services: &dyn LightServices, map_name: &str, wadlist: &[String]) {
        self.clear();
        self.load_rad_file(services, map_name, wadlist, GLOBAL_RAD_FILE);
        self.load_rad_file(services, map_name, wadlist, &map_rad_file(map_name));
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    // ============================================================
    // Line parsing
    // ============================================================

    #[test]
    fn test_rad_rgb_with_scale() {
        let e = parse_rad_line("WALL01 128 64 32 255").unwrap();
        assert_eq!(e.texture, "WALL01");
        assert_eq!(e.wad, None);
        assert_vec3_near(e.color, [12.8, 6.4, 3.2]);
        assert!(e.enabled);
    }

    #[test]
    fn test_rad_gray() {
        let e = parse_rad_line("WALL02 100").unwrap();
        assert_vec3_near(e.color, [10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_rad_rgb_only() {
        let e = parse_rad_line("  ~LIGHT3A 10 20 30\r").unwrap();
        assert_eq!(e.texture, "~LIGHT3A");
        assert_vec3_near(e.color, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rad_half_scale() {
        let e = parse_rad_line("lamp 200 200 200 127.5").unwrap();
        assert_vec3_near(e.color, [10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_rad_comment_ignored() {
        assert!(parse_rad_line("// comment WALL03 1 2 3 4").is_none());
        assert!(parse_rad("// comment WALL03 1 2 3 4").is_empty());
        assert!(parse_rad_line("foo//bar 1 2 3").is_none());
    }

    #[test]
    fn test_rad_three_tokens_skipped() {
        let out = capture_output(|| {
            assert!(parse_rad_line("WALL04 1 2").is_none());
        });
        assert!(out.contains("skipping rad entry WALL04\n"), "{}", out);
        assert!(parse_rad("WALL04 1 2").is_empty());
    }

    #[test]
    fn test_rad_non_numeric_field_stops_scan() {
        // Only the name and one number scan, so this reads as gray
        let e = parse_rad_line("WALL05 50 x 7 8").unwrap();
        assert_vec3_near(e.color, [5.0, 5.0, 5.0]);
        // Name alone
        assert!(parse_rad_line("WALL06").is_none());
        assert!(parse_rad_line("   ").is_none());
    }

    #[test]
    fn test_rad_wad_prefix() {
        let e = parse_rad_line("halflife/+0~FIFTS_LGHT01 255 255 255 200").unwrap();
        assert_eq!(e.wad.as_deref(), Some("halflife"));
        assert_eq!(e.texture, "+0~FIFTS_LGHT01");
    }

    #[test]
    fn test_rad_zero_disables() {
        let e = parse_rad_line("DARK 0 0 0").unwrap();
        assert!(!e.enabled);
    }

    #[test]
    fn test_parse_rad_multiple_lines() {
        let text = "// header\nA 1 1 1\n\nB 2\nC 1 2\r\nD 1 2 3 255\n";
        let names: Vec<String> = parse_rad(text).into_iter().map(|e| e.texture).collect();
        assert_eq!(names, vec!["A", "B", "D"]);
    }

    // ============================================================
    // Resolution and table
    // ============================================================

    #[test]
    fn test_map_rad_file() {
        assert_eq!(map_rad_file("maps/c1a0.bsp"), "maps/c1a0.rad");
        assert_eq!(map_rad_file("maps/c1a0.BSP"), "maps/c1a0.rad");
        assert_eq!(map_rad_file("maps/c1a0"), "maps/c1a0.rad");
        assert_eq!(map_rad_file("bsp"), "bsp.rad");
    }

    #[test]
    fn test_resolve_prefers_map_texture() {
        let services = TestServices::new()
            .with_texture("#maps/t.bsp:LIGHT.mip", 7)
            .with_texture("halflife.wad/LIGHT.mip", 8)
            .with_texture("decals.wad/LIGHT.mip", 9);
        let wadlist = vec!["decals.wad".to_string()];

        let plain = parse_rad_line("LIGHT 1 1 1").unwrap();
        assert_eq!(resolve_rad_texture(&services, "maps/t.bsp", &wadlist, &plain), Some(7));

        let services = TestServices::new()
            .with_texture("halflife.wad/LIGHT.mip", 8)
            .with_texture("decals.wad/LIGHT.mip", 9);
        let wad = parse_rad_line("halflife/LIGHT 1 1 1").unwrap();
        assert_eq!(resolve_rad_texture(&services, "maps/t.bsp", &wadlist, &wad), Some(8));
        assert_eq!(resolve_rad_texture(&services, "maps/t.bsp", &wadlist, &plain), Some(9));
        assert_eq!(resolve_rad_texture(&services, "maps/t.bsp", &[], &plain), None);
    }

    #[test]
    fn test_table_defaults_to_not_emissive() {
        let table = EmissiveTextureTable::default();
        assert_eq!(table.get(0), None);
        assert_eq!(table.emissive_for_texture(5), [0.0; 3]);
        assert_eq!(table.emissive_for_texture(MAX_TEXTURES + 1), [0.0; 3]);
    }

    #[test]
    fn test_load_rad_data_map_file_overrides_global() {
        let services = TestServices::new()
            .with_texture("#maps/t.bsp:LIGHT.mip", 3)
            .with_texture("#maps/t.bsp:OTHER.mip", 4)
            .with_file(GLOBAL_RAD_FILE, "LIGHT 100 0 0\nOTHER 50\n")
            .with_file("maps/t.rad", "LIGHT 0 0 200\nOTHER 0 0 0\n");

        let mut table = EmissiveTextureTable::default();
        table.load_rad_data(&services, "maps/t.bsp", &[]);

        assert_vec3_near(table.emissive_for_texture(3), [0.0, 0.0, 20.0]);
        // Zero intensity in the map file turns the texture off again
        assert_eq!(table.get(4), None);
        assert_eq!(
            services.loaded.borrow().as_slice(),
            &[GLOBAL_RAD_FILE.to_string(), "maps/t.rad".to_string()]
        );
    }

    #[test]
    fn test_load_rad_missing_file_keeps_defaults() {
        let services = TestServices::new();
        let mut table = EmissiveTextureTable::default();
        table.set(2, [1.0, 1.0, 1.0], true);
        table.load_rad_data(&services, "maps/none.bsp", &[]);
        assert_eq!(table.num_set(), 0);
        let out = capture_output(|| {
            assert!(!table.load_rad_file(&services, "maps/none.bsp", &[], "maps/none.rad"));
        });
        assert!(
            out.contains("ERROR: Couldn't load RAD data from file maps/none.rad"),
            "{}",
            out
        );
    }

    #[test]
    fn test_load_rad_out_of_range_texture() {
        let services = TestServices::new()
            .with_texture("#maps/t.bsp:HUGE.mip", MAX_TEXTURES)
            .with_file("maps/t.rad", "HUGE 1 1 1\n");
        let mut table = EmissiveTextureTable::default();
        assert!(table.load_rad_file(&services, "maps/t.bsp", &[], "maps/t.rad"));
        assert_eq!(table.num_set(), 0);
    }
}

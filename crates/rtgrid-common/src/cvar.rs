// cvar.rs — console variables read by the light subsystem

use std::collections::HashMap;

use parking_lot::{const_mutex, Mutex};

use crate::common::com_printf;

pub const CVAR_ARCHIVE: i32 = 1; // set to cause it to be saved to config
pub const CVAR_NOSET: i32 = 8; // don't allow change from console at all

/// A console variable.
#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
}

/// The cvar registry.
#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var_index(&self, name: &str) -> Option<usize> {
        self.cvar_index.get(name).copied()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Get the floating-point value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// Get the string value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    /// Get or create a cvar. An existing cvar keeps its value; flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            modified: true,
            value: value.parse::<f32>().unwrap_or(0.0),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) -> usize {
        let idx = match self.find_var_index(name) {
            Some(idx) => idx,
            None => return self.get(name, value, 0),
        };

        if !force && self.cvar_vars[idx].flags & CVAR_NOSET != 0 {
            com_printf(&format!("{} is write protected.\n", name));
            return idx;
        }

        let var = &mut self.cvar_vars[idx];
        if value == var.string {
            return idx; // not changed
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = value.parse::<f32>().unwrap_or(0.0);
        idx
    }

    /// Set a cvar value (respects NOSET).
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, false)
    }

    pub fn force_set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, true)
    }

    /// Set a cvar from a float value.
    pub fn set_value(&mut self, name: &str, value: f32) {
        let val_str = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &val_str);
    }

    /// Handles "name" and "name value" typed at the console.
    /// Returns false if `argv0` is not a cvar.
    pub fn command(&mut self, argv0: &str, argv1: Option<&str>) -> bool {
        let Some(idx) = self.find_var_index(argv0) else {
            return false;
        };

        match argv1 {
            None => {
                let var = &self.cvar_vars[idx];
                com_printf(&format!("\"{}\" is \"{}\"\n", var.name, var.string));
            }
            Some(value) => {
                self.set(argv0, value);
            }
        }
        true
    }
}

// ============================================================
// Global singleton and free-function wrappers
// ============================================================

static CVAR_CTX: Mutex<Option<CvarContext>> = const_mutex(None);

pub fn cvar_init() {
    let mut g = CVAR_CTX.lock();
    if g.is_none() {
        *g = Some(CvarContext::new());
    }
}

pub fn cvar_shutdown() {
    *CVAR_CTX.lock() = None;
}

pub fn cvar_get(name: &str, value: &str, flags: i32) -> Option<usize> {
    CVAR_CTX.lock().as_mut().map(|c| c.get(name, value, flags))
}

pub fn cvar_set(name: &str, value: &str) {
    if let Some(ref mut c) = *CVAR_CTX.lock() {
        c.set(name, value);
    }
}

pub fn cvar_variable_value(name: &str) -> f32 {
    CVAR_CTX.lock().as_ref().map_or(0.0, |c| c.variable_value(name))
}

pub fn cvar_variable_string(name: &str) -> String {
    CVAR_CTX
        .lock()
        .as_ref()
        .map_or(String::new(), |c| c.variable_string(name).to_string())
}

/// Access the global cvar context with a closure. Returns None if not initialized.
pub fn with_cvar_ctx<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut CvarContext) -> R,
{
    CVAR_CTX.lock().as_mut().map(f)
}

// ============================================================
// Tests
// ============================================================

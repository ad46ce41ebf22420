// common.rs — console output shared by the engine subsystems

use parking_lot::{const_mutex, Mutex};

pub const MAXPRINTMSG: usize = 4096;

// print levels
pub const PRINT_ALL: i32 = 0;
pub const PRINT_DEVELOPER: i32 = 1; // only print when "developer 1"
pub const PRINT_ALERT: i32 = 2;

// ============================================================
// Redirect buffer for Com_Printf
// ============================================================

static RD_BUFFER: Mutex<Option<String>> = const_mutex(None);

/// Begin redirecting printf output into a buffer.
pub fn com_begin_redirect() {
    *RD_BUFFER.lock() = Some(String::new());
}

/// End redirect and return the captured output.
pub fn com_end_redirect() -> Option<String> {
    RD_BUFFER.lock().take()
}

// ============================================================
// Com_Printf / Com_DPrintf
// ============================================================

/// General-purpose print function. Prints to stdout, or appends to the
/// redirect buffer if one is active.
pub fn com_printf(msg: &str) {
    {
        let mut buf = RD_BUFFER.lock();
        if let Some(ref mut s) = *buf {
            s.push_str(msg);
            return;
        }
    }

    if msg.len() > MAXPRINTMSG {
        let mut end = MAXPRINTMSG;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        print!("{}", &msg[..end]);
    } else {
        print!("{}", msg);
    }
}

/// Developer-only print. Controlled by the "developer" cvar.
pub fn com_dprintf(msg: &str) {
    if crate::cvar::cvar_variable_value("developer") == 0.0 {
        return;
    }
    com_printf(msg);
}

/// Print through the level filter used by the renderer.
pub fn com_printf_level(level: i32, msg: &str) {
    match level {
        PRINT_DEVELOPER => com_dprintf(msg),
        PRINT_ALERT => com_printf(&format!("^1{}", msg)),
        _ => com_printf(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_level_values() {
        assert_eq!(PRINT_ALL, 0);
        assert_eq!(PRINT_DEVELOPER, 1);
        assert_eq!(PRINT_ALERT, 2);
    }

    #[test]
    fn test_end_redirect_without_begin() {
        // Nothing is captured when no redirect is active on this buffer
        let _ = com_end_redirect();
        assert!(com_end_redirect().is_none());
    }
}

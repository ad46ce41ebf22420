// cmd.rs — console command registration and dispatch

use std::collections::HashMap;

use crate::common::com_printf;

pub const MAX_STRING_TOKENS: usize = 80;

pub type CmdFn = Box<dyn Fn(&mut CmdContext) + Send>;

/// A registered command.
pub struct CmdFunction {
    pub name: String,
    pub function: Option<CmdFn>,
}

/// Registered commands plus the most recently tokenized command line.
#[derive(Default)]
pub struct CmdContext {
    pub cmd_argv: Vec<String>,
    pub cmd_args: String,

    pub cmd_functions: Vec<CmdFunction>,
    /// lowercase name -> index in cmd_functions
    cmd_functions_index: HashMap<String, usize>,
}

/// Parse one token starting at `pos`. Quoted strings are returned without
/// their quotes; `//` starts a comment that runs to end of line.
fn com_parse_inline(bytes: &[u8], mut pos: usize) -> (String, usize) {
    loop {
        while pos < bytes.len() && bytes[pos] <= b' ' && bytes[pos] != b'\n' {
            pos += 1;
        }
        if pos + 1 < bytes.len() && bytes[pos] == b'/' && bytes[pos + 1] == b'/' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        break;
    }

    if pos >= bytes.len() || bytes[pos] == b'\n' {
        return (String::new(), pos);
    }

    let start;
    let end;
    if bytes[pos] == b'"' {
        pos += 1;
        start = pos;
        while pos < bytes.len() && bytes[pos] != b'"' && bytes[pos] != b'\n' {
            pos += 1;
        }
        end = pos;
        if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
        }
    } else {
        start = pos;
        while pos < bytes.len() && bytes[pos] > b' ' {
            pos += 1;
        }
        end = pos;
    }

    (String::from_utf8_lossy(&bytes[start..end]).into_owned(), pos)
}

impl CmdContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================
    // Command tokenization
    // ========================================================

    /// Parse the given string into command line tokens. Stops at the first newline.
    pub fn cmd_tokenize_string(&mut self, text: &str) {
        self.cmd_argv.clear();
        self.cmd_args.clear();

        let bytes = text.as_bytes();
        let mut pos = 0;

        loop {
            while pos < bytes.len() && bytes[pos] <= b' ' && bytes[pos] != b'\n' {
                pos += 1;
            }

            if pos >= bytes.len() || bytes[pos] == b'\n' {
                return;
            }

            // everything after the first arg
            if self.cmd_argv.len() == 1 {
                let rest = &bytes[pos..];
                let line_end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
                self.cmd_args = String::from_utf8_lossy(&rest[..line_end]).trim_end().to_string();
            }

            let (token, new_pos) = com_parse_inline(bytes, pos);
            if new_pos == pos {
                return;
            }
            pos = new_pos;

            if token.is_empty() && (pos >= bytes.len() || bytes[pos] == b'\n') {
                return;
            }

            if self.cmd_argv.len() < MAX_STRING_TOKENS {
                self.cmd_argv.push(token);
            }
        }
    }

    // ========================================================
    // Command registration
    // ========================================================

    pub fn cmd_add_command(&mut self, name: &str, function: Option<CmdFn>) {
        let key = name.to_ascii_lowercase();

        if self.cmd_functions_index.contains_key(&key) {
            com_printf(&format!("Cmd_AddCommand: {} already defined\n", name));
            return;
        }

        let idx = self.cmd_functions.len();
        self.cmd_functions.push(CmdFunction {
            name: name.to_string(),
            function,
        });
        self.cmd_functions_index.insert(key, idx);
    }

    pub fn cmd_remove_command(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();

        let Some(idx) = self.cmd_functions_index.remove(&key) else {
            com_printf(&format!("Cmd_RemoveCommand: {} not added\n", name));
            return;
        };

        self.cmd_functions.remove(idx);
        for v in self.cmd_functions_index.values_mut() {
            if *v > idx {
                *v -= 1;
            }
        }
    }

    pub fn cmd_exists(&self, name: &str) -> bool {
        self.cmd_functions_index.contains_key(&name.to_ascii_lowercase())
    }

    pub fn cmd_argc(&self) -> usize {
        self.cmd_argv.len()
    }

    /// Get argument by index. Returns empty string if out of range.
    pub fn cmd_argv(&self, arg: usize) -> &str {
        self.cmd_argv.get(arg).map_or("", |s| s.as_str())
    }

    /// All arguments after the first as a single string.
    pub fn cmd_args(&self) -> &str {
        &self.cmd_args
    }

    // ========================================================
    // Command execution
    // ========================================================

    /// Tokenize `text` and run the matching command. Returns false when no
    /// command by that name is registered.
    pub fn cmd_execute_string(&mut self, text: &str) -> bool {
        self.cmd_tokenize_string(text);

        if self.cmd_argv.is_empty() {
            return true;
        }

        let key = self.cmd_argv[0].to_ascii_lowercase();
        let Some(&idx) = self.cmd_functions_index.get(&key) else {
            // Not a command: maybe "cvar" or "cvar value"
            let name = &self.cmd_argv[0];
            let value = self.cmd_argv.get(1).map(String::as_str);
            if crate::cvar::with_cvar_ctx(|c| c.command(name, value)) == Some(true) {
                return true;
            }
            com_printf(&format!("Unknown command \"{}\"\n", self.cmd_argv[0]));
            return false;
        };

        // Take the function out so it can borrow the context mutably
        if let Some(f) = self.cmd_functions[idx].function.take() {
            f(self);
            // The command may have removed itself
            if let Some(&idx) = self.cmd_functions_index.get(&key) {
                self.cmd_functions[idx].function = Some(f);
            }
        }
        true
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tokenize() {
        let mut ctx = CmdContext::new();
        ctx.cmd_tokenize_string("set name \"John Doe\"");
        assert_eq!(ctx.cmd_argc(), 3);
        assert_eq!(ctx.cmd_argv(0), "set");
        assert_eq!(ctx.cmd_argv(1), "name");
        assert_eq!(ctx.cmd_argv(2), "John Doe");
        assert_eq!(ctx.cmd_args(), "name \"John Doe\"");
        assert_eq!(ctx.cmd_argv(3), "");
    }

    #[test]
    fn test_tokenize_stops_at_newline_and_comment() {
        let mut ctx = CmdContext::new();
        ctx.cmd_tokenize_string("rt_lights_dump mcp // trailing\nsecond line");
        assert_eq!(ctx.cmd_argc(), 2);
        assert_eq!(ctx.cmd_argv(1), "mcp");
    }

    #[test]
    fn test_cmd_add_remove() {
        let mut ctx = CmdContext::new();
        ctx.cmd_add_command("test", None);
        assert!(ctx.cmd_exists("test"));
        assert!(ctx.cmd_exists("TEST"));
        ctx.cmd_remove_command("test");
        assert!(!ctx.cmd_exists("test"));
    }

    #[test]
    fn test_cmd_remove_keeps_other_indices() {
        let mut ctx = CmdContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        ctx.cmd_add_command("a", None);
        let h = hits.clone();
        ctx.cmd_add_command(
            "b",
            Some(Box::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })),
        );
        ctx.cmd_remove_command("a");
        assert!(ctx.cmd_execute_string("b"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cmd_execute_sees_arguments() {
        let mut ctx = CmdContext::new();
        let seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let s = seen.clone();
        ctx.cmd_add_command(
            "echo_arg",
            Some(Box::new(move |c: &mut CmdContext| {
                *s.lock() = c.cmd_argv(1).to_string();
            })),
        );
        assert!(ctx.cmd_execute_string("echo_arg hello"));
        assert_eq!(seen.lock().as_str(), "hello");
        // Function is restored after running
        assert!(ctx.cmd_execute_string("echo_arg again"));
        assert_eq!(seen.lock().as_str(), "again");
    }

    #[test]
    fn test_cmd_execute_unknown() {
        let mut ctx = CmdContext::new();
        assert!(!ctx.cmd_execute_string("nope"));
    }

    #[test]
    fn test_cmd_execute_falls_back_to_cvar() {
        crate::cvar::cvar_init();
        crate::cvar::cvar_get("cmd_fallback_var", "0", 0);

        let mut ctx = CmdContext::new();
        assert!(ctx.cmd_execute_string("cmd_fallback_var 5"));
        assert_eq!(crate::cvar::cvar_variable_value("cmd_fallback_var"), 5.0);
    }
}

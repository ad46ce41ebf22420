// rt_lights_dump.rs — `rt_lights_dump` console command: one-shot light insertion trace

use std::sync::Arc;

use parking_lot::Mutex;

use rtgrid_common::cmd::CmdContext;
use rtgrid_common::common::com_printf;

use crate::rt_light::LightsConfig;

pub const LIGHTS_DUMP_COMMAND: &str = "rt_lights_dump";

/// What the next frame should trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpRequest {
    /// Substring a label must contain to be traced. None traces everything.
    pub filter: Option<String>,
}

impl DumpRequest {
    pub fn matches(&self, label: &str) -> bool {
        match &self.filter {
            Some(filter) => label.contains(filter.as_str()),
            None => true,
        }
    }
}

/// Shared between the console command and the light system.
#[derive(Debug, Default)]
pub struct LightsDump {
    request: Mutex<Option<DumpRequest>>,
}

impl LightsDump {
    pub fn arm(&self, filter: Option<String>) {
        *self.request.lock() = Some(DumpRequest { filter });
    }

    /// Consume the pending request, if any.
    pub fn take(&self) -> Option<DumpRequest> {
        self.request.lock().take()
    }

    pub fn is_armed(&self) -> bool {
        self.request.lock().is_some()
    }
}

/// Register the light cvars and the dump command.
pub fn lights_init(cmd: &mut CmdContext) -> Arc<LightsDump> {
    LightsConfig::register_cvars();

    let dump = Arc::new(LightsDump::default());
    let request = Arc::clone(&dump);

    cmd.cmd_add_command(
        LIGHTS_DUMP_COMMAND,
        Some(Box::new(move |ctx: &mut CmdContext| {
            let filter = if ctx.cmd_argc() > 1 {
                Some(ctx.cmd_argv(1).to_string())
            } else {
                None
            };

            match &filter {
                Some(f) => com_printf(&format!("Dumping lights matching \"{}\" next frame\n", f)),
                None => com_printf("Dumping all lights next frame\n"),
            }
            request.arm(filter);
        })),
    );

    dump
}

pub fn lights_shutdown(cmd: &mut CmdContext) {
    cmd.cmd_remove_command(LIGHTS_DUMP_COMMAND);
}

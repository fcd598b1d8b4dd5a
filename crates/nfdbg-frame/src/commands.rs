//! Command codes understood by the remote runtime.
//!
//! `0x0000_xxxx` are monitor commands (available from the boot loader too),
//! `0x0002_xxxx` are debugger commands served by the running runtime.

/// Liveness probe; the reply says whether the boot loader or the runtime answered.
pub const MONITOR_PING: u32 = 0x0000_0000;

/// Text the device program wrote to its debug output. Unsolicited.
pub const MONITOR_MESSAGE: u32 = 0x0000_0001;

/// Reboot the device.
pub const MONITOR_REBOOT: u32 = 0x0000_0007;

/// Target and platform identification strings.
pub const MONITOR_TARGET_INFO: u32 = 0x0000_0020;

/// Runtime capability flags and version.
pub const DEBUGGING_EXECUTION_QUERY_CAPABILITIES: u32 = 0x0002_000F;

/// Fetch the contents behind a value handle.
pub const DEBUGGING_VALUE_FETCH: u32 = 0x0002_0040;

/// Handles the device no longer backs (collected, session reset). Unsolicited.
pub const DEBUGGING_VALUE_INVALIDATED: u32 = 0x0002_0041;

/// Returns a human-readable name for a command code.
pub fn command_name(code: u32) -> &'static str {
    match code {
        MONITOR_PING => "Monitor_Ping",
        MONITOR_MESSAGE => "Monitor_Message",
        MONITOR_REBOOT => "Monitor_Reboot",
        MONITOR_TARGET_INFO => "Monitor_TargetInfo",
        DEBUGGING_EXECUTION_QUERY_CAPABILITIES => "Debugging_Execution_QueryCapabilities",
        DEBUGGING_VALUE_FETCH => "Debugging_Value_Fetch",
        DEBUGGING_VALUE_INVALIDATED => "Debugging_Value_Invalidated",
        code if is_monitor(code) => "Monitor_Unknown",
        _ => "Unknown",
    }
}

/// Returns true for commands the device sends on its own, never as a reply.
pub fn is_unsolicited(code: u32) -> bool {
    matches!(code, MONITOR_MESSAGE | DEBUGGING_VALUE_INVALIDATED)
}

/// Returns true for commands in the monitor range.
pub fn is_monitor(code: u32) -> bool {
    code <= 0x0000_FFFF
}

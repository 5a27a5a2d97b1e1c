//! Windows shared-memory access.
//!
//! Adapts a publisher's named kernel objects to the crate's provider traits:
//! a read-only file mapping for the telemetry region, an auto-reset event for
//! data readiness, and a registered window message for outbound commands.
//!
//! # Design Philosophy
//!
//! - **Direct Memory Access**: map the publisher's shared memory directly,
//!   with no validation layers between the bytes and the reader
//! - **Caller-Side Consistency**: multi-field reads go through the
//!   version-bracketed protocol in [`crate::region`]; this module only moves
//!   bytes
//! - **Minimal API Surface**: expose only what the acquisition worker and
//!   command clients need

mod connection;
mod sink;

pub use connection::{ShmProvider, ShmProviderFactory};
pub use sink::MessageSink;

/// Convert string to null-terminated wide string for Windows APIs
pub(crate) fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

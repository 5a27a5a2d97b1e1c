//! Broadcast command sink over a registered window message.

use tracing::trace;
use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    HWND_BROADCAST, RegisterWindowMessageW, SendNotifyMessageW,
};
use windows::core::PCWSTR;

use super::wide_string;
use crate::command::{CommandMessage, CommandSink};
use crate::{Result, TelemetryError};

/// Delivers packed command messages to the publisher as a broadcast window
/// message: `wparam = (arg1 << 16) | id`, `lparam = (arg2 << 16) | arg3`.
pub struct MessageSink {
    message_id: u32,
}

impl MessageSink {
    /// Register the named window message the publisher listens on.
    pub fn register(message_name: &str) -> Result<Self> {
        let wide_name = wide_string(message_name);
        let message_id = unsafe { RegisterWindowMessageW(PCWSTR::from_raw(wide_name.as_ptr())) };
        if message_id == 0 {
            let win_err = windows::core::Error::from_thread();
            return Err(TelemetryError::windows_api_error("RegisterWindowMessageW", win_err));
        }
        Ok(Self { message_id })
    }
}

impl CommandSink for MessageSink {
    fn send(&self, message: CommandMessage) -> Result<()> {
        let (word0, word1) = message.pack();
        trace!(id = message.id, word0, word1, "broadcasting command");

        unsafe {
            SendNotifyMessageW(
                HWND_BROADCAST,
                self.message_id,
                WPARAM(word0 as usize),
                // Preserve the bit pattern on 32-bit targets too.
                LPARAM(word1 as i32 as isize),
            )
            .map_err(|e| TelemetryError::windows_api_error("SendNotifyMessageW", e))
        }
    }
}

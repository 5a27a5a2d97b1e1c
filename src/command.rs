//! Outbound command encoding for driving the external process.
//!
//! A command is four 16-bit fields (id plus three arguments) packed into a
//! two-word notification envelope. The bit layout is part of the wire contract
//! with the publisher and must not change:
//!
//! ```text
//! word0 = (arg1 << 16) | id
//! word1 = (arg2 << 16) | arg3
//! ```
//!
//! Delivery is a [`CommandSink`] concern; on Windows the
//! [`crate::windows::MessageSink`] broadcasts the envelope as a registered
//! window message.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Command identifiers understood by the external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CommandId {
    CameraSwitchPosition = 0,
    CameraSwitchDriver = 1,
    CameraSetState = 2,
    ReplaySetPlaySpeed = 3,
    ReplaySetPlayPosition = 4,
    ReplaySearch = 5,
    ReplaySetState = 6,
    ReloadTextures = 7,
    Chat = 8,
    PitService = 9,
    Telemetry = 10,
}

/// A fixed-format outbound message: id plus three 16-bit arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: u16,
    pub arg1: u16,
    pub arg2: u16,
    pub arg3: u16,
}

impl CommandMessage {
    pub fn new(id: u16, arg1: u16, arg2: u16, arg3: u16) -> Self {
        Self { id, arg1, arg2, arg3 }
    }

    /// Pack into the two-word notification envelope.
    pub fn pack(&self) -> (u32, u32) {
        (
            (u32::from(self.arg1) << 16) | u32::from(self.id),
            (u32::from(self.arg2) << 16) | u32::from(self.arg3),
        )
    }

    /// Unpack a two-word notification envelope.
    pub fn unpack(word0: u32, word1: u32) -> Self {
        Self {
            id: word0 as u16,
            arg1: (word0 >> 16) as u16,
            arg2: (word1 >> 16) as u16,
            arg3: word1 as u16,
        }
    }
}

/// High-level command kinds, one variant per message family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Command {
    CameraSwitchPosition { position: u16, group: u16, camera: u16 },
    CameraSwitchDriver { driver: u16, group: u16, camera: u16 },
    CameraSetState { state: u16 },
    ReplaySetPlaySpeed { speed: i16, slow_motion: bool },
    ReplaySetPlayPosition { mode: u16, frame: u16 },
    ReplaySearch { mode: u16 },
    ReplaySetState { state: u16 },
    ReloadTextures { car_index: u16 },
    Chat { command: u16, macro_id: u16 },
    PitService { command: u16, parameter: u16 },
    Telemetry { command: u16 },
}

/// Encode a command into its wire message.
pub fn encode(command: Command) -> CommandMessage {
    match command {
        Command::CameraSwitchPosition { position, group, camera } => {
            CommandMessage::new(CommandId::CameraSwitchPosition as u16, position, group, camera)
        }
        Command::CameraSwitchDriver { driver, group, camera } => {
            CommandMessage::new(CommandId::CameraSwitchDriver as u16, driver, group, camera)
        }
        Command::CameraSetState { state } => {
            CommandMessage::new(CommandId::CameraSetState as u16, state, 0, 0)
        }
        Command::ReplaySetPlaySpeed { speed, slow_motion } => CommandMessage::new(
            CommandId::ReplaySetPlaySpeed as u16,
            speed as u16,
            u16::from(slow_motion),
            0,
        ),
        Command::ReplaySetPlayPosition { mode, frame } => {
            CommandMessage::new(CommandId::ReplaySetPlayPosition as u16, mode, frame, 0)
        }
        Command::ReplaySearch { mode } => {
            CommandMessage::new(CommandId::ReplaySearch as u16, mode, 0, 0)
        }
        Command::ReplaySetState { state } => {
            CommandMessage::new(CommandId::ReplaySetState as u16, state, 0, 0)
        }
        Command::ReloadTextures { car_index } => {
            CommandMessage::new(CommandId::ReloadTextures as u16, car_index, 0, 0)
        }
        Command::Chat { command, macro_id } => {
            CommandMessage::new(CommandId::Chat as u16, command, macro_id, 0)
        }
        Command::PitService { command, parameter } => {
            CommandMessage::new(CommandId::PitService as u16, command, parameter, 0)
        }
        Command::Telemetry { command } => {
            CommandMessage::new(CommandId::Telemetry as u16, command, 0, 0)
        }
    }
}

/// Decode a wire message back into a command, if the id is known.
pub fn decode(message: CommandMessage) -> Option<Command> {
    let command = match message.id {
        0 => Command::CameraSwitchPosition {
            position: message.arg1,
            group: message.arg2,
            camera: message.arg3,
        },
        1 => Command::CameraSwitchDriver {
            driver: message.arg1,
            group: message.arg2,
            camera: message.arg3,
        },
        2 => Command::CameraSetState { state: message.arg1 },
        3 => Command::ReplaySetPlaySpeed {
            speed: message.arg1 as i16,
            slow_motion: message.arg2 != 0,
        },
        4 => Command::ReplaySetPlayPosition { mode: message.arg1, frame: message.arg2 },
        5 => Command::ReplaySearch { mode: message.arg1 },
        6 => Command::ReplaySetState { state: message.arg1 },
        7 => Command::ReloadTextures { car_index: message.arg1 },
        8 => Command::Chat { command: message.arg1, macro_id: message.arg2 },
        9 => Command::PitService { command: message.arg1, parameter: message.arg2 },
        10 => Command::Telemetry { command: message.arg1 },
        _ => return None,
    };
    Some(command)
}

/// Sink for delivering packed command messages to the external process.
pub trait CommandSink {
    fn send(&self, message: CommandMessage) -> Result<()>;
}

//! The controller's command vocabulary.
//!
//! Commands are single ASCII lines terminated by a carriage return; every
//! command produces exactly one reply line.  The subset used here:
//!
//! | Command                            | Success reply              |
//! |------------------------------------|----------------------------|
//! | `getversion`                       | firmware version string    |
//! | `getstate,<m>:<c>`                 | `state,<m>:<c>,<0\|1>`      |
//! | `setstate,<m>:<c>,<0\|1>`           | `state,<m>:<c>,<0\|1>`      |
//! | `sendir,<m>:<c>,<id>,<code>`       | `completeir,<m>:<c>,<id>`  |
//!
//! A reply starting with `ERR` or `unknowncommand` is a device-side error.

use std::fmt;

use thiserror::Error;

/// Errors produced when a reply does not confirm the command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The controller rejected the command.
    #[error("device returned error: {0}")]
    Device(String),

    /// The reply is well-formed but answers a different command.
    #[error("unexpected reply to {command}: {reply:?}")]
    Unexpected { command: &'static str, reply: String },

    /// The reply has the right keyword but cannot be parsed.
    #[error("malformed reply: {0:?}")]
    Malformed(String),
}

/// A command addressed to the controller's command port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    GetVersion,
    GetState { module: u8, connector: u8 },
    SetState { module: u8, connector: u8, on: bool },
    SendIr { module: u8, connector: u8, id: u32, code: String },
}

/// A successfully parsed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Version(String),
    State { module: u8, connector: u8, on: bool },
    CompleteIr { module: u8, connector: u8, id: u32 },
}

impl DeviceCommand {
    /// The command keyword, used as the request name in logs.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::GetVersion => "getversion",
            DeviceCommand::GetState { .. } => "getstate",
            DeviceCommand::SetState { .. } => "setstate",
            DeviceCommand::SendIr { .. } => "sendir",
        }
    }

    /// Renders the command line without its terminator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gc_core::protocol::DeviceCommand;
    ///
    /// let cmd = DeviceCommand::SetState { module: 1, connector: 3, on: true };
    /// assert_eq!(cmd.to_line(), "setstate,1:3,1");
    /// ```
    pub fn to_line(&self) -> String {
        match self {
            DeviceCommand::GetVersion => "getversion".to_string(),
            DeviceCommand::GetState { module, connector } => {
                format!("getstate,{module}:{connector}")
            }
            DeviceCommand::SetState {
                module,
                connector,
                on,
            } => format!("setstate,{module}:{connector},{}", u8::from(*on)),
            DeviceCommand::SendIr {
                module,
                connector,
                id,
                code,
            } => format!("sendir,{module}:{connector},{id},{code}"),
        }
    }

    /// Parses the reply line the controller sent for this command.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::Device`] for `ERR`/`unknowncommand` replies and
    /// [`ReplyError::Unexpected`] or [`ReplyError::Malformed`] when the reply
    /// does not match the command.
    pub fn parse_reply(&self, reply: &str) -> Result<CommandReply, ReplyError> {
        let reply = reply.trim();
        if is_error_reply(reply) {
            return Err(ReplyError::Device(reply.to_string()));
        }

        match self {
            DeviceCommand::GetVersion => Ok(CommandReply::Version(reply.to_string())),
            DeviceCommand::GetState { .. } | DeviceCommand::SetState { .. } => {
                let rest = reply.strip_prefix("state,").ok_or_else(|| self.unexpected(reply))?;
                let (address, value) = rest
                    .split_once(',')
                    .ok_or_else(|| ReplyError::Malformed(reply.to_string()))?;
                let (module, connector) = parse_address(address, reply)?;
                let on = match value {
                    "0" => false,
                    "1" => true,
                    _ => return Err(ReplyError::Malformed(reply.to_string())),
                };
                Ok(CommandReply::State {
                    module,
                    connector,
                    on,
                })
            }
            DeviceCommand::SendIr { .. } => {
                let rest = reply
                    .strip_prefix("completeir,")
                    .ok_or_else(|| self.unexpected(reply))?;
                let (address, id) = rest
                    .split_once(',')
                    .ok_or_else(|| ReplyError::Malformed(reply.to_string()))?;
                let (module, connector) = parse_address(address, reply)?;
                let id = id
                    .parse()
                    .map_err(|_| ReplyError::Malformed(reply.to_string()))?;
                Ok(CommandReply::CompleteIr {
                    module,
                    connector,
                    id,
                })
            }
        }
    }

    fn unexpected(&self, reply: &str) -> ReplyError {
        ReplyError::Unexpected {
            command: self.name(),
            reply: reply.to_string(),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Returns `true` if `reply` reports a device-side error.
pub fn is_error_reply(reply: &str) -> bool {
    let reply = reply.trim_start();
    reply.starts_with("ERR") || reply.starts_with("unknowncommand")
}

fn parse_address(address: &str, reply: &str) -> Result<(u8, u8), ReplyError> {
    let malformed = || ReplyError::Malformed(reply.to_string());
    let (module, connector) = address.split_once(':').ok_or_else(malformed)?;
    Ok((
        module.parse().map_err(|_| malformed())?,
        connector.parse().map_err(|_| malformed())?,
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(DeviceCommand::GetVersion.to_line(), "getversion");
        assert_eq!(
            DeviceCommand::GetState { module: 1, connector: 2 }.to_line(),
            "getstate,1:2"
        );
        assert_eq!(
            DeviceCommand::SetState { module: 3, connector: 1, on: false }.to_line(),
            "setstate,3:1,0"
        );
        assert_eq!(
            DeviceCommand::SendIr {
                module: 1,
                connector: 1,
                id: 7,
                code: "38028,1,69,342,172".to_string()
            }
            .to_line(),
            "sendir,1:1,7,38028,1,69,342,172"
        );
    }

    #[test]
    fn test_getversion_reply_is_version_string() {
        let reply = DeviceCommand::GetVersion.parse_reply("710-1005-05\r").unwrap();
        assert_eq!(reply, CommandReply::Version("710-1005-05".to_string()));
    }

    #[test]
    fn test_getstate_reply_parses_state() {
        // Arrange
        let cmd = DeviceCommand::GetState { module: 1, connector: 2 };

        // Act
        let reply = cmd.parse_reply("state,1:2,1").unwrap();

        // Assert
        assert_eq!(
            reply,
            CommandReply::State { module: 1, connector: 2, on: true }
        );
    }

    #[test]
    fn test_sendir_reply_parses_completion() {
        let cmd = DeviceCommand::SendIr {
            module: 4,
            connector: 3,
            id: 12,
            code: "1".to_string(),
        };
        assert_eq!(
            cmd.parse_reply("completeir,4:3,12").unwrap(),
            CommandReply::CompleteIr { module: 4, connector: 3, id: 12 }
        );
    }

    #[test]
    fn test_error_replies_are_device_errors() {
        let cmd = DeviceCommand::GetVersion;
        assert_eq!(
            cmd.parse_reply("ERR_1:1,008"),
            Err(ReplyError::Device("ERR_1:1,008".to_string()))
        );
        assert_eq!(
            cmd.parse_reply("unknowncommand,ERR_01"),
            Err(ReplyError::Device("unknowncommand,ERR_01".to_string()))
        );
    }

    #[test]
    fn test_reply_for_other_command_is_unexpected() {
        let cmd = DeviceCommand::SetState { module: 1, connector: 1, on: true };
        assert_eq!(
            cmd.parse_reply("completeir,1:1,3"),
            Err(ReplyError::Unexpected {
                command: "setstate",
                reply: "completeir,1:1,3".to_string()
            })
        );
    }

    #[test]
    fn test_state_reply_with_bad_value_is_malformed() {
        let cmd = DeviceCommand::GetState { module: 1, connector: 1 };
        assert!(matches!(cmd.parse_reply("state,1:1,2"), Err(ReplyError::Malformed(_))));
        assert!(matches!(cmd.parse_reply("state,1-1,0"), Err(ReplyError::Malformed(_))));
        assert!(matches!(cmd.parse_reply("state,1:1"), Err(ReplyError::Malformed(_))));
    }

    #[test]
    fn test_is_error_reply() {
        assert!(is_error_reply("ERR 4"));
        assert!(is_error_reply("unknowncommand"));
        assert!(!is_error_reply("state,1:1,0"));
    }
}

// vim: cc=81
use crate::error::TransportError;
use std::process::{Command, Stdio};
use tracing::debug;

/// OS level kill switch, independent of the service's Powered flag.
pub trait RadioSwitch: Send + Sync {
    fn set_blocked(&self, blocked: bool) -> Result<(), TransportError>;
}

/// Soft blocks and unblocks bluetooth with the rfkill utility.
pub struct Rfkill {
    program: String,
}

impl Rfkill {
    pub fn new() -> Rfkill {
        Rfkill {
            program: "rfkill".to_string(),
        }
    }

    fn args(blocked: bool) -> [&'static str; 2] {
        let action = if blocked { "block" } else { "unblock" };
        [action, "bluetooth"]
    }
}

impl Default for Rfkill {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioSwitch for Rfkill {
    fn set_blocked(&self, blocked: bool) -> Result<(), TransportError> {
        let args = Self::args(blocked);
        debug!("running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                TransportError::Radio(format!("{}: {err}", self.program))
            })?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TransportError::Radio(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            )))
        }
    }
}

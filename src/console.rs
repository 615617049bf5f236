// vim: cc=81
//! Line oriented user interface: parses typed commands and prints the state.

use crate::bluetooth::agent::{CredentialKind, PendingCredentialRequest};
use crate::bluetooth::store::Snapshot;
use crate::bluetooth::{Adapter, Device};
use crate::utils::ansi::{
    paint, ANSI_BLUE, ANSI_BOLD, ANSI_CYAN, ANSI_DIM, ANSI_GREEN, ANSI_RED,
    ANSI_YELLOW,
};
use crate::utils::fit;
use std::fmt::Write;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  power          toggle the adapter's power
  scan           start or stop scanning for nearby devices
  select <n>     show details of paired device n
  toggle [n]     connect or disconnect paired device n (default: selected)
  forget [n]     remove paired device n (default: selected)
  pair <n>       pair with nearby device n
  pin <code>     answer a PIN code or passkey request
  yes | no       answer a confirmation request
  refresh        reload everything from the Bluetooth service
  help           show this text
  quit           leave";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Help,
    Power,
    Scan,
    /// Numbers are 1-based, as printed
    Select(usize),
    Toggle(Option<usize>),
    Forget(Option<usize>),
    Pair(usize),
    Pin(String),
    Yes,
    No,
    Refresh,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("unknown command {0:?}, type help for a list")]
    Unknown(String),
    #[error("{0} needs {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("{0:?} is not a device number")]
    BadNumber(String),
    #[error("{0} takes no argument")]
    UnexpectedArgument(&'static str),
}

fn number(arg: &str) -> Result<usize, InputError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(InputError::BadNumber(arg.to_string())),
    }
}

pub fn parse_input(line: &str) -> Result<Input, InputError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Input::Empty);
    };
    let arg = words.next();
    let bare = |input: Input, name: &'static str| match arg {
        None => Ok(input),
        Some(_) => Err(InputError::UnexpectedArgument(name)),
    };
    match command.to_lowercase().as_str() {
        "help" | "h" | "?" => bare(Input::Help, "help"),
        "power" => bare(Input::Power, "power"),
        "scan" => bare(Input::Scan, "scan"),
        "refresh" => bare(Input::Refresh, "refresh"),
        "yes" | "y" => bare(Input::Yes, "yes"),
        "no" | "n" => bare(Input::No, "no"),
        "quit" | "q" | "exit" => bare(Input::Quit, "quit"),
        "select" | "s" => arg
            .ok_or(InputError::MissingArgument("select", "a device number"))
            .and_then(number)
            .map(Input::Select),
        "pair" | "p" => arg
            .ok_or(InputError::MissingArgument("pair", "a device number"))
            .and_then(number)
            .map(Input::Pair),
        "toggle" | "t" => arg.map(number).transpose().map(Input::Toggle),
        "forget" => arg.map(number).transpose().map(Input::Forget),
        "pin" => arg
            .map(|code| Input::Pin(code.to_string()))
            .ok_or(InputError::MissingArgument("pin", "a code")),
        _ => Err(InputError::Unknown(command.to_string())),
    }
}

/// Text asking the user to answer request.
pub fn prompt(request: &PendingCredentialRequest) -> String {
    let name = &request.device_name;
    match request.kind {
        CredentialKind::Pin => {
            format!("Enter the PIN code for {name}: pin <code>")
        }
        CredentialKind::Passkey => {
            format!("Enter the passkey shown on {name}: pin <6 digits>")
        }
        CredentialKind::Confirm { passkey } => {
            format!("Does {passkey:06} match the code on {name}? yes / no")
        }
    }
}

fn on_off(flag: bool, on: &str, off: &str, color: bool) -> String {
    if flag {
        paint(on, ANSI_GREEN, color)
    } else {
        paint(off, ANSI_DIM, color)
    }
}

fn battery(device: &Device) -> String {
    if device.battery < 0 {
        String::new()
    } else {
        format!("{}%", device.battery)
    }
}

fn display_name(device: &Device) -> &str {
    if device.name.is_empty() {
        &device.address
    } else {
        &device.name
    }
}

fn adapter_line(out: &mut String, adapter: &Adapter, color: bool) {
    let _ = writeln!(
        out,
        "  {} {} {}  {}  {}  {}",
        paint(&fit(adapter.id.label(), 6), ANSI_BOLD, color),
        fit(&adapter.name, 20),
        fit(&adapter.address, 17),
        on_off(adapter.powered, "powered", "off", color),
        on_off(adapter.scanning, "scanning", "idle", color),
        on_off(adapter.discoverable, "discoverable", "hidden", color),
    );
}

fn details(out: &mut String, device: &Device, color: bool) {
    let field = |label: &str| paint(&fit(label, 10), ANSI_DIM, color);
    let _ = writeln!(out, "    {}{}", field("Name"), display_name(device));
    let _ = writeln!(
        out,
        "    {}{} ({})",
        field("Address"),
        device.address,
        device.address_type
    );
    let _ = writeln!(out, "    {}{}", field("Type"), device.icon.label());
    let flags = [
        on_off(device.paired, "paired", "not paired", color),
        on_off(device.trusted, "trusted", "not trusted", color),
        on_off(device.connected, "connected", "disconnected", color),
    ];
    let _ = writeln!(out, "    {}{}", field("State"), flags.join(", "));
    if device.battery >= 0 {
        let _ = writeln!(out, "    {}{}", field("Battery"), battery(device));
    }
    if device.rssi != 0 {
        let _ = writeln!(out, "    {}{} dBm", field("Signal"), device.rssi);
    }
}

/// Renders the whole screen. width is the terminal width in columns.
pub fn render(
    snapshot: &Snapshot<'_>,
    pending: Option<&PendingCredentialRequest>,
    color: bool,
    width: usize,
) -> String {
    let name_width = width.saturating_sub(40).clamp(12, 32);
    let mut out = String::new();
    let heading = |text: &str| paint(text, ANSI_BLUE, color);

    let _ = writeln!(out, "{}", heading("Adapters"));
    if snapshot.adapters.is_empty() {
        let _ = writeln!(out, "  {}", paint("no adapter found", ANSI_DIM, color));
    }
    for adapter in snapshot.adapters {
        adapter_line(&mut out, adapter, color);
    }

    let _ = writeln!(out, "\n{}", heading("Paired devices"));
    if snapshot.paired.is_empty() {
        let _ = writeln!(out, "  {}", paint("none", ANSI_DIM, color));
    }
    for (index, device) in snapshot.paired.iter().enumerate() {
        let selected = snapshot.selected == Some(&device.id);
        let marker = if selected { ">" } else { " " };
        let name = fit(display_name(device), name_width);
        let name = if device.connected {
            paint(&name, ANSI_GREEN, color)
        } else {
            name
        };
        let _ = writeln!(
            out,
            "{marker}{:>3}  {name}  {}  {}",
            index + 1,
            fit(device.icon.label(), 11),
            battery(device),
        );
    }
    if let Some(device) = snapshot
        .selected
        .and_then(|id| snapshot.paired.iter().find(|d| &d.id == id))
    {
        let _ = writeln!(out);
        details(&mut out, device, color);
    }

    let _ = writeln!(out, "\n{}", heading("Nearby devices"));
    if snapshot.unpaired.is_empty() {
        let _ = writeln!(out, "  {}", paint("none", ANSI_DIM, color));
    }
    for (index, device) in snapshot.unpaired.iter().enumerate() {
        let _ = writeln!(
            out,
            " {:>3}  {}  {}  {}",
            index + 1,
            fit(display_name(device), name_width),
            fit(device.icon.label(), 11),
            paint(&format!("{} dBm", device.rssi), ANSI_CYAN, color),
        );
    }

    if let Some(error) = snapshot.last_error {
        let _ = writeln!(out, "\n{}", paint(error, ANSI_RED, color));
    }
    if let Some(request) = pending {
        let _ = writeln!(out, "\n{}", paint(&prompt(request), ANSI_YELLOW, color));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{AdapterId, DeviceId};
    use rstest::rstest;

    #[rstest]
    #[case("", Ok(Input::Empty))]
    #[case("  power ", Ok(Input::Power))]
    #[case("SCAN", Ok(Input::Scan))]
    #[case("select 2", Ok(Input::Select(2)))]
    #[case("toggle", Ok(Input::Toggle(None)))]
    #[case("t 3", Ok(Input::Toggle(Some(3))))]
    #[case("forget 1", Ok(Input::Forget(Some(1))))]
    #[case("pair 4", Ok(Input::Pair(4)))]
    #[case("pin 0000", Ok(Input::Pin("0000".into())))]
    #[case("y", Ok(Input::Yes))]
    #[case("no", Ok(Input::No))]
    #[case("quit", Ok(Input::Quit))]
    #[case("pair", Err(InputError::MissingArgument("pair", "a device number")))]
    #[case("select 0", Err(InputError::BadNumber("0".into())))]
    #[case("toggle x", Err(InputError::BadNumber("x".into())))]
    #[case("pin", Err(InputError::MissingArgument("pin", "a code")))]
    #[case("scan now", Err(InputError::UnexpectedArgument("scan")))]
    #[case("dance", Err(InputError::Unknown("dance".into())))]
    fn parses_input(#[case] line: &str, #[case] expected: Result<Input, InputError>) {
        assert_eq!(parse_input(line), expected);
    }

    fn device(leaf: &str, name: &str, paired: bool) -> Device {
        let mut device = Device::new(DeviceId(format!("/org/bluez/hci0/dev_{leaf}")));
        device.set_remote_name(name);
        device.paired = paired;
        device
    }

    #[test]
    fn render_marks_selection_and_lists_sets() {
        let mut adapter = Adapter::new(AdapterId::from("/org/bluez/hci0"));
        adapter.powered = true;
        let adapters = [adapter];
        let mut headset = device("A", "Headset", true);
        headset.set_battery(80);
        let paired = [headset, device("B", "Keyboard", true)];
        let unpaired = [device("C", "Speaker", false)];
        let snapshot = Snapshot {
            adapters: &adapters,
            paired: &paired,
            unpaired: &unpaired,
            selected: Some(&paired[0].id),
            last_error: Some("could not pair"),
        };
        let text = render(&snapshot, None, false, 80);
        assert!(text.contains(">  1  Headset"));
        assert!(text.contains("   2  Keyboard"));
        assert!(text.contains("Speaker"));
        assert!(text.contains("80%"));
        assert!(text.contains("powered"));
        assert!(text.contains("could not pair"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn render_shows_pending_prompt() {
        let snapshot = Snapshot {
            adapters: &[],
            paired: &[],
            unpaired: &[],
            selected: None,
            last_error: None,
        };
        let request = PendingCredentialRequest {
            device: DeviceId::from("/org/bluez/hci0/dev_A"),
            device_name: "Speaker".into(),
            kind: CredentialKind::Confirm { passkey: 42 },
        };
        let text = render(&snapshot, Some(&request), true, 80);
        assert!(text.contains("Does 000042 match the code on Speaker?"));
        assert!(text.contains("no adapter found"));
        assert!(text.contains(ANSI_YELLOW));
    }
}

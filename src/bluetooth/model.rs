// vim: cc=81
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Replacement for names made of symbols the terminal cannot be trusted to
/// render with a predictable width.
pub const UNPRINTABLE_PLACEHOLDER: &str = "[?]";

static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{So}\p{Sk}\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}]+")
        .expect("emoji pattern is valid")
});

/// Object path of an adapter, e.g. /org/bluez/hci0
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(pub String);

/// Object path of a device, e.g. /org/bluez/hci0/dev_00_11_22_33_44_55
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl AdapterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, "hci0" for /org/bluez/hci0.
    pub fn label(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BlueZ nests device objects below the adapter that owns them.
    pub fn adapter(&self) -> Option<AdapterId> {
        let (parent, leaf) = self.0.rsplit_once('/')?;
        if parent.is_empty() || !leaf.starts_with("dev_") {
            return None;
        }
        Some(AdapterId(parent.to_string()))
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(path: &str) -> Self {
        DeviceId(path.to_string())
    }
}

impl From<&str> for AdapterId {
    fn from(path: &str) -> Self {
        AdapterId(path.to_string())
    }
}

/// Local Bluetooth controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub id: AdapterId,
    pub name: String,
    pub address: String,
    pub powered: bool,
    /// Reported by BlueZ as "Discovering"
    pub scanning: bool,
    pub discoverable: bool,
    /// e.g. "usb:v1D6Bp0246d0532"
    pub modalias: Option<String>,
}

impl Adapter {
    pub fn new(id: AdapterId) -> Adapter {
        Adapter {
            id,
            name: String::new(),
            address: String::new(),
            powered: false,
            scanning: false,
            discoverable: false,
            modalias: None,
        }
    }
}

/// Remote Bluetooth device, paired or discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    /// Displayed name: the alias if one is known, else the remote name
    pub name: String,
    pub address: String,
    pub address_type: String,
    pub icon: Icon,
    pub paired: bool,
    pub trusted: bool,
    pub connected: bool,
    pub connectable: bool,
    /// Percentage, -1 if the device reports no battery
    pub battery: i8,
    /// Signal strength in dBm, 0 if unknown
    pub rssi: i16,

    /// Unlike name this cannot be renamed locally
    pub remote_name: Option<String>,
    pub alias: Option<String>,
}

impl Device {
    pub fn new(id: DeviceId) -> Device {
        Device {
            id,
            name: String::new(),
            address: String::new(),
            address_type: String::new(),
            icon: Icon::Unknown,
            paired: false,
            trusted: false,
            connected: false,
            connectable: false,
            battery: -1,
            rssi: 0,
            remote_name: None,
            alias: None,
        }
    }

    pub fn set_remote_name(&mut self, name: &str) {
        self.remote_name = Some(sanitize_name(name));
        self.refresh_name();
    }

    /// Alias is explicit user intent and outranks the advertised name.
    pub fn set_alias(&mut self, alias: &str) {
        self.alias = Some(sanitize_name(alias));
        self.refresh_name();
    }

    pub fn set_battery(&mut self, percentage: u8) {
        self.battery = i8::try_from(percentage.min(100)).unwrap_or(100);
    }

    fn refresh_name(&mut self) {
        self.name = self
            .alias
            .clone()
            .or_else(|| self.remote_name.clone())
            .unwrap_or_default();
    }
}

/// Coarse device category derived from the BlueZ icon name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Audio,
    Keyboard,
    Mouse,
    Tablet,
    Controller,
    Phone,
    Computer,
    Camera,
    Printer,
    NetAdapter,
    Unknown,
}

impl Icon {
    pub fn from_bluez(icon: &str) -> Icon {
        match icon {
            "audio-card" | "audio-headset" | "audio-headphones"
            | "audio-speaker" => Icon::Audio,
            "input-keyboard" => Icon::Keyboard,
            "input-mouse" => Icon::Mouse,
            "input-tablet" => Icon::Tablet,
            "input-gaming" => Icon::Controller,
            "phone" => Icon::Phone,
            "computer" | "computer-laptop" => Icon::Computer,
            "camera" | "camera-video" | "camera-photo" => Icon::Camera,
            "printer" => Icon::Printer,
            "network-wireless" => Icon::NetAdapter,
            _ => Icon::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Icon::Audio => "Audio",
            Icon::Keyboard => "Keyboard",
            Icon::Mouse => "Mouse",
            Icon::Tablet => "Tablet",
            Icon::Controller => "Controller",
            Icon::Phone => "Phone",
            Icon::Computer => "Computer",
            Icon::Camera => "Camera",
            Icon::Printer => "Printer",
            Icon::NetAdapter => "Net Adapter",
            Icon::Unknown => "Unknown",
        }
    }
}

/// Replaces runs of emoji and other pictographs with a placeholder.
pub fn sanitize_name(name: &str) -> String {
    EMOJI_RE
        .replace_all(name, UNPRINTABLE_PLACEHOLDER)
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("audio-headset", Icon::Audio)]
    #[case("audio-card", Icon::Audio)]
    #[case("input-gaming", Icon::Controller)]
    #[case("computer-laptop", Icon::Computer)]
    #[case("network-wireless", Icon::NetAdapter)]
    #[case("", Icon::Unknown)]
    #[case("something-new", Icon::Unknown)]
    fn normalizes_icons(#[case] raw: &str, #[case] expected: Icon) {
        assert_eq!(Icon::from_bluez(raw), expected);
    }

    #[test]
    fn alias_outranks_remote_name_in_any_order() {
        let mut device = Device::new("/org/bluez/hci0/dev_A".into());
        device.set_remote_name("WH-1000XM4");
        assert_eq!(device.name, "WH-1000XM4");
        device.set_alias("Headphones");
        assert_eq!(device.name, "Headphones");
        device.set_remote_name("WH-1000XM5");
        assert_eq!(device.name, "Headphones");
        assert_eq!(device.remote_name.as_deref(), Some("WH-1000XM5"));
    }

    #[test]
    fn emoji_runs_become_placeholder() {
        assert_eq!(sanitize_name("Buds \u{1F3A7}\u{1F3B5}"), "Buds [?]");
        assert_eq!(sanitize_name("Plain name"), "Plain name");
    }

    #[test]
    fn battery_is_clamped() {
        let mut device = Device::new("/org/bluez/hci0/dev_A".into());
        assert_eq!(device.battery, -1);
        device.set_battery(250);
        assert_eq!(device.battery, 100);
        device.set_battery(42);
        assert_eq!(device.battery, 42);
    }

    #[test]
    fn device_path_names_its_adapter() {
        let id = DeviceId::from("/org/bluez/hci1/dev_00_11_22_33_44_55");
        assert_eq!(id.adapter(), Some(AdapterId::from("/org/bluez/hci1")));
        assert_eq!(DeviceId::from("/weird").adapter(), None);
        assert_eq!(AdapterId::from("/org/bluez/hci1").label(), "hci1");
    }
}

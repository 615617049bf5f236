// vim: cc=81
//! Typed decoding of BlueZ property maps.
//!
//! Property maps arrive keyed by strings with dynamically typed values.
//! They are decoded once, here, into one variant per recognized key. Keys
//! outside the recognized set are ignored and a value of the wrong type only
//! drops that key.

use super::{
    Adapter, AdapterId, Device, DeviceId, InterfaceMap, ManagedObjects,
    PropMap, PropValue, ADAPTER_INTERFACE, BATTERY_INTERFACE, DEVICE_INTERFACE,
};
use crate::error::DecodeError;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "^[0-9A-Fa-f]{2}[-:][0-9A-Fa-f]{2}[-:][0-9A-Fa-f]{2}[-:]\
        [0-9A-Fa-f]{2}[-:][0-9A-Fa-f]{2}[-:][0-9A-Fa-f]{2}$",
    )
    .expect("MAC address pattern is valid")
});

/// Service classes that make an unnamed device worth listing.
pub const USEFUL_SERVICE_UUIDS: [&str; 8] = [
    "0000110a-0000-1000-8000-00805f9b34fb", // A2DP Source
    "0000110b-0000-1000-8000-00805f9b34fb", // A2DP Sink
    "00001108-0000-1000-8000-00805f9b34fb", // HSP
    "0000111e-0000-1000-8000-00805f9b34fb", // HFP
    "00001112-0000-1000-8000-00805f9b34fb", // HID
    "00001124-0000-1000-8000-00805f9b34fb", // AVRCP
    "0000180f-0000-1000-8000-00805f9b34fb", // Battery Service
    "0000180a-0000-1000-8000-00805f9b34fb", // Device Information
];

/// GAP appearance codes that make an unnamed device worth listing.
pub const USEFUL_APPEARANCES: [u16; 7] = [
    0x0040, // Computer
    0x0140, // Phone
    0x0440, // Headphones
    0x0441, // Headset
    0x0408, // Car
    0x0540, // Clock
    0x04C0, // Wearable
];

/// One recognized key of org.bluez.Device1 or org.bluez.Battery1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceProp {
    Name(String),
    Alias(String),
    Address(String),
    AddressType(String),
    Icon(String),
    Paired(bool),
    Trusted(bool),
    Connected(bool),
    Connectable(bool),
    Rssi(i16),
    Appearance(u16),
    Uuids(Vec<String>),
    /// Battery1.Percentage
    Battery(u8),
    /// The battery interface went away
    BatteryGone,
}

/// One recognized key of org.bluez.Adapter1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterProp {
    Name(String),
    Address(String),
    Powered(bool),
    Discoverable(bool),
    Modalias(String),
    Discovering(bool),
}

fn invalid(key: &str, expected: &'static str) -> DecodeError {
    DecodeError::InvalidValue {
        key: key.to_string(),
        expected,
    }
}

fn string(key: &str, value: &PropValue) -> Result<String, DecodeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, "a string"))
}

fn boolean(key: &str, value: &PropValue) -> Result<bool, DecodeError> {
    value.as_bool().ok_or_else(|| invalid(key, "a boolean"))
}

impl DeviceProp {
    /// Decodes one Device1 key. None if the key is not recognized.
    pub fn decode(
        key: &str,
        value: &PropValue,
    ) -> Option<Result<DeviceProp, DecodeError>> {
        let decoded = match key {
            "Name" => string(key, value).map(DeviceProp::Name),
            "Alias" => string(key, value).map(DeviceProp::Alias),
            "Address" => string(key, value).map(DeviceProp::Address),
            "AddressType" => string(key, value).map(DeviceProp::AddressType),
            "Icon" => string(key, value).map(DeviceProp::Icon),
            "Paired" => boolean(key, value).map(DeviceProp::Paired),
            "Trusted" => boolean(key, value).map(DeviceProp::Trusted),
            "Connected" => boolean(key, value).map(DeviceProp::Connected),
            "Connectable" => boolean(key, value).map(DeviceProp::Connectable),
            "RSSI" => value
                .as_i16()
                .map(DeviceProp::Rssi)
                .ok_or_else(|| invalid(key, "an int16")),
            "Appearance" => value
                .as_u16()
                .map(DeviceProp::Appearance)
                .ok_or_else(|| invalid(key, "a uint16")),
            "UUIDs" => value
                .as_str_list()
                .map(DeviceProp::Uuids)
                .ok_or_else(|| invalid(key, "a string array")),
            _ => return None,
        };
        Some(decoded)
    }

    /// Decodes one Battery1 key. None if the key is not recognized.
    pub fn decode_battery(
        key: &str,
        value: &PropValue,
    ) -> Option<Result<DeviceProp, DecodeError>> {
        match key {
            "Percentage" => Some(
                value
                    .as_u8()
                    .map(DeviceProp::Battery)
                    .ok_or_else(|| invalid(key, "a byte")),
            ),
            _ => None,
        }
    }

    pub fn apply(&self, device: &mut Device) {
        match self {
            DeviceProp::Name(name) => device.set_remote_name(name),
            DeviceProp::Alias(alias) => device.set_alias(alias),
            DeviceProp::Address(address) => device.address = address.clone(),
            DeviceProp::AddressType(kind) => device.address_type = kind.clone(),
            DeviceProp::Icon(icon) => {
                device.icon = super::model::Icon::from_bluez(icon);
            }
            DeviceProp::Paired(paired) => device.paired = *paired,
            DeviceProp::Trusted(trusted) => device.trusted = *trusted,
            DeviceProp::Connected(connected) => device.connected = *connected,
            DeviceProp::Connectable(val) => device.connectable = *val,
            DeviceProp::Rssi(rssi) => device.rssi = *rssi,
            DeviceProp::Battery(percentage) => device.set_battery(*percentage),
            DeviceProp::BatteryGone => device.battery = -1,
            // Only consulted by the usability filter
            DeviceProp::Appearance(_) | DeviceProp::Uuids(_) => (),
        }
    }
}

impl AdapterProp {
    /// Decodes one Adapter1 key. None if the key is not recognized.
    pub fn decode(
        key: &str,
        value: &PropValue,
    ) -> Option<Result<AdapterProp, DecodeError>> {
        let decoded = match key {
            "Name" => string(key, value).map(AdapterProp::Name),
            "Address" => string(key, value).map(AdapterProp::Address),
            "Powered" => boolean(key, value).map(AdapterProp::Powered),
            "Discoverable" => boolean(key, value).map(AdapterProp::Discoverable),
            "Modalias" => string(key, value).map(AdapterProp::Modalias),
            "Discovering" => boolean(key, value).map(AdapterProp::Discovering),
            _ => return None,
        };
        Some(decoded)
    }

    pub fn apply(&self, adapter: &mut Adapter) {
        match self {
            AdapterProp::Name(name) => adapter.name = name.clone(),
            AdapterProp::Address(address) => adapter.address = address.clone(),
            AdapterProp::Powered(powered) => adapter.powered = *powered,
            AdapterProp::Discoverable(val) => adapter.discoverable = *val,
            AdapterProp::Modalias(alias) => adapter.modalias = Some(alias.clone()),
            AdapterProp::Discovering(val) => adapter.scanning = *val,
        }
    }
}

/// Decodes every recognized key of props, skipping the ones that fail.
fn decode_all<T>(
    props: &PropMap,
    decode: fn(&str, &PropValue) -> Option<Result<T, DecodeError>>,
) -> Vec<T> {
    let mut keys: Vec<&String> = props.keys().collect();
    // Stable order keeps logs and tests deterministic
    keys.sort();
    keys.into_iter()
        .filter_map(|key| match decode(key, &props[key.as_str()])? {
            Ok(prop) => Some(prop),
            Err(error) => {
                debug!("skipping property: {error}");
                None
            }
        })
        .collect()
}

pub fn decode_device_props(props: &PropMap) -> Vec<DeviceProp> {
    decode_all(props, DeviceProp::decode)
}

pub fn decode_battery_props(props: &PropMap) -> Vec<DeviceProp> {
    decode_all(props, DeviceProp::decode_battery)
}

pub fn decode_adapter_props(props: &PropMap) -> Vec<AdapterProp> {
    decode_all(props, AdapterProp::decode)
}

/// A device together with the advertisement data that decides whether it is
/// listed at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device: Device,
    /// Raw Name property, before alias handling
    pub advertised_name: Option<String>,
    pub appearance: Option<u16>,
    pub uuids: Vec<String>,
}

impl DeviceRecord {
    /// Builds a record from the interfaces of one object. None if the object
    /// does not carry the device interface.
    pub fn from_interfaces(
        id: DeviceId,
        interfaces: &InterfaceMap,
    ) -> Option<DeviceRecord> {
        let props = interfaces.get(DEVICE_INTERFACE)?;
        let mut record = DeviceRecord {
            device: Device::new(id),
            advertised_name: None,
            appearance: None,
            uuids: Vec::new(),
        };
        let mut changes = decode_device_props(props);
        if let Some(battery) = interfaces.get(BATTERY_INTERFACE) {
            changes.extend(decode_battery_props(battery));
        }
        for change in &changes {
            match change {
                DeviceProp::Name(name) => {
                    record.advertised_name = Some(name.clone());
                }
                DeviceProp::Appearance(code) => record.appearance = Some(*code),
                DeviceProp::Uuids(uuids) => record.uuids = uuids.clone(),
                _ => (),
            }
            change.apply(&mut record.device);
        }
        Some(record)
    }

    /// Whether the device is something a user would want to see rather than
    /// advertising noise: it needs a real name, a wanted appearance or a
    /// wanted service.
    pub fn is_usable(&self) -> bool {
        let named = self
            .advertised_name
            .as_deref()
            .is_some_and(|name| !name.is_empty() && !MAC_RE.is_match(name));
        let wanted_appearance = self
            .appearance
            .is_some_and(|code| USEFUL_APPEARANCES.contains(&code));
        let wanted_service = self.uuids.iter().any(|uuid| {
            USEFUL_SERVICE_UUIDS
                .iter()
                .any(|useful| useful.eq_ignore_ascii_case(uuid))
        });
        named || wanted_appearance || wanted_service
    }
}

/// Everything a full state query returned, already decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub adapters: Vec<Adapter>,
    pub devices: Vec<DeviceRecord>,
}

impl Inventory {
    pub fn from_managed_objects(objects: &ManagedObjects) -> Inventory {
        let mut inventory = Inventory::default();
        for (path, interfaces) in objects {
            if let Some(props) = interfaces.get(ADAPTER_INTERFACE) {
                let mut adapter = Adapter::new(AdapterId(path.clone()));
                for change in decode_adapter_props(props) {
                    change.apply(&mut adapter);
                }
                inventory.adapters.push(adapter);
            }
            if let Some(record) =
                DeviceRecord::from_interfaces(DeviceId(path.clone()), interfaces)
            {
                inventory.devices.push(record);
            }
        }
        inventory
    }
}

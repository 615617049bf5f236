// vim: cc=81
pub mod agent;
pub mod bluez;
pub mod commands;
pub mod dispatcher;
pub mod model;
pub mod props;
pub mod radio;
pub mod refresh;
pub mod store;

#[cfg(test)]
pub mod testing;

use crate::error::TransportError;
use std::collections::{BTreeMap, HashMap};

pub use model::{Adapter, AdapterId, Device, DeviceId};

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const BATTERY_INTERFACE: &str = "org.bluez.Battery1";
pub const AGENT_INTERFACE: &str = "org.bluez.Agent1";
pub const AGENT_MANAGER_INTERFACE: &str = "org.bluez.AgentManager1";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Transport neutral copy of a dynamically typed bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Array(Vec<PropValue>),
    Dict(PropMap),
    /// Anything else, identified by its type signature
    Unsupported(String),
}

pub type PropMap = HashMap<String, PropValue>;
/// interface -> property -> value
pub type InterfaceMap = HashMap<String, PropMap>;
/// object path -> interface -> property -> value, ordered by path
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

impl PropValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::Byte(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::Int16(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::UInt16(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(val) => Some(val),
            _ => None,
        }
    }

    /// Object paths are also accepted as plain strings.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Self::ObjectPath(val) | Self::Str(val) => Some(val),
            _ => None,
        }
    }

    /// Array of strings; None if any element is not a string.
    pub fn as_str_list(&self) -> Option<Vec<String>> {
        match self {
            Self::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&PropMap> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }
}

/// One signal as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    /// Object path the signal was emitted on
    pub path: String,
    pub interface: String,
    pub member: String,
    pub body: Vec<PropValue>,
}

/// Method calls the command layer issues against adapters and devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    StartDiscovery,
    StopDiscovery,
    /// Carries the object path of the device to remove
    RemoveDevice(String),
    Connect,
    Disconnect,
    Pair,
}

impl Method {
    pub fn interface(&self) -> &'static str {
        match self {
            Self::StartDiscovery | Self::StopDiscovery | Self::RemoveDevice(_) => {
                ADAPTER_INTERFACE
            }
            Self::Connect | Self::Disconnect | Self::Pair => DEVICE_INTERFACE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartDiscovery => "StartDiscovery",
            Self::StopDiscovery => "StopDiscovery",
            Self::RemoveDevice(_) => "RemoveDevice",
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Pair => "Pair",
        }
    }
}

/// Synchronous call surface of the system Bluetooth service.
pub trait BluetoothTransport: Send + Sync {
    /// Full state query.
    fn managed_objects(&self) -> Result<ManagedObjects, TransportError>;
    fn get_property(
        &self,
        path: &str,
        interface: &str,
        key: &str,
    ) -> Result<PropValue, TransportError>;
    fn set_property(
        &self,
        path: &str,
        interface: &str,
        key: &str,
        value: PropValue,
    ) -> Result<(), TransportError>;
    /// Calls method on the object at path and waits for the reply.
    fn call(&self, path: &str, method: Method) -> Result<(), TransportError>;
}

/// Blocking pull side of the signal subscription.
pub trait SignalSource: Send {
    /// Waits a bounded time for the next signal. Ok(None) means nothing
    /// arrived yet; callers are expected to ask again.
    fn next_signal(&mut self) -> Result<Option<RawSignal>, TransportError>;
}

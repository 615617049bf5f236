// vim: cc=81
//! BlueZ over the system D-Bus.
pub mod agent;

use super::dispatcher::{
    INTERFACES_ADDED, INTERFACES_REMOVED, PROPERTIES_CHANGED,
};
use super::{
    BluetoothTransport, InterfaceMap, ManagedObjects, Method, PropMap,
    PropValue, RawSignal, SignalSource, OBJECT_MANAGER_INTERFACE,
    PROPERTIES_INTERFACE,
};
use crate::error::TransportError;
use crossbeam::channel::{self, Receiver};
use dbus::{
    arg::{ArgType, RefArg, Variant},
    blocking::{
        stdintf::org_freedesktop_dbus::{ObjectManager, Properties},
        Connection, Proxy, SyncConnection,
    },
    channel::MatchingReceiver,
    message::MatchRule,
    Message, Path,
};
use std::time::Duration;
use tracing::debug;

pub const BLUEZ_DBUS: &str = "org.bluez";
/// Object implementing org.bluez.AgentManager1
pub const BLUEZ_ROOT: &str = "/org/bluez";

fn call_error(path: &str, method: &str, err: dbus::Error) -> TransportError {
    let message = err
        .message()
        .or_else(|| err.name())
        .unwrap_or("unknown error");
    TransportError::call(path, method, message)
}

/// Copies a dynamically typed D-Bus value into a PropValue.
pub fn prop_value(arg: &dyn RefArg) -> PropValue {
    let value = match arg.arg_type() {
        ArgType::Boolean => arg
            .as_i64()
            .or_else(|| arg.as_u64().and_then(|val| i64::try_from(val).ok()))
            .map(|val| PropValue::Bool(val != 0)),
        ArgType::Byte => arg
            .as_u64()
            .and_then(|val| u8::try_from(val).ok())
            .map(PropValue::Byte),
        ArgType::Int16 => arg
            .as_i64()
            .and_then(|val| i16::try_from(val).ok())
            .map(PropValue::Int16),
        ArgType::UInt16 => arg
            .as_u64()
            .and_then(|val| u16::try_from(val).ok())
            .map(PropValue::UInt16),
        ArgType::Int32 => arg
            .as_i64()
            .and_then(|val| i32::try_from(val).ok())
            .map(PropValue::Int32),
        ArgType::UInt32 => arg
            .as_u64()
            .and_then(|val| u32::try_from(val).ok())
            .map(PropValue::UInt32),
        ArgType::Int64 => arg.as_i64().map(PropValue::Int64),
        ArgType::UInt64 => arg.as_u64().map(PropValue::UInt64),
        ArgType::Double => arg.as_f64().map(PropValue::Double),
        ArgType::String => arg.as_str().map(|s| PropValue::Str(s.to_string())),
        ArgType::ObjectPath => {
            arg.as_str().map(|s| PropValue::ObjectPath(s.to_string()))
        }
        // Variants are transparent
        ArgType::Variant => arg.as_iter().and_then(|mut inner| {
            inner.next().map(|value| prop_value(value))
        }),
        ArgType::Array if arg.signature().starts_with("a{") => {
            dict_value(arg).map(PropValue::Dict)
        }
        ArgType::Array => arg.as_iter().map(|items| {
            PropValue::Array(items.map(|item| prop_value(item)).collect())
        }),
        _ => None,
    };
    value.unwrap_or_else(|| PropValue::Unsupported(arg.signature().to_string()))
}

/// Dictionaries iterate as key, value, key, value...
fn dict_value(arg: &dyn RefArg) -> Option<PropMap> {
    let mut entries = arg.as_iter()?;
    let mut map = PropMap::new();
    while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
        let key = match key.as_str() {
            Some(key) => key.to_string(),
            None => match key.as_i64() {
                Some(number) => number.to_string(),
                None => continue,
            },
        };
        map.insert(key, prop_value(value));
    }
    Some(map)
}

/// Synchronous calls, shared by the command and resync threads.
pub struct BluezTransport {
    connection: SyncConnection,
    timeout: Duration,
}

impl BluezTransport {
    pub fn new(timeout: Duration) -> Result<BluezTransport, dbus::Error> {
        Ok(BluezTransport {
            connection: SyncConnection::new_system()?,
            timeout,
        })
    }

    fn proxy<'a>(&'a self, path: &'a str) -> Proxy<'a, &'a SyncConnection> {
        self.connection.with_proxy(BLUEZ_DBUS, path, self.timeout)
    }
}

impl BluetoothTransport for BluezTransport {
    fn managed_objects(&self) -> Result<ManagedObjects, TransportError> {
        let objects = self
            .proxy("/")
            .get_managed_objects()
            .map_err(|err| call_error("/", "GetManagedObjects", err))?;
        Ok(objects
            .into_iter()
            .map(|(path, interfaces)| {
                let interfaces: InterfaceMap = interfaces
                    .into_iter()
                    .map(|(name, props)| {
                        let props: PropMap = props
                            .iter()
                            .map(|(key, value)| (key.clone(), prop_value(value)))
                            .collect();
                        (name, props)
                    })
                    .collect();
                (path.to_string(), interfaces)
            })
            .collect())
    }

    fn get_property(
        &self,
        path: &str,
        interface: &str,
        key: &str,
    ) -> Result<PropValue, TransportError> {
        let (value,): (Variant<Box<dyn RefArg>>,) = self
            .proxy(path)
            .method_call(PROPERTIES_INTERFACE, "Get", (interface, key))
            .map_err(|err| call_error(path, "Get", err))?;
        Ok(prop_value(&value))
    }

    fn set_property(
        &self,
        path: &str,
        interface: &str,
        key: &str,
        value: PropValue,
    ) -> Result<(), TransportError> {
        let proxy = self.proxy(path);
        let result = match value {
            PropValue::Bool(val) => proxy.set(interface, key, val),
            PropValue::Str(val) => proxy.set(interface, key, val),
            other => {
                return Err(TransportError::call(
                    path,
                    "Set",
                    format!("cannot set {key} to {other:?}"),
                ))
            }
        };
        result.map_err(|err| call_error(path, "Set", err))
    }

    fn call(&self, path: &str, method: Method) -> Result<(), TransportError> {
        let proxy = self.proxy(path);
        let name = method.name();
        let result: Result<(), dbus::Error> = match &method {
            Method::RemoveDevice(device) => {
                let device = Path::new(device.as_str()).map_err(|err| {
                    TransportError::call(path, name, err)
                })?;
                proxy.method_call(method.interface(), name, (device,))
            }
            _ => proxy.method_call(method.interface(), name, ()),
        };
        result.map_err(|err| call_error(path, name, err))
    }
}

/// The signal subscription. Owned by the dispatcher thread.
pub struct BluezSignals {
    connection: Connection,
    received: Receiver<RawSignal>,
    poll: Duration,
}

impl BluezSignals {
    /// Subscribes to object and property changes of org.bluez. poll bounds
    /// every wait in next_signal.
    pub fn subscribe(poll: Duration) -> Result<BluezSignals, dbus::Error> {
        let connection = Connection::new_system()?;
        let (sender, received) = channel::unbounded();
        for rule in signal_rules() {
            // The bus sees the well known name, messages carry the unique one
            connection.add_match_no_cb(
                &rule.clone().with_sender(BLUEZ_DBUS).match_str(),
            )?;
            let sender = sender.clone();
            connection.start_receive(
                rule,
                Box::new(move |msg, _conn| {
                    if let Some(raw) = raw_signal(&msg) {
                        let _ = sender.send(raw);
                    }
                    true
                }),
            );
        }
        Ok(BluezSignals {
            connection,
            received,
            poll,
        })
    }
}

fn signal_rules() -> [MatchRule<'static>; 3] {
    [
        MatchRule::new_signal(OBJECT_MANAGER_INTERFACE, INTERFACES_ADDED),
        MatchRule::new_signal(OBJECT_MANAGER_INTERFACE, INTERFACES_REMOVED),
        MatchRule::new_signal(PROPERTIES_INTERFACE, PROPERTIES_CHANGED),
    ]
}

fn raw_signal(msg: &Message) -> Option<RawSignal> {
    let raw = RawSignal {
        path: msg.path()?.to_string(),
        interface: msg.interface()?.to_string(),
        member: msg.member()?.to_string(),
        body: msg.iter_init().map(|arg| prop_value(&*arg)).collect(),
    };
    Some(raw)
}

impl SignalSource for BluezSignals {
    fn next_signal(&mut self) -> Result<Option<RawSignal>, TransportError> {
        if let Ok(raw) = self.received.try_recv() {
            return Ok(Some(raw));
        }
        self.connection
            .process(self.poll)
            .map_err(|err| TransportError::ConnectionLost(err.to_string()))?;
        let raw = self.received.try_recv().ok();
        if let Some(raw) = &raw {
            debug!("{} on {}", raw.member, raw.path);
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn converts_basic_types() {
        assert_eq!(prop_value(&true), PropValue::Bool(true));
        assert_eq!(prop_value(&7u8), PropValue::Byte(7));
        assert_eq!(prop_value(&-52i16), PropValue::Int16(-52));
        assert_eq!(prop_value(&0x0441u16), PropValue::UInt16(0x0441));
        assert_eq!(prop_value(&"hci0".to_string()), PropValue::Str("hci0".into()));
        assert_eq!(
            prop_value(&Path::from("/org/bluez/hci0")),
            PropValue::ObjectPath("/org/bluez/hci0".into())
        );
    }

    #[test]
    fn unwraps_variants_and_arrays() {
        let variant = Variant(Box::new(-60i16) as Box<dyn RefArg>);
        assert_eq!(prop_value(&variant), PropValue::Int16(-60));
        let uuids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            prop_value(&uuids),
            PropValue::Array(vec![PropValue::Str("a".into()), PropValue::Str("b".into())])
        );
    }

    #[test]
    fn converts_property_dicts() {
        let mut props: HashMap<String, Variant<Box<dyn RefArg>>> = HashMap::new();
        props.insert("Paired".into(), Variant(Box::new(true)));
        props.insert("Name".into(), Variant(Box::new("Mic".to_string())));
        let expected: PropMap = [
            ("Paired".to_string(), PropValue::Bool(true)),
            ("Name".to_string(), PropValue::Str("Mic".into())),
        ]
        .into();
        assert_eq!(prop_value(&props), PropValue::Dict(expected));
    }

    #[test]
    fn received_properties_changed_decodes() {
        use crate::bluetooth::dispatcher::{decode, SignalEvent};
        use crate::bluetooth::props::DeviceProp;

        let path = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF";
        let mut changed: HashMap<String, Variant<Box<dyn RefArg>>> =
            HashMap::new();
        changed.insert("Paired".into(), Variant(Box::new(true)));
        changed.insert("RSSI".into(), Variant(Box::new(-40i16)));
        let msg =
            Message::new_signal(path, PROPERTIES_INTERFACE, PROPERTIES_CHANGED)
                .expect("valid signal header")
                .append3(
                    "org.bluez.Device1",
                    changed,
                    Vec::<String>::new(),
                );
        assert!(signal_rules().iter().any(|rule| rule.matches(&msg)));

        let raw = raw_signal(&msg).expect("signal has a header");
        let Ok(SignalEvent::DeviceChanged { id, mut changes }) = decode(&raw)
        else {
            panic!("not a device change: {raw:?}");
        };
        changes.sort_by_key(|change| format!("{change:?}"));
        assert_eq!(id.0, path);
        assert_eq!(changes, vec![DeviceProp::Paired(true), DeviceProp::Rssi(-40)]);
    }
}

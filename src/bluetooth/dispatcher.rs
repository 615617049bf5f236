// vim: cc=81
//! Turns raw signals into typed events, one at a time.

use super::props::{
    decode_adapter_props, decode_battery_props, decode_device_props,
    AdapterProp, DeviceProp, DeviceRecord,
};
use super::{
    AdapterId, DeviceId, InterfaceMap, PropMap, PropValue, RawSignal,
    SignalSource, ADAPTER_INTERFACE, BATTERY_INTERFACE, DEVICE_INTERFACE,
};
use crate::error::{DecodeError, TransportError};
use crossbeam::channel::Sender;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    AdapterChanged {
        id: AdapterId,
        changes: Vec<AdapterProp>,
    },
    DeviceChanged {
        id: DeviceId,
        changes: Vec<DeviceProp>,
    },
    DeviceAdded(DeviceRecord),
    DeviceRemoved(DeviceId),
    Unrecognized,
}

/// Body argument at index, or a DecodeError naming what is missing.
fn arg<'a>(
    raw: &'a RawSignal,
    index: usize,
) -> Result<&'a PropValue, DecodeError> {
    raw.body.get(index).ok_or_else(|| DecodeError::MissingArgument {
        member: raw.member.clone(),
        index,
    })
}

fn unexpected(raw: &RawSignal, index: usize, expected: &'static str) -> DecodeError {
    DecodeError::UnexpectedType {
        member: raw.member.clone(),
        index,
        expected,
    }
}

/// Decodes one signal into exactly one event.
pub fn decode(raw: &RawSignal) -> Result<SignalEvent, DecodeError> {
    match raw.member.as_str() {
        INTERFACES_ADDED => decode_added(raw),
        INTERFACES_REMOVED => decode_removed(raw),
        PROPERTIES_CHANGED => decode_changed(raw),
        _ => Ok(SignalEvent::Unrecognized),
    }
}

fn decode_added(raw: &RawSignal) -> Result<SignalEvent, DecodeError> {
    let path = arg(raw, 0)?
        .as_path()
        .ok_or_else(|| unexpected(raw, 0, "an object path"))?;
    let payload = arg(raw, 1)?
        .as_dict()
        .ok_or_else(|| unexpected(raw, 1, "an interface dictionary"))?;
    let mut interfaces = InterfaceMap::new();
    for (name, props) in payload {
        let props = props
            .as_dict()
            .ok_or_else(|| unexpected(raw, 1, "a property dictionary"))?;
        interfaces.insert(name.clone(), props.clone());
    }

    let id = DeviceId(path.to_string());
    if let Some(record) = DeviceRecord::from_interfaces(id.clone(), &interfaces)
    {
        return Ok(SignalEvent::DeviceAdded(record));
    }
    // Battery1 shows up on its own once the device exposes the service
    if let Some(battery) = interfaces.get(BATTERY_INTERFACE) {
        return Ok(device_changed(id, decode_battery_props(battery)));
    }
    Ok(SignalEvent::Unrecognized)
}

fn decode_removed(raw: &RawSignal) -> Result<SignalEvent, DecodeError> {
    let path = arg(raw, 0)?
        .as_path()
        .ok_or_else(|| unexpected(raw, 0, "an object path"))?;
    let interfaces = arg(raw, 1)?
        .as_str_list()
        .ok_or_else(|| unexpected(raw, 1, "an array of interface names"))?;

    let id = DeviceId(path.to_string());
    let lists = |name: &str| interfaces.iter().any(|iface| iface == name);
    if lists(DEVICE_INTERFACE) {
        Ok(SignalEvent::DeviceRemoved(id))
    } else if lists(BATTERY_INTERFACE) {
        Ok(SignalEvent::DeviceChanged {
            id,
            changes: vec![DeviceProp::BatteryGone],
        })
    } else {
        Ok(SignalEvent::Unrecognized)
    }
}

fn decode_changed(raw: &RawSignal) -> Result<SignalEvent, DecodeError> {
    let interface = arg(raw, 0)?
        .as_str()
        .ok_or_else(|| unexpected(raw, 0, "an interface name"))?;
    let changed: &PropMap = arg(raw, 1)?
        .as_dict()
        .ok_or_else(|| unexpected(raw, 1, "a property dictionary"))?;

    let event = match interface {
        DEVICE_INTERFACE => {
            device_changed(DeviceId(raw.path.clone()), decode_device_props(changed))
        }
        BATTERY_INTERFACE => {
            device_changed(DeviceId(raw.path.clone()), decode_battery_props(changed))
        }
        ADAPTER_INTERFACE => {
            let changes = decode_adapter_props(changed);
            if changes.is_empty() {
                SignalEvent::Unrecognized
            } else {
                SignalEvent::AdapterChanged {
                    id: AdapterId(raw.path.clone()),
                    changes,
                }
            }
        }
        _ => SignalEvent::Unrecognized,
    };
    Ok(event)
}

fn device_changed(id: DeviceId, changes: Vec<DeviceProp>) -> SignalEvent {
    if changes.is_empty() {
        SignalEvent::Unrecognized
    } else {
        SignalEvent::DeviceChanged { id, changes }
    }
}

/// Pulls signals from source until shutdown is set, the receiving side hangs
/// up or the connection is lost. A lost connection is forwarded as the last
/// message.
pub fn run(
    mut source: impl SignalSource,
    events: Sender<Result<SignalEvent, TransportError>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let raw = match source.next_signal() {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(err) => {
                error!("signal stream ended: {err}");
                let _ = events.send(Err(err));
                return;
            }
        };
        match decode(&raw) {
            Ok(SignalEvent::Unrecognized) => {
                debug!("ignoring {} on {} ({})", raw.member, raw.path, raw.interface);
            }
            Ok(event) => {
                if events.send(Ok(event)).is_err() {
                    return;
                }
            }
            Err(err) => debug!("dropping malformed signal on {}: {err}", raw.path),
        }
    }
}

/// Runs the dispatcher on its own thread.
pub fn spawn(
    source: impl SignalSource + 'static,
    events: Sender<Result<SignalEvent, TransportError>>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signal-dispatcher".into())
        .spawn(move || run(source, events, shutdown))
}

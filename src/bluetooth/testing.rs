// vim: cc=81
//! In-memory stand-ins for the bus, used by unit tests.

use super::radio::RadioSwitch;
use super::{
    BluetoothTransport, ManagedObjects, Method, PropValue, RawSignal,
    SignalSource,
};
use crate::error::TransportError;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

/// One call the fake transport received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetProperty {
        path: String,
        key: String,
        value: PropValue,
    },
    Method {
        path: String,
        method: Method,
    },
    /// true when the radio was unblocked
    Radio(bool),
}

#[derive(Default)]
pub struct FakeTransport {
    pub objects: Mutex<ManagedObjects>,
    /// (path, key) -> value served by get_property
    pub properties: Mutex<HashMap<(String, String), PropValue>>,
    /// Method names that fail when called
    pub failing: Mutex<Vec<&'static str>>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub fn new() -> FakeTransport {
        FakeTransport::default()
    }

    pub fn fail(&self, method: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(method);
        }
    }

    pub fn serve_property(&self, path: &str, key: &str, value: PropValue) {
        if let Ok(mut props) = self.properties.lock() {
            props.insert((path.to_string(), key.to_string()), value);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check(&self, path: &str, method: &str) -> Result<(), TransportError> {
        let failing = self.failing.lock().map_or(false, |failing| {
            failing.iter().any(|name| *name == method)
        });
        if failing {
            Err(TransportError::call(path, method, "org.bluez.Error.Failed"))
        } else {
            Ok(())
        }
    }
}

impl BluetoothTransport for FakeTransport {
    fn managed_objects(&self) -> Result<ManagedObjects, TransportError> {
        self.check("/", "GetManagedObjects")?;
        Ok(self.objects.lock().map(|o| o.clone()).unwrap_or_default())
    }

    fn get_property(
        &self,
        path: &str,
        _interface: &str,
        key: &str,
    ) -> Result<PropValue, TransportError> {
        self.properties
            .lock()
            .ok()
            .and_then(|props| {
                props.get(&(path.to_string(), key.to_string())).cloned()
            })
            .ok_or_else(|| TransportError::call(path, "Get", "no such property"))
    }

    fn set_property(
        &self,
        path: &str,
        _interface: &str,
        key: &str,
        value: PropValue,
    ) -> Result<(), TransportError> {
        self.record(Call::SetProperty {
            path: path.to_string(),
            key: key.to_string(),
            value,
        });
        self.check(path, key)
    }

    fn call(&self, path: &str, method: Method) -> Result<(), TransportError> {
        let name = method.name();
        self.record(Call::Method {
            path: path.to_string(),
            method,
        });
        self.check(path, name)
    }
}

/// Radio switches land in the same call log as bus calls.
impl RadioSwitch for FakeTransport {
    fn set_blocked(&self, blocked: bool) -> Result<(), TransportError> {
        self.record(Call::Radio(!blocked));
        self.check("rfkill", "rfkill")
    }
}

/// Plays back a fixed list of results, then reports the bus as gone.
pub struct ScriptedSignals {
    script: VecDeque<Result<Option<RawSignal>, TransportError>>,
}

impl ScriptedSignals {
    pub fn new(
        script: Vec<Result<Option<RawSignal>, TransportError>>,
    ) -> ScriptedSignals {
        ScriptedSignals {
            script: script.into(),
        }
    }
}

impl SignalSource for ScriptedSignals {
    fn next_signal(&mut self) -> Result<Option<RawSignal>, TransportError> {
        self.script.pop_front().unwrap_or_else(|| {
            Err(TransportError::ConnectionLost("script exhausted".into()))
        })
    }
}

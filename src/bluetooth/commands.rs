// vim: cc=81
use super::radio::RadioSwitch;
use super::{
    AdapterId, BluetoothTransport, DeviceId, Method, PropValue,
    ADAPTER_INTERFACE, DEVICE_INTERFACE,
};
use crate::error::TransportError;
use crossbeam::channel::Sender;
use std::{fmt, sync::Arc, thread};
use tracing::{info, warn};

/// Imperative action against the Bluetooth service. Its effect is only
/// observed through the signal stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPower { adapter: AdapterId, powered: bool },
    Connect(DeviceId),
    Disconnect(DeviceId),
    Pair(DeviceId),
    Trust(DeviceId),
    Forget { adapter: AdapterId, device: DeviceId },
    StartScan(AdapterId),
    StopScan(AdapterId),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetPower { adapter, powered: true } => {
                write!(f, "power on {}", adapter.label())
            }
            Command::SetPower { adapter, powered: false } => {
                write!(f, "power off {}", adapter.label())
            }
            Command::Connect(device) => write!(f, "connect {device}"),
            Command::Disconnect(device) => write!(f, "disconnect {device}"),
            Command::Pair(device) => write!(f, "pair {device}"),
            Command::Trust(device) => write!(f, "trust {device}"),
            Command::Forget { device, .. } => write!(f, "forget {device}"),
            Command::StartScan(adapter) => {
                write!(f, "start scan on {}", adapter.label())
            }
            Command::StopScan(adapter) => {
                write!(f, "stop scan on {}", adapter.label())
            }
        }
    }
}

impl Command {
    /// Issues the transport call(s) for this command and waits for the
    /// reply, not for the state change.
    pub fn execute(
        &self,
        transport: &dyn BluetoothTransport,
        radio: &dyn RadioSwitch,
    ) -> Result<(), TransportError> {
        match self {
            Command::SetPower { adapter, powered } => {
                // A hard block keeps the adapter off whatever Powered says
                let radio_result = radio.set_blocked(!powered);
                if let Err(err) = &radio_result {
                    warn!("{err}");
                }
                transport
                    .set_property(
                        adapter.as_str(),
                        ADAPTER_INTERFACE,
                        "Powered",
                        PropValue::Bool(*powered),
                    )
                    .and(radio_result)
            }
            Command::Connect(device) => {
                transport.call(device.as_str(), Method::Connect)
            }
            Command::Disconnect(device) => {
                transport.call(device.as_str(), Method::Disconnect)
            }
            Command::Pair(device) => transport.call(device.as_str(), Method::Pair),
            Command::Trust(device) => transport.set_property(
                device.as_str(),
                DEVICE_INTERFACE,
                "Trusted",
                PropValue::Bool(true),
            ),
            Command::Forget { adapter, device } => transport.call(
                adapter.as_str(),
                Method::RemoveDevice(device.as_str().to_string()),
            ),
            Command::StartScan(adapter) => {
                transport.call(adapter.as_str(), Method::StartDiscovery)
            }
            Command::StopScan(adapter) => {
                transport.call(adapter.as_str(), Method::StopDiscovery)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: Command,
    pub error: TransportError,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not {}: {}", self.command, self.error)
    }
}

/// Runs every command on a thread of its own so a slow peer never holds up
/// the event loop. Failures are reported, never retried.
#[derive(Clone)]
pub struct CommandRunner {
    transport: Arc<dyn BluetoothTransport>,
    radio: Arc<dyn RadioSwitch>,
    failures: Sender<CommandFailure>,
}

impl CommandRunner {
    pub fn new(
        transport: Arc<dyn BluetoothTransport>,
        radio: Arc<dyn RadioSwitch>,
        failures: Sender<CommandFailure>,
    ) -> CommandRunner {
        CommandRunner {
            transport,
            radio,
            failures,
        }
    }

    pub fn dispatch(&self, command: Command) {
        info!("{command}");
        let transport = Arc::clone(&self.transport);
        let radio = Arc::clone(&self.radio);
        let failures = self.failures.clone();
        let task = command.clone();
        let spawned = thread::Builder::new()
            .name("command".into())
            .spawn(move || {
                if let Err(error) = task.execute(transport.as_ref(), radio.as_ref())
                {
                    warn!("{task} failed: {error}");
                    let _ = failures.send(CommandFailure {
                        command: task,
                        error,
                    });
                }
            });
        if let Err(err) = spawned {
            warn!("could not start {command}: {err}");
            let error = TransportError::call("", "spawn", err.to_string());
            let _ = self.failures.send(CommandFailure { command, error });
        }
    }

    pub fn dispatch_all(&self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.dispatch(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::testing::{Call, FakeTransport};
    use crossbeam::channel::unbounded;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const HCI0: &str = "/org/bluez/hci0";
    const DEV_A: &str = "/org/bluez/hci0/dev_A";

    #[test]
    fn power_unblocks_radio_before_setting_powered() {
        let fake = FakeTransport::new();
        let command = Command::SetPower {
            adapter: HCI0.into(),
            powered: true,
        };
        assert_eq!(command.execute(&fake, &fake), Ok(()));
        assert_eq!(
            fake.calls(),
            vec![
                Call::Radio(true),
                Call::SetProperty {
                    path: HCI0.into(),
                    key: "Powered".into(),
                    value: PropValue::Bool(true),
                },
            ]
        );
    }

    #[test]
    fn power_reports_radio_failure_after_trying_anyway() {
        let fake = FakeTransport::new();
        fake.fail("rfkill");
        let command = Command::SetPower {
            adapter: HCI0.into(),
            powered: false,
        };
        assert!(command.execute(&fake, &fake).is_err());
        assert_eq!(fake.calls().len(), 2);
        assert_eq!(fake.calls()[0], Call::Radio(false));
    }

    #[test]
    fn forget_calls_remove_device_on_adapter() {
        let fake = FakeTransport::new();
        let command = Command::Forget {
            adapter: HCI0.into(),
            device: DEV_A.into(),
        };
        assert_eq!(command.execute(&fake, &fake), Ok(()));
        assert_eq!(
            fake.calls(),
            vec![Call::Method {
                path: HCI0.into(),
                method: Method::RemoveDevice(DEV_A.into()),
            }]
        );
    }

    #[test]
    fn trust_sets_trusted_property() {
        let fake = FakeTransport::new();
        Command::Trust(DEV_A.into())
            .execute(&fake, &fake)
            .expect("trust succeeds");
        assert_eq!(
            fake.calls(),
            vec![Call::SetProperty {
                path: DEV_A.into(),
                key: "Trusted".into(),
                value: PropValue::Bool(true),
            }]
        );
    }

    #[test]
    fn runner_reports_failure_once_without_retry() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("Connect");
        let (tx, rx) = unbounded();
        let runner = CommandRunner::new(fake.clone(), fake.clone(), tx);
        runner.dispatch(Command::Connect(DEV_A.into()));

        let failure = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("failure is reported");
        assert_eq!(failure.command, Command::Connect(DEV_A.into()));
        assert!(failure.to_string().starts_with("could not connect"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn runner_is_silent_on_success() {
        let fake = Arc::new(FakeTransport::new());
        let (tx, rx) = unbounded();
        let runner = CommandRunner::new(fake.clone(), fake.clone(), tx);
        runner.dispatch(Command::StartScan(HCI0.into()));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}

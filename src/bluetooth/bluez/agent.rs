// vim: cc=81
//! org.bluez.Agent1 served with dbus-crossroads on a connection of its own,
//! so a request waiting for the user never holds up the signal stream.

use super::{call_error, BLUEZ_DBUS, BLUEZ_ROOT};
use crate::bluetooth::agent::PairingAgent;
use crate::bluetooth::{DeviceId, AGENT_INTERFACE, AGENT_MANAGER_INTERFACE};
use crate::error::{AgentError, TransportError};
use crossbeam::channel;
use dbus::{
    blocking::Connection, channel::MatchingReceiver, message::MatchRule,
    MethodErr, Path,
};
use dbus_crossroads::{Context, Crossroads, IfaceToken};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};

fn method_err(err: AgentError) -> MethodErr {
    dbus::Error::new_custom(err.dbus_name(), &err.to_string()).into()
}

fn device_id(path: &Path<'static>) -> DeviceId {
    DeviceId(path.to_string())
}

fn register_agent1(cr: &mut Crossroads) -> IfaceToken<PairingAgent> {
    cr.register(AGENT_INTERFACE, |b| {
        b.method(
            "Release",
            (),
            (),
            |_: &mut Context, agent: &mut PairingAgent, (): ()| {
                agent.release();
                Ok(())
            },
        );
        b.method(
            "RequestPinCode",
            ("device",),
            ("pincode",),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device,): (Path<'static>,)| {
                agent
                    .request_pin_code(&device_id(&device))
                    .map(|pin| (pin,))
                    .map_err(method_err)
            },
        );
        b.method(
            "DisplayPinCode",
            ("device", "pincode"),
            (),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device, pin): (Path<'static>, String)| {
                agent.display_pin_code(&device_id(&device), &pin);
                Ok(())
            },
        );
        b.method(
            "RequestPasskey",
            ("device",),
            ("passkey",),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device,): (Path<'static>,)| {
                agent
                    .request_passkey(&device_id(&device))
                    .map(|passkey| (passkey,))
                    .map_err(method_err)
            },
        );
        b.method(
            "DisplayPasskey",
            ("device", "passkey", "entered"),
            (),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device, passkey, entered): (Path<'static>, u32, u16)| {
                agent.display_passkey(&device_id(&device), passkey, entered);
                Ok(())
            },
        );
        b.method(
            "RequestConfirmation",
            ("device", "passkey"),
            (),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device, passkey): (Path<'static>, u32)| {
                agent
                    .request_confirmation(&device_id(&device), passkey)
                    .map_err(method_err)
            },
        );
        b.method(
            "RequestAuthorization",
            ("device",),
            (),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device,): (Path<'static>,)| {
                agent
                    .request_authorization(&device_id(&device))
                    .map_err(method_err)
            },
        );
        b.method(
            "AuthorizeService",
            ("device", "uuid"),
            (),
            |_: &mut Context,
             agent: &mut PairingAgent,
             (device, uuid): (Path<'static>, String)| {
                agent
                    .authorize_service(&device_id(&device), &uuid)
                    .map_err(method_err)
            },
        );
        b.method(
            "Cancel",
            (),
            (),
            |_: &mut Context, agent: &mut PairingAgent, (): ()| {
                agent.cancel();
                Ok(())
            },
        );
    })
}

/// Exports the agent at path and makes it the default agent.
fn register(
    agent: PairingAgent,
    path: &str,
    capability: &str,
    timeout: Duration,
) -> Result<Connection, TransportError> {
    let object = Path::new(path.to_string())
        .map_err(|err| TransportError::call(path, "RegisterAgent", err))?;
    let connection = Connection::new_system()
        .map_err(|err| TransportError::ConnectionLost(err.to_string()))?;

    let mut cr = Crossroads::new();
    let token = register_agent1(&mut cr);
    cr.insert(object.clone(), &[token], agent);
    connection.start_receive(
        MatchRule::new_method_call().with_path(object.clone()),
        Box::new(move |msg, conn| {
            if cr.handle_message(msg, conn).is_err() {
                debug!("agent could not handle a method call");
            }
            true
        }),
    );

    let manager = connection.with_proxy(BLUEZ_DBUS, BLUEZ_ROOT, timeout);
    manager
        .method_call::<(), _, _, _>(
            AGENT_MANAGER_INTERFACE,
            "RegisterAgent",
            (object.clone(), capability),
        )
        .map_err(|err| call_error(BLUEZ_ROOT, "RegisterAgent", err))?;
    manager
        .method_call::<(), _, _, _>(
            AGENT_MANAGER_INTERFACE,
            "RequestDefaultAgent",
            (object,),
        )
        .map_err(|err| call_error(BLUEZ_ROOT, "RequestDefaultAgent", err))?;
    info!("agent registered at {path} as {capability}");
    Ok(connection)
}

fn unregister(connection: &Connection, path: &str, timeout: Duration) {
    let Ok(object) = Path::new(path.to_string()) else {
        return;
    };
    let result = connection
        .with_proxy(BLUEZ_DBUS, BLUEZ_ROOT, timeout)
        .method_call::<(), _, _, _>(
            AGENT_MANAGER_INTERFACE,
            "UnregisterAgent",
            (object,),
        );
    if let Err(err) = result {
        debug!("could not unregister agent: {err}");
    }
}

/// Registers the agent and serves it on a thread of its own until shutdown
/// is set. Returns once registration succeeded or failed.
pub fn spawn(
    agent: PairingAgent,
    path: &str,
    capability: &str,
    timeout: Duration,
    poll: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, TransportError> {
    let (ready_tx, ready_rx) = channel::bounded(1);
    let object_path = path.to_string();
    let capability = capability.to_string();
    let handle = thread::Builder::new()
        .name("pairing-agent".into())
        .spawn(move || {
            let connection =
                match register(agent, &object_path, &capability, timeout) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
            let _ = ready_tx.send(Ok(()));
            while !shutdown.load(Ordering::Relaxed) {
                if let Err(err) = connection.process(poll) {
                    warn!("agent connection failed: {err}");
                    break;
                }
            }
            unregister(&connection, &object_path, timeout);
        })
        .map_err(|err| TransportError::call(path, "spawn", err.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(TransportError::ConnectionLost(
            "agent thread ended before registering".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BLUEZ_CANCELED_ERROR, BLUEZ_REJECTED_ERROR};

    #[test]
    fn agent_errors_become_bluez_errors() {
        let err = method_err(AgentError::Rejected);
        assert_eq!(&**err.errorname(), BLUEZ_REJECTED_ERROR);
        let err = method_err(AgentError::Canceled);
        assert_eq!(&**err.errorname(), BLUEZ_CANCELED_ERROR);
        assert_eq!(err.description(), "pairing canceled");
    }

    #[test]
    fn device_ids_keep_the_object_path() {
        let path = Path::from("/org/bluez/hci0/dev_00_11_22_33_44_55");
        assert_eq!(
            device_id(&path).adapter().map(|a| a.0),
            Some("/org/bluez/hci0".to_string())
        );
    }
}

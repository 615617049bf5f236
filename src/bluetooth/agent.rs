// vim: cc=81
//! Pairing agent.
//!
//! BlueZ calls the agent synchronously and waits for the credential. The
//! agent runs on its own thread and hands each request to the event loop as
//! a [`PendingCredentialRequest`], then blocks until the answer comes back.
//! Both directions are rendezvous channels, so at most one request is ever
//! in flight.

use super::{BluetoothTransport, DeviceId, DEVICE_INTERFACE};
use crate::error::AgentError;
use crossbeam::channel::{self, Receiver, Sender};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{info, warn};

pub const UNKNOWN_DEVICE: &str = "Unknown Device";
const ANSWER_YES: &str = "yes";
const ANSWER_NO: &str = "no";
const MAX_PASSKEY: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    Pin,
    Passkey,
    /// Asks whether passkey matches the one shown on the device
    Confirm { passkey: u32 },
}

/// A credential request waiting for the user. It can only be answered by
/// handing it back to [`AgentResponder`], which consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingCredentialRequest {
    pub device: DeviceId,
    pub device_name: String,
    pub kind: CredentialKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AgentState {
    Idle,
    AwaitingAnswer(DeviceId),
}

/// Puts the agent back to Idle however the exchange ends.
struct Exchange<'a>(&'a Mutex<AgentState>);

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = AgentState::Idle;
    }
}

pub struct PairingAgent {
    state: Mutex<AgentState>,
    requests: Option<Sender<PendingCredentialRequest>>,
    answers: Option<Receiver<String>>,
    transport: Arc<dyn BluetoothTransport>,
}

impl PairingAgent {
    /// An agent with no user interface attached answers every credential
    /// request with [`AgentError::NotReady`].
    pub fn new(transport: Arc<dyn BluetoothTransport>) -> PairingAgent {
        PairingAgent {
            state: Mutex::new(AgentState::Idle),
            requests: None,
            answers: None,
            transport,
        }
    }

    /// Connects the user interface. answer_timeout bounds how long the
    /// responder waits for the agent to take an answer.
    pub fn attach(
        &mut self,
        answer_timeout: Duration,
    ) -> (AgentResponder, Receiver<PendingCredentialRequest>) {
        let (request_tx, request_rx) = channel::bounded(0);
        let (answer_tx, answer_rx) = channel::bounded(0);
        self.requests = Some(request_tx);
        self.answers = Some(answer_rx);
        let responder = AgentResponder {
            answers: answer_tx,
            timeout: answer_timeout,
        };
        (responder, request_rx)
    }

    pub fn request_pin_code(&self, device: &DeviceId) -> Result<String, AgentError> {
        info!("PIN code requested by {device}");
        self.exchange(device, CredentialKind::Pin)
    }

    pub fn request_passkey(&self, device: &DeviceId) -> Result<u32, AgentError> {
        info!("passkey requested by {device}");
        let answer = self.exchange(device, CredentialKind::Passkey)?;
        match answer.trim().parse::<u32>() {
            Ok(passkey) if passkey <= MAX_PASSKEY => Ok(passkey),
            _ => {
                warn!("rejecting passkey {answer:?} for {device}");
                Err(AgentError::Rejected)
            }
        }
    }

    pub fn request_confirmation(
        &self,
        device: &DeviceId,
        passkey: u32,
    ) -> Result<(), AgentError> {
        info!("confirmation of {passkey:06} requested by {device}");
        let answer =
            self.exchange(device, CredentialKind::Confirm { passkey })?;
        if answer == ANSWER_YES {
            Ok(())
        } else {
            Err(AgentError::Rejected)
        }
    }

    pub fn request_authorization(&self, device: &DeviceId) -> Result<(), AgentError> {
        info!("authorizing {device}");
        Ok(())
    }

    pub fn authorize_service(
        &self,
        device: &DeviceId,
        uuid: &str,
    ) -> Result<(), AgentError> {
        info!("authorizing service {uuid} for {device}");
        Ok(())
    }

    pub fn display_pin_code(&self, device: &DeviceId, pin: &str) {
        info!("PIN code for {device} is {pin}");
    }

    pub fn display_passkey(&self, device: &DeviceId, passkey: u32, entered: u16) {
        info!("passkey for {device} is {passkey:06} ({entered} typed)");
    }

    pub fn release(&self) {
        info!("agent released");
    }

    pub fn cancel(&self) {
        info!("pairing request canceled by the service");
    }

    /// Hands one request to the user and waits for the answer.
    fn exchange(
        &self,
        device: &DeviceId,
        kind: CredentialKind,
    ) -> Result<String, AgentError> {
        let (Some(requests), Some(answers)) = (&self.requests, &self.answers)
        else {
            warn!("credential request from {device} with no user interface");
            return Err(AgentError::NotReady);
        };
        let _exchange = self.begin(device)?;

        let request = PendingCredentialRequest {
            device: device.clone(),
            device_name: self.device_name(device),
            kind,
        };
        requests.send(request).map_err(|_| AgentError::Canceled)?;
        answers.recv().map_err(|_| AgentError::Canceled)
    }

    fn begin(&self, device: &DeviceId) -> Result<Exchange<'_>, AgentError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let AgentState::AwaitingAnswer(waiting) = &*state {
            warn!("rejecting {device}, still waiting on {waiting}");
            return Err(AgentError::Busy);
        }
        *state = AgentState::AwaitingAnswer(device.clone());
        Ok(Exchange(&self.state))
    }

    /// Best effort, a failed lookup only degrades the prompt.
    fn device_name(&self, device: &DeviceId) -> String {
        ["Alias", "Name"]
            .iter()
            .find_map(|key| {
                self.transport
                    .get_property(device.as_str(), DEVICE_INTERFACE, key)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_string))
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
    }
}

/// The user interface's half of the agent.
#[derive(Debug, Clone)]
pub struct AgentResponder {
    answers: Sender<String>,
    timeout: Duration,
}

impl AgentResponder {
    /// Answers a PIN code or passkey request.
    pub fn submit_pin(
        &self,
        request: PendingCredentialRequest,
        pin: &str,
    ) -> Result<(), AgentError> {
        info!("answering {:?} from {}", request.kind, request.device);
        self.send(pin.trim().to_string())
    }

    pub fn submit_confirmation(
        &self,
        request: PendingCredentialRequest,
        accepted: bool,
    ) -> Result<(), AgentError> {
        info!("answering {:?} from {}", request.kind, request.device);
        let answer = if accepted { ANSWER_YES } else { ANSWER_NO };
        self.send(answer.to_string())
    }

    /// The agent may have given up already, so this never blocks for long.
    fn send(&self, answer: String) -> Result<(), AgentError> {
        self.answers
            .send_timeout(answer, self.timeout)
            .map_err(|_| AgentError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::testing::FakeTransport;
    use crate::bluetooth::PropValue;
    use std::thread;

    const DEV_X: &str = "/org/bluez/hci0/dev_X";
    const WAIT: Duration = Duration::from_secs(5);

    fn attached() -> (Arc<PairingAgent>, AgentResponder, Receiver<PendingCredentialRequest>) {
        let fake = Arc::new(FakeTransport::new());
        fake.serve_property(DEV_X, "Name", PropValue::Str("Speaker".into()));
        let mut agent = PairingAgent::new(fake);
        let (responder, requests) = agent.attach(Duration::from_millis(200));
        (Arc::new(agent), responder, requests)
    }

    #[test]
    fn pin_request_blocks_until_answered() {
        let (agent, responder, requests) = attached();
        let waiting = Arc::clone(&agent);
        let handle =
            thread::spawn(move || waiting.request_pin_code(&DEV_X.into()));

        let request = requests.recv_timeout(WAIT).expect("request delivered");
        assert_eq!(request.kind, CredentialKind::Pin);
        assert_eq!(request.device_name, "Speaker");
        thread::sleep(Duration::from_millis(300));
        assert!(!handle.is_finished());

        responder.submit_pin(request, "1234").expect("agent is waiting");
        let pin = handle.join().expect("agent thread");
        assert_eq!(pin, Ok("1234".to_string()));
    }

    #[test]
    fn confirmation_yes_and_no() {
        let (agent, responder, requests) = attached();
        for (accepted, expected) in [(true, Ok(())), (false, Err(AgentError::Rejected))]
        {
            let waiting = Arc::clone(&agent);
            let handle = thread::spawn(move || {
                waiting.request_confirmation(&DEV_X.into(), 4321)
            });
            let request = requests.recv_timeout(WAIT).expect("request delivered");
            assert_eq!(request.kind, CredentialKind::Confirm { passkey: 4321 });
            responder
                .submit_confirmation(request, accepted)
                .expect("agent is waiting");
            assert_eq!(handle.join().expect("agent thread"), expected);
        }
    }

    #[test]
    fn passkey_must_be_six_digits() {
        let (agent, responder, requests) = attached();
        for (answer, expected) in [
            ("123456", Ok(123456)),
            ("000042", Ok(42)),
            ("1000000", Err(AgentError::Rejected)),
            ("abc", Err(AgentError::Rejected)),
        ] {
            let waiting = Arc::clone(&agent);
            let handle =
                thread::spawn(move || waiting.request_passkey(&DEV_X.into()));
            let request = requests.recv_timeout(WAIT).expect("request delivered");
            responder.submit_pin(request, answer).expect("agent is waiting");
            assert_eq!(handle.join().expect("agent thread"), expected);
        }
    }

    #[test]
    fn second_request_is_rejected_while_busy() {
        let (agent, responder, requests) = attached();
        let waiting = Arc::clone(&agent);
        let handle =
            thread::spawn(move || waiting.request_pin_code(&DEV_X.into()));
        let request = requests.recv_timeout(WAIT).expect("request delivered");

        assert_eq!(
            agent.request_pin_code(&"/org/bluez/hci0/dev_Y".into()),
            Err(AgentError::Busy)
        );

        responder.submit_pin(request, "0000").expect("agent is waiting");
        assert_eq!(handle.join().expect("agent thread"), Ok("0000".into()));
        // Back to Idle
        let waiting = Arc::clone(&agent);
        let handle =
            thread::spawn(move || waiting.request_pin_code(&DEV_X.into()));
        let request = requests.recv_timeout(WAIT).expect("request delivered");
        responder.submit_pin(request, "1111").expect("agent is waiting");
        assert_eq!(handle.join().expect("agent thread"), Ok("1111".into()));
    }

    #[test]
    fn unattached_agent_is_not_ready() {
        let agent = PairingAgent::new(Arc::new(FakeTransport::new()));
        assert_eq!(
            agent.request_pin_code(&DEV_X.into()),
            Err(AgentError::NotReady)
        );
    }

    #[test]
    fn closed_event_loop_cancels() {
        let (agent, responder, requests) = attached();
        drop(requests);
        assert_eq!(
            agent.request_pin_code(&DEV_X.into()),
            Err(AgentError::Canceled)
        );
        drop(responder);
    }

    #[test]
    fn dropped_responder_releases_waiting_agent() {
        let (agent, responder, requests) = attached();
        let waiting = Arc::clone(&agent);
        let handle = thread::spawn(move || {
            waiting.request_confirmation(&DEV_X.into(), 1)
        });
        let _request = requests.recv_timeout(WAIT).expect("request delivered");
        drop(responder);
        assert_eq!(handle.join().expect("agent thread"), Err(AgentError::Canceled));
    }

    #[test]
    fn stale_answer_times_out() {
        let (_agent, responder, _requests) = attached();
        let stale = PendingCredentialRequest {
            device: DEV_X.into(),
            device_name: UNKNOWN_DEVICE.into(),
            kind: CredentialKind::Pin,
        };
        assert_eq!(responder.submit_pin(stale, "1234"), Err(AgentError::Canceled));
    }

    #[test]
    fn name_lookup_falls_back() {
        let fake = Arc::new(FakeTransport::new());
        fake.serve_property(DEV_X, "Alias", PropValue::Str("Living room".into()));
        fake.serve_property(DEV_X, "Name", PropValue::Str("SRS-XB13".into()));
        let agent = PairingAgent::new(fake);
        assert_eq!(agent.device_name(&DEV_X.into()), "Living room");
        assert_eq!(
            agent.device_name(&"/org/bluez/hci0/dev_Q".into()),
            UNKNOWN_DEVICE
        );
    }

    #[test]
    fn auxiliary_callbacks_accept() {
        let (agent, _responder, _requests) = attached();
        let device = DeviceId::from(DEV_X);
        assert_eq!(agent.request_authorization(&device), Ok(()));
        assert_eq!(
            agent.authorize_service(&device, "0000110b-0000-1000-8000-00805f9b34fb"),
            Ok(())
        );
        agent.display_passkey(&device, 123, 2);
        agent.display_pin_code(&device, "0000");
        agent.cancel();
        agent.release();
    }
}

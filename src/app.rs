// vim: cc=81
//! The session's single event-processing stream.
//!
//! Every message that can change state goes through [`Session::run`] one at
//! a time: decoded signals, refresh results, command failures, credential
//! requests from the agent and lines typed by the user. This is the only
//! place the store is written.

use crate::bluetooth::agent::{
    AgentResponder, CredentialKind, PendingCredentialRequest,
};
use crate::bluetooth::commands::{Command, CommandFailure, CommandRunner};
use crate::bluetooth::dispatcher::SignalEvent;
use crate::bluetooth::props::Inventory;
use crate::bluetooth::refresh::RefreshScheduler;
use crate::bluetooth::store::{Event, Store};
use crate::bluetooth::{Device, DeviceId};
use crate::console::{self, Input, HELP};
use crate::error::TransportError;
use crate::utils;
use anyhow::{anyhow, Context, Result};
use crossbeam::{
    channel::{self, Receiver},
    select,
};
use std::io::Write;
use tracing::{info, warn};

/// What the loop does after handling one message.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Redraw,
    /// Print this instead of the state
    Print(String),
    Quiet,
    Quit,
}

/// Receiving ends of everything the loop listens to.
pub struct Inbox {
    pub signals: Receiver<Result<SignalEvent, TransportError>>,
    pub resyncs: Receiver<Result<Inventory, TransportError>>,
    pub requests: Receiver<PendingCredentialRequest>,
    pub failures: Receiver<CommandFailure>,
    pub input: Receiver<String>,
}

pub struct Session {
    store: Store,
    runner: CommandRunner,
    refresh: RefreshScheduler,
    responder: AgentResponder,
    pending: Option<PendingCredentialRequest>,
    color: bool,
    /// Terminal columns, read at start and on refresh
    width: usize,
}

impl Session {
    pub fn new(
        runner: CommandRunner,
        refresh: RefreshScheduler,
        responder: AgentResponder,
        color: bool,
    ) -> Session {
        Session {
            store: Store::new(),
            runner,
            refresh,
            responder,
            pending: None,
            color,
            width: utils::term_cols(),
        }
    }

    /// Processes messages until the user quits or the bus goes away.
    pub fn run(mut self, mut inbox: Inbox, out: &mut impl Write) -> Result<()> {
        let ticks = self.refresh.ticks();
        self.refresh.request();
        self.draw(out)?;
        loop {
            let mut agent_gone = false;
            let step = select! {
                recv(inbox.signals) -> msg => match msg {
                    Ok(Ok(event)) => self.apply(Event::Signal(event)),
                    Ok(Err(err)) if err.is_fatal() => {
                        return Err(err).context("lost the Bluetooth service");
                    }
                    Ok(Err(err)) => {
                        warn!("signal stream: {err}");
                        self.store.set_error(err.to_string());
                        Step::Redraw
                    }
                    Err(_) => return Err(anyhow!("signal dispatcher stopped")),
                },
                recv(ticks) -> _ => {
                    self.refresh.request();
                    Step::Quiet
                }
                recv(inbox.resyncs) -> msg => match msg {
                    Ok(Ok(inventory)) => self.apply(Event::Resync(inventory)),
                    Ok(Err(err)) => {
                        warn!("resync failed: {err}");
                        self.store.set_error(format!("reload failed: {err}"));
                        Step::Redraw
                    }
                    Err(_) => Step::Quiet,
                },
                recv(inbox.requests) -> msg => match msg {
                    Ok(request) => self.ask(request),
                    Err(_) => {
                        agent_gone = true;
                        Step::Quiet
                    }
                },
                recv(inbox.failures) -> msg => match msg {
                    Ok(failure) => self.apply(Event::CommandFailed(failure)),
                    Err(_) => Step::Quiet,
                },
                recv(inbox.input) -> msg => match msg {
                    Ok(line) => self.handle_line(&line),
                    // End of input
                    Err(_) => Step::Quit,
                },
            };
            if agent_gone {
                warn!("pairing agent stopped");
                inbox.requests = channel::never();
            }
            match step {
                Step::Redraw => self.draw(out)?,
                Step::Print(text) => {
                    writeln!(out, "{text}").context("writing to the terminal")?
                }
                Step::Quiet => (),
                Step::Quit => {
                    info!("session ended");
                    return Ok(());
                }
            }
        }
    }

    fn draw(&self, out: &mut impl Write) -> Result<()> {
        let screen = console::render(
            &self.store.snapshot(),
            self.pending.as_ref(),
            self.color,
            self.width,
        );
        if self.color {
            // Clear and home
            write!(out, "\x1b[2J\x1b[H")?;
        }
        write!(out, "{screen}\n> ")?;
        out.flush().context("writing to the terminal")
    }

    fn apply(&mut self, event: Event) -> Step {
        let commands = self.store.apply(event);
        self.runner.dispatch_all(commands);
        Step::Redraw
    }

    fn ask(&mut self, request: PendingCredentialRequest) -> Step {
        if let Some(stale) = self.pending.replace(request) {
            // The agent only hands out one request at a time
            warn!("dropping unanswered request from {}", stale.device);
        }
        Step::Redraw
    }

    fn dispatch(&mut self, command: Option<Command>, missing: &str) -> Step {
        match command {
            Some(command) => self.runner.dispatch(command),
            None => self.store.set_error(missing.to_string()),
        }
        Step::Redraw
    }

    /// Paired device n, 1-based, or the selected one.
    fn paired_target(&self, n: Option<usize>) -> Option<DeviceId> {
        let snapshot = self.store.snapshot();
        match n {
            Some(n) => snapshot.paired.get(n - 1).map(|d| d.id.clone()),
            None => self.store.selected_device().map(|d| d.id.clone()),
        }
    }

    fn nearby(&self, n: usize) -> Option<&Device> {
        self.store.snapshot().unpaired.get(n - 1)
    }

    fn handle_line(&mut self, line: &str) -> Step {
        let input = match console::parse_input(line) {
            Ok(input) => input,
            Err(err) => {
                self.store.set_error(err.to_string());
                return Step::Redraw;
            }
        };
        if self.pending.is_some()
            && !matches!(
                input,
                Input::Pin(_) | Input::Yes | Input::No | Input::Quit | Input::Empty
            )
        {
            self.store
                .set_error("answer the pairing request first: pin, yes or no");
            return Step::Redraw;
        }
        self.store.clear_error();

        match input {
            Input::Empty => Step::Redraw,
            Input::Help => Step::Print(HELP.to_string()),
            Input::Quit => Step::Quit,
            Input::Refresh => {
                self.width = utils::term_cols();
                self.refresh.request();
                Step::Redraw
            }
            Input::Power => {
                let command = self.store.toggle_power();
                self.dispatch(command, "no adapter found")
            }
            Input::Scan => {
                let command = self.store.toggle_scan();
                self.dispatch(command, "no adapter found")
            }
            Input::Select(n) => {
                let selected = self
                    .paired_target(Some(n))
                    .is_some_and(|id| self.store.select(&id));
                if !selected {
                    self.store.set_error(format!("no paired device {n}"));
                }
                Step::Redraw
            }
            Input::Toggle(n) => {
                let command = self
                    .paired_target(n)
                    .and_then(|id| self.store.toggle_connection(&id));
                self.dispatch(command, "no such paired device")
            }
            Input::Forget(n) => {
                let command = self
                    .paired_target(n)
                    .and_then(|id| self.store.forget(&id));
                self.dispatch(command, "no such paired device")
            }
            Input::Pair(n) => {
                let command = self
                    .nearby(n)
                    .map(|d| d.id.clone())
                    .and_then(|id| self.store.pair(&id));
                self.dispatch(command, &format!("no nearby device {n}"))
            }
            Input::Pin(code) => self.answer(|kind| {
                matches!(kind, CredentialKind::Pin | CredentialKind::Passkey)
                    .then_some(Answer::Pin(code))
            }),
            Input::Yes => self.answer(|kind| {
                matches!(kind, CredentialKind::Confirm { .. })
                    .then_some(Answer::Confirm(true))
            }),
            Input::No => self.answer(|kind| {
                matches!(kind, CredentialKind::Confirm { .. })
                    .then_some(Answer::Confirm(false))
            }),
        }
    }

    /// Hands the pending request back to the agent if answer fits its kind.
    fn answer(
        &mut self,
        answer: impl FnOnce(&CredentialKind) -> Option<Answer>,
    ) -> Step {
        let Some(request) = self.pending.take() else {
            self.store.set_error("no pairing request is waiting");
            return Step::Redraw;
        };
        let Some(answer) = answer(&request.kind) else {
            self.store.set_error(console::prompt(&request));
            self.pending = Some(request);
            return Step::Redraw;
        };
        let result = match answer {
            Answer::Pin(code) => self.responder.submit_pin(request, &code),
            Answer::Confirm(accepted) => {
                self.responder.submit_confirmation(request, accepted)
            }
        };
        if let Err(err) = result {
            warn!("could not answer the agent: {err}");
            self.store.set_error(format!("could not answer: {err}"));
        }
        Step::Redraw
    }
}

enum Answer {
    Pin(String),
    Confirm(bool),
}

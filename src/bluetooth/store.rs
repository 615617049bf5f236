// vim: cc=81
//! In-memory mirror of the Bluetooth stack.
//!
//! The store has exactly one writer, the event loop, which feeds it decoded
//! signals, resync results and command failures one at a time through
//! [`Store::apply`]. Everything else reads a [`Snapshot`].

use super::commands::{Command, CommandFailure};
use super::dispatcher::SignalEvent;
use super::props::{AdapterProp, DeviceProp, DeviceRecord, Inventory};
use super::{Adapter, AdapterId, Device, DeviceId};
use std::cmp::Ordering;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Signal(SignalEvent),
    Resync(Inventory),
    CommandFailed(CommandFailure),
}

/// Read-only view handed to the renderer.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub adapters: &'a [Adapter],
    pub paired: &'a [Device],
    /// Strongest signal first
    pub unpaired: &'a [Device],
    pub selected: Option<&'a DeviceId>,
    pub last_error: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct Store {
    adapters: Vec<Adapter>,
    paired: Vec<Device>,
    unpaired: Vec<Device>,
    selected: Option<DeviceId>,
    last_error: Option<String>,
}

/// Strongest signal first, then by name ignoring case.
fn by_signal(a: &Device, b: &Device) -> Ordering {
    b.rssi
        .cmp(&a.rssi)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            adapters: &self.adapters,
            paired: &self.paired,
            unpaired: &self.unpaired,
            selected: self.selected.as_ref(),
            last_error: self.last_error.as_deref(),
        }
    }

    /// Applies one event and returns the commands its transitions call for.
    pub fn apply(&mut self, event: Event) -> Vec<Command> {
        let commands = match event {
            Event::Signal(signal) => self.apply_signal(signal),
            Event::Resync(inventory) => {
                self.resync(inventory);
                Vec::new()
            }
            Event::CommandFailed(failure) => {
                self.last_error = Some(failure.to_string());
                Vec::new()
            }
        };
        self.unpaired.sort_by(by_signal);
        commands
    }

    fn apply_signal(&mut self, signal: SignalEvent) -> Vec<Command> {
        match signal {
            SignalEvent::AdapterChanged { id, changes } => {
                self.update_adapter(id, &changes);
                Vec::new()
            }
            SignalEvent::DeviceChanged { id, changes } => {
                self.update_device(&id, &changes)
            }
            SignalEvent::DeviceAdded(record) => {
                self.add_device(record);
                Vec::new()
            }
            SignalEvent::DeviceRemoved(id) => {
                self.remove_device(&id);
                Vec::new()
            }
            SignalEvent::Unrecognized => Vec::new(),
        }
    }

    fn update_adapter(&mut self, id: AdapterId, changes: &[AdapterProp]) {
        let index = match self.adapters.iter().position(|a| a.id == id) {
            Some(index) => index,
            None => {
                info!("new adapter {id}");
                self.adapters.push(Adapter::new(id));
                self.adapters.len() - 1
            }
        };
        for change in changes {
            change.apply(&mut self.adapters[index]);
        }
    }

    fn update_device(
        &mut self,
        id: &DeviceId,
        changes: &[DeviceProp],
    ) -> Vec<Command> {
        let (was_paired, index) = match self.locate(id) {
            Some(found) => found,
            None => {
                debug!("change for untracked device {id} dropped");
                return Vec::new();
            }
        };
        let set = if was_paired { &mut self.paired } else { &mut self.unpaired };
        // All keys land together, transitions are judged on the result
        let before = set[index].clone();
        for change in changes {
            change.apply(&mut set[index]);
        }
        let after = &set[index];

        let mut commands = Vec::new();
        if !before.paired && after.paired {
            info!("{id} paired");
            commands.push(Command::Trust(id.clone()));
        }
        if !before.trusted && after.trusted && after.paired && !after.connected
        {
            commands.push(Command::Connect(id.clone()));
        }

        if after.paired != was_paired {
            let device = set.remove(index);
            if device.paired {
                self.paired.push(device);
            } else {
                if self.selected.as_ref() == Some(id) {
                    self.selected = None;
                }
                self.unpaired.push(device);
            }
        }
        commands
    }

    /// Which set holds the device, true for paired, and where.
    fn locate(&self, id: &DeviceId) -> Option<(bool, usize)> {
        if let Some(index) = self.paired.iter().position(|d| &d.id == id) {
            return Some((true, index));
        }
        let index = self.unpaired.iter().position(|d| &d.id == id)?;
        Some((false, index))
    }

    fn add_device(&mut self, record: DeviceRecord) {
        let id = record.device.id.clone();
        if !record.is_usable() {
            debug!("ignoring unusable device {id}");
            return;
        }
        if self.take_device(&id).is_some() {
            debug!("{id} added again, replacing it");
        }
        let device = record.device;
        if device.paired {
            self.paired.push(device);
        } else {
            self.unpaired.push(device);
        }
    }

    fn remove_device(&mut self, id: &DeviceId) {
        if self.take_device(id).is_none() {
            debug!("removal of untracked device {id} dropped");
            return;
        }
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
    }

    /// Removes a device from whichever set holds it.
    fn take_device(&mut self, id: &DeviceId) -> Option<Device> {
        match self.locate(id)? {
            (true, index) => Some(self.paired.remove(index)),
            (false, index) => Some(self.unpaired.remove(index)),
        }
    }

    fn resync(&mut self, inventory: Inventory) {
        self.adapters = inventory.adapters;
        let (paired, unpaired): (Vec<Device>, Vec<Device>) = inventory
            .devices
            .into_iter()
            .filter(|record| {
                let usable = record.is_usable();
                if !usable {
                    debug!("ignoring unusable device {}", record.device.id);
                }
                usable
            })
            .map(|record| record.device)
            .partition(|device| device.paired);
        self.paired = paired;
        self.unpaired = unpaired;

        let still_paired = self
            .selected
            .as_ref()
            .is_some_and(|id| self.paired.iter().any(|d| &d.id == id));
        if !still_paired {
            self.selected = self.paired.first().map(|d| d.id.clone());
        }
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.paired
            .iter()
            .chain(self.unpaired.iter())
            .find(|d| &d.id == id)
    }

    pub fn selected_device(&self) -> Option<&Device> {
        self.selected.as_ref().and_then(|id| self.device(id))
    }

    /// Only paired devices can be selected.
    pub fn select(&mut self, id: &DeviceId) -> bool {
        if self.paired.iter().any(|d| &d.id == id) {
            self.selected = Some(id.clone());
            true
        } else {
            false
        }
    }

    /// The adapter user commands act on.
    pub fn current_adapter(&self) -> Option<&Adapter> {
        self.adapters.first()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Power is never flipped locally, the Powered signal confirms it.
    pub fn toggle_power(&self) -> Option<Command> {
        let adapter = self.current_adapter()?;
        Some(Command::SetPower {
            adapter: adapter.id.clone(),
            powered: !adapter.powered,
        })
    }

    pub fn toggle_scan(&self) -> Option<Command> {
        let adapter = self.current_adapter()?;
        let id = adapter.id.clone();
        Some(if adapter.scanning {
            Command::StopScan(id)
        } else {
            Command::StartScan(id)
        })
    }

    pub fn toggle_connection(&self, id: &DeviceId) -> Option<Command> {
        let device = self.paired.iter().find(|d| &d.id == id)?;
        Some(if device.connected {
            Command::Disconnect(id.clone())
        } else {
            Command::Connect(id.clone())
        })
    }

    pub fn pair(&self, id: &DeviceId) -> Option<Command> {
        self.unpaired
            .iter()
            .any(|d| &d.id == id)
            .then(|| Command::Pair(id.clone()))
    }

    /// Removal goes to the adapter owning the device.
    pub fn forget(&self, id: &DeviceId) -> Option<Command> {
        self.device(id)?;
        let adapter = id
            .adapter()
            .or_else(|| self.current_adapter().map(|a| a.id.clone()))?;
        Some(Command::Forget {
            adapter,
            device: id.clone(),
        })
    }
}

// vim: cc=81
use super::props::Inventory;
use super::BluetoothTransport;
use crate::error::TransportError;
use crossbeam::channel::{self, Receiver, Sender};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Periodic full reload that corrects whatever the signal stream missed.
pub struct RefreshScheduler {
    transport: Arc<dyn BluetoothTransport>,
    results: Sender<Result<Inventory, TransportError>>,
    ticks: Receiver<Instant>,
}

impl RefreshScheduler {
    /// Returns the scheduler and the receiver resync results arrive on.
    pub fn new(
        transport: Arc<dyn BluetoothTransport>,
        interval: Duration,
    ) -> (RefreshScheduler, Receiver<Result<Inventory, TransportError>>) {
        let (results, received) = channel::unbounded();
        let scheduler = RefreshScheduler {
            transport,
            results,
            ticks: channel::tick(interval),
        };
        (scheduler, received)
    }

    /// Fires every interval. Select on it and call request.
    pub fn ticks(&self) -> Receiver<Instant> {
        self.ticks.clone()
    }

    /// Starts a full query in the background. The result, failures included,
    /// arrives on the results channel.
    pub fn request(&self) {
        let transport = Arc::clone(&self.transport);
        let results = self.results.clone();
        let spawned = thread::Builder::new()
            .name("resync".into())
            .spawn(move || {
                debug!("resync started");
                let inventory = transport
                    .managed_objects()
                    .map(|objects| Inventory::from_managed_objects(&objects));
                let _ = results.send(inventory);
            });
        if let Err(err) = spawned {
            warn!("could not start resync: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::testing::FakeTransport;
    use crate::bluetooth::{InterfaceMap, PropMap, PropValue, ADAPTER_INTERFACE};
    use crate::dict;

    #[test]
    fn request_delivers_inventory() {
        let fake = Arc::new(FakeTransport::new());
        let adapter: PropMap = dict! {
            "Powered".to_string() => PropValue::Bool(true)
        };
        let hci0: InterfaceMap = dict! {
            ADAPTER_INTERFACE.to_string() => adapter
        };
        if let Ok(mut objects) = fake.objects.lock() {
            objects.insert("/org/bluez/hci0".to_string(), hci0);
        }
        let (scheduler, results) =
            RefreshScheduler::new(fake, Duration::from_secs(3600));
        scheduler.request();
        let inventory = results
            .recv_timeout(Duration::from_secs(5))
            .expect("result arrives")
            .expect("query succeeds");
        assert_eq!(inventory.adapters.len(), 1);
        assert!(inventory.adapters[0].powered);
    }

    #[test]
    fn request_forwards_failure() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("GetManagedObjects");
        let (scheduler, results) =
            RefreshScheduler::new(fake, Duration::from_secs(3600));
        scheduler.request();
        let result = results
            .recv_timeout(Duration::from_secs(5))
            .expect("result arrives");
        assert!(result.is_err());
    }

    #[test]
    fn ticks_on_interval() {
        let fake = Arc::new(FakeTransport::new());
        let (scheduler, _results) =
            RefreshScheduler::new(fake, Duration::from_millis(10));
        assert!(scheduler
            .ticks()
            .recv_timeout(Duration::from_secs(5))
            .is_ok());
    }
}

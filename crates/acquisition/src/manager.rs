//! Lifecycle façade over one device client and its streaming controller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use biosig_types::{DeviceEvent, DeviceFamily, Frame, SessionConfig, StreamState};
use devices::{ClientStatus, DeviceClient, DeviceError};
use flume::{Receiver, Sender};
use log::{error, info, warn};

use crate::config::StreamConfig;
use crate::controller::StreamController;
use crate::error::{AcquisitionError, AcquisitionResult};

/// Connects, streams and disconnects one device.
///
/// Every method takes `&self`, so a manager can be shared behind an `Arc`
/// and driven from several threads. Control operations are serialized
/// internally.
pub struct DeviceManager<C: DeviceClient> {
    family: DeviceFamily,
    client: Arc<Mutex<C>>,
    controller: StreamController<C>,
    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,
}

impl<C: DeviceClient> DeviceManager<C> {
    pub fn new(client: C, config: StreamConfig) -> Self {
        let family = client.family();
        let client = Arc::new(Mutex::new(client));
        let (events_tx, events_rx) = flume::unbounded();
        let controller = StreamController::new(Arc::clone(&client), config, events_tx.clone());
        Self {
            family,
            client,
            controller,
            events_tx,
            events_rx,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    fn lock_client(&self) -> AcquisitionResult<MutexGuard<'_, C>> {
        self.client.lock().map_err(|_| {
            error!("Device client lock poisoned on {}", self.family);
            AcquisitionError::LockPoisoned("device client")
        })
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events_tx.send(event);
    }

    fn report<T>(&self, result: AcquisitionResult<T>) -> AcquisitionResult<T> {
        if let Err(e) = &result {
            self.emit(DeviceEvent::error(e.kind(), e.to_string()));
        }
        result
    }

    /// Connect and configure the device, then run its discovery.
    ///
    /// Does nothing when already connected. If discovery fails the device is
    /// disconnected again.
    pub fn connect(&self) -> AcquisitionResult<()> {
        let result = self.connect_client();
        self.report(result)
    }

    fn connect_client(&self) -> AcquisitionResult<()> {
        let mut client = self.lock_client()?;
        if client.is_connected() {
            return Ok(());
        }
        client.connect()?;
        if let Err(e) = client.discover() {
            warn!("Discovery failed on {}, disconnecting: {}", self.family, e);
            if let Err(disconnect_err) = client.disconnect() {
                warn!("Disconnect after failed discovery: {}", disconnect_err);
            }
            return Err(e.into());
        }
        drop(client);

        info!("{} connected", self.family);
        self.emit(DeviceEvent::Connected {
            family: self.family,
        });
        Ok(())
    }

    /// Stop streaming if needed, then close the device connection.
    pub fn disconnect(&self) -> AcquisitionResult<()> {
        if let Err(e) = self.controller.stop() {
            warn!("Error stopping stream before disconnect: {}", e);
        }

        let mut client = self.lock_client()?;
        let was_connected = client.is_connected();
        client.disconnect()?;
        drop(client);

        if was_connected {
            self.emit(DeviceEvent::Disconnected {
                family: self.family,
            });
        }
        Ok(())
    }

    pub fn start(&self) -> AcquisitionResult<()> {
        let result = self.start_stream();
        self.report(result)
    }

    fn start_stream(&self) -> AcquisitionResult<()> {
        if !self.is_connected()? {
            return Err(DeviceError::NotConnected(format!(
                "cannot start streaming, {} is not connected",
                self.family
            ))
            .into());
        }
        self.controller.start()
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn stop(&self) -> AcquisitionResult<()> {
        self.controller.stop()
    }

    pub fn state(&self) -> StreamState {
        self.controller.state()
    }

    pub fn status(&self) -> AcquisitionResult<ClientStatus> {
        Ok(self.lock_client()?.query_status())
    }

    /// Whether the client holds an open connection. Fails if a thread
    /// panicked while holding the client lock.
    pub fn is_connected(&self) -> AcquisitionResult<bool> {
        Ok(self.lock_client()?.is_connected())
    }

    /// Delivery queue of decoded frames.
    pub fn frames(&self) -> Receiver<Frame> {
        self.controller.frames()
    }

    /// Lifecycle events of this device.
    pub fn events(&self) -> Receiver<DeviceEvent> {
        self.events_rx.clone()
    }

    /// Shared handle to the client, for device-specific queries.
    ///
    /// Holding its lock blocks connects, starts and stops, and delays a
    /// worker that needs to stop the device after a read failure.
    pub fn client(&self) -> Arc<Mutex<C>> {
        Arc::clone(&self.client)
    }

    /// Run a closure against the locked client.
    pub fn with_client<R>(&self, f: impl FnOnce(&mut C) -> R) -> AcquisitionResult<R> {
        let mut client = self.lock_client()?;
        Ok(f(&mut client))
    }

    /// Session metadata for the next start.
    pub fn attach_session(&self, session: SessionConfig) {
        self.controller.attach_session(session);
    }

    pub fn worker_id(&self) -> Option<ThreadId> {
        self.controller.worker_id()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.controller.frames_delivered()
    }
}

impl<C: DeviceClient> Drop for DeviceManager<C> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Error disconnecting {} on drop: {}", self.family, e);
        }
    }
}

//! Streaming state machine and its acquisition worker.
//!
//! The controller is Stopped, Running or Paused. Starting spawns one worker
//! thread that owns the device's frame source; pausing and resuming only flip
//! the state the worker polls. Stopping always happens in the same order:
//! the state goes to Stopped, the worker is joined (which drops its frame
//! source), and only then is the device told to stop streaming.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use biosig_types::{DeviceEvent, ErrorKind, Frame, SessionConfig, StreamState};
use devices::{DeviceClient, DeviceError, FrameSource};
use flume::{Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::recorder::Recorder;

struct Inner {
    state: StreamState,
    worker: Option<JoinHandle<()>>,
}

/// State shared between the controller and its worker.
struct Shared {
    inner: Mutex<Inner>,
    frames_delivered: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner is two plain fields; a panic while holding the lock cannot
        // leave them half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Move to Stopped and return the previous state.
    fn stop(&self) -> StreamState {
        mem::replace(&mut self.lock().state, StreamState::Stopped)
    }
}

fn lock_client<C>(client: &Mutex<C>) -> AcquisitionResult<MutexGuard<'_, C>> {
    client
        .lock()
        .map_err(|_| AcquisitionError::LockPoisoned("device client"))
}

/// Owns the acquisition worker of one device.
pub struct StreamController<C: DeviceClient> {
    client: Arc<Mutex<C>>,
    config: StreamConfig,
    session: Mutex<SessionConfig>,
    /// Serializes start/pause/resume/stop
    control: Mutex<()>,
    shared: Arc<Shared>,
    frame_tx: Sender<Frame>,
    frame_rx: Receiver<Frame>,
    events: Sender<DeviceEvent>,
}

impl<C: DeviceClient> StreamController<C> {
    pub fn new(client: Arc<Mutex<C>>, config: StreamConfig, events: Sender<DeviceEvent>) -> Self {
        let (frame_tx, frame_rx) = match config.queue_capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };
        Self {
            client,
            config,
            session: Mutex::new(SessionConfig::default()),
            control: Mutex::new(()),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: StreamState::Stopped,
                    worker: None,
                }),
                frames_delivered: AtomicU64::new(0),
            }),
            frame_tx,
            frame_rx,
            events,
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Identity of the live worker thread, if any.
    pub fn worker_id(&self) -> Option<ThreadId> {
        let inner = self.shared.lock();
        match inner.state {
            StreamState::Stopped => None,
            _ => inner.worker.as_ref().map(|handle| handle.thread().id()),
        }
    }

    /// Frames handed to the delivery queue since the last start.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Acquire)
    }

    /// Receiving end of the delivery queue.
    pub fn frames(&self) -> Receiver<Frame> {
        self.frame_rx.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Session used by the next start. A running session is not affected.
    pub fn attach_session(&self, session: SessionConfig) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    pub fn session(&self) -> SessionConfig {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Tell the device to stream and spawn the worker.
    ///
    /// Does nothing unless the controller is Stopped; in particular a paused
    /// controller stays paused.
    pub fn start(&self) -> AcquisitionResult<()> {
        let _control = self.control();

        let stale = {
            let mut inner = self.shared.lock();
            if inner.state != StreamState::Stopped {
                debug!("Start ignored, controller is {}", inner.state);
                return Ok(());
            }
            inner.worker.take()
        };
        if let Some(handle) = stale {
            reap(handle);
        }

        let session = self.session();
        let (source, recorder) = {
            let mut client = lock_client(&self.client)?;
            let source = client.open_frame_source()?;
            let recorder = Recorder::open(&session, &client.channel_labels())?;
            client.start_streaming()?;
            (source, recorder)
        };

        let worker = Worker {
            source,
            recorder,
            client: Arc::clone(&self.client),
            shared: Arc::clone(&self.shared),
            frame_tx: self.frame_tx.clone(),
            events: self.events.clone(),
            pause_poll: self.config.pause_poll_interval(),
            send_poll: self.config.send_poll_interval(),
        };

        self.shared.frames_delivered.store(0, Ordering::Release);
        let spawned = {
            let mut inner = self.shared.lock();
            inner.state = StreamState::Running;
            let spawned = thread::Builder::new()
                .name(self.config.worker_name.clone())
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => {
                    inner.worker = Some(handle);
                    // Emitted under the lock so it precedes anything the
                    // worker reports.
                    self.emit(DeviceEvent::StreamingStarted);
                    Ok(())
                }
                Err(e) => {
                    inner.state = StreamState::Stopped;
                    Err(e)
                }
            }
        };

        if let Err(e) = spawned {
            error!("Failed to spawn acquisition worker: {}", e);
            // The closure and its frame source are gone, so stopping is safe.
            if let Err(stop_err) = lock_client(&self.client)?.stop_streaming() {
                warn!("Failed to stop device after spawn failure: {}", stop_err);
            }
            return Err(AcquisitionError::WorkerSpawn(e.to_string()));
        }

        info!("Streaming started");
        Ok(())
    }

    /// Keep the worker alive but stop reading. No socket I/O happens.
    pub fn pause(&self) {
        let _control = self.control();
        let mut inner = self.shared.lock();
        if inner.state == StreamState::Running {
            inner.state = StreamState::Paused;
            drop(inner);
            info!("Streaming paused");
            self.emit(DeviceEvent::StreamingPaused);
        }
    }

    pub fn resume(&self) {
        let _control = self.control();
        let mut inner = self.shared.lock();
        if inner.state == StreamState::Paused {
            inner.state = StreamState::Running;
            drop(inner);
            info!("Streaming resumed");
            self.emit(DeviceEvent::StreamingResumed);
        }
    }

    /// Stop the session: set Stopped, join the worker, then tell the device.
    ///
    /// A no-op when already Stopped, apart from reaping a worker that stopped
    /// itself after a read failure.
    pub fn stop(&self) -> AcquisitionResult<()> {
        let _control = self.control();

        let (previous, handle) = {
            let mut inner = self.shared.lock();
            let previous = mem::replace(&mut inner.state, StreamState::Stopped);
            (previous, inner.worker.take())
        };

        let panicked = match handle {
            Some(handle) => handle.join().is_err(),
            None => false,
        };

        if previous == StreamState::Stopped {
            if panicked {
                warn!("Reaped an acquisition worker that had panicked");
            }
            return Ok(());
        }

        // The worker has exited and dropped its frame source; nothing reads
        // the data socket any more.
        let stopped = lock_client(&self.client)
            .and_then(|mut client| client.stop_streaming().map_err(AcquisitionError::from));

        info!(
            "Streaming stopped after {} frames",
            self.frames_delivered()
        );
        if let Err(e) = &stopped {
            warn!("Failed to stop device streaming: {}", e);
            self.emit(DeviceEvent::error(e.kind(), e.to_string()));
        }
        self.emit(DeviceEvent::StreamingStopped);

        if panicked {
            error!("Acquisition worker panicked");
            return Err(AcquisitionError::WorkerPanicked);
        }
        stopped
    }
}

impl<C: DeviceClient> Drop for StreamController<C> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping stream on drop: {}", e);
        }
    }
}

fn reap(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("Reaped an acquisition worker that had panicked");
    }
}

/// Why the worker loop ended.
enum Exit {
    /// The controller asked it to stop
    Requested,
    /// Reading failed; the worker stops the session itself
    Failed(DeviceError),
    /// Nobody can receive frames any more
    QueueClosed,
}

/// Outcome of handing one frame to the delivery queue.
enum Delivery {
    Sent,
    Stopped,
    Closed,
}

struct Worker<C: DeviceClient> {
    source: Box<dyn FrameSource>,
    recorder: Option<Recorder>,
    client: Arc<Mutex<C>>,
    shared: Arc<Shared>,
    frame_tx: Sender<Frame>,
    events: Sender<DeviceEvent>,
    pause_poll: Duration,
    send_poll: Duration,
}

impl<C: DeviceClient> Worker<C> {
    fn run(self) {
        let Worker {
            mut source,
            mut recorder,
            client,
            shared,
            frame_tx,
            events,
            pause_poll,
            send_poll,
        } = self;
        debug!("Acquisition worker running");

        let exit = loop {
            match shared.state() {
                StreamState::Stopped => break Exit::Requested,
                StreamState::Paused => {
                    thread::sleep(pause_poll);
                    continue;
                }
                StreamState::Running => {}
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() => continue,
                Err(e) => break Exit::Failed(e),
            };

            match deliver(&frame_tx, &shared, frame.clone(), pause_poll, send_poll) {
                Delivery::Sent => {}
                Delivery::Stopped => break Exit::Requested,
                Delivery::Closed => break Exit::QueueClosed,
            }

            let write_failed = match recorder.as_mut() {
                Some(recorder) => recorder.write_frame(&frame).err(),
                None => None,
            };
            if let Some(e) = write_failed {
                error!("Recording failed, continuing without it: {}", e);
                let _ = events.send(DeviceEvent::error(ErrorKind::Recorder, e.to_string()));
                recorder = None;
            }
        };

        // Release the data socket handle before anything else happens.
        drop(source);

        if let Some(recorder) = recorder {
            if let Err(e) = recorder.finish() {
                error!("Failed to finalize recording: {}", e);
                let _ = events.send(DeviceEvent::error(ErrorKind::Recorder, e.to_string()));
            }
        }

        let (kind, detail) = match exit {
            Exit::Requested => {
                debug!("Acquisition worker exiting");
                return;
            }
            Exit::Failed(e) => (e.kind(), e.to_string()),
            Exit::QueueClosed => (ErrorKind::Worker, "frame queue closed".to_string()),
        };

        // A concurrent stop() may have won; then it owns the device stop.
        if shared.stop() == StreamState::Stopped {
            return;
        }
        error!("Acquisition worker stopping: {}", detail);
        match lock_client(&client) {
            Ok(mut client) => {
                if let Err(e) = client.stop_streaming() {
                    warn!("Failed to stop device streaming: {}", e);
                }
            }
            Err(e) => error!("{}", e),
        }
        let _ = events.send(DeviceEvent::error(kind, detail));
        let _ = events.send(DeviceEvent::StreamingStopped);
    }
}

/// Queue one frame, only ever while Running.
///
/// The state is checked and the send attempted under the state lock, so no
/// frame enters the queue once `pause()` or `stop()` has returned. A frame
/// read across a pause is held until resume; a stop drops it. On a full
/// queue the lock is released for `send_poll` before retrying.
fn deliver(
    tx: &Sender<Frame>,
    shared: &Shared,
    frame: Frame,
    pause_poll: Duration,
    send_poll: Duration,
) -> Delivery {
    let mut frame = frame;
    loop {
        let inner = shared.lock();
        match inner.state {
            StreamState::Stopped => {
                debug!("Dropping frame {}, stop requested", frame.sequence);
                return Delivery::Stopped;
            }
            StreamState::Paused => {
                drop(inner);
                thread::sleep(pause_poll);
                continue;
            }
            StreamState::Running => {}
        }
        match tx.try_send(frame) {
            Ok(()) => {
                shared.frames_delivered.fetch_add(1, Ordering::AcqRel);
                return Delivery::Sent;
            }
            Err(TrySendError::Full(pending)) => {
                drop(inner);
                frame = pending;
                thread::sleep(send_poll);
            }
            Err(TrySendError::Disconnected(_)) => return Delivery::Closed,
        }
    }
}

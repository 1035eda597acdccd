//! In-process fake base station
//!
//! Listens on two loopback ports and answers the Trigno and QTM command sets
//! well enough to run every client end to end without hardware. Used by the
//! integration tests and by the daemon's `--mock` mode.

mod generator;

use std::collections::HashSet;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::command::TERMINATOR;
use crate::connection::ConnectionConfig;

pub use generator::{encode_frame, frame_values, Waveform};

const ACCEPT_POLL: Duration = Duration::from_millis(5);
const READ_POLL: Duration = Duration::from_millis(20);

/// Behaviour of a [`MockBaseStation`].
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Greeting sent on every new control connection
    pub banner: String,
    /// Floats per frame on the data socket
    pub channel_count: usize,
    pub frame_interval: Duration,
    pub waveform: Waveform,
    /// Frames sent per START before the stream goes quiet
    pub frame_limit: Option<u64>,
    /// Close the data connection once `frame_limit` is reached
    pub close_after_limit: bool,
    /// Sensor slots that report as paired and active
    pub paired_slots: Vec<usize>,
    /// Commands answered with `INVALID COMMAND`
    pub rejected_commands: HashSet<String>,
    /// Stream as soon as a data peer connects, like a bridge with no
    /// control channel
    pub stream_without_start: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            banner: "Delsys Trigno System Digital Protocol Version 3.6.0".to_string(),
            channel_count: 16,
            frame_interval: Duration::from_millis(1),
            waveform: Waveform::Zeros,
            frame_limit: None,
            close_after_limit: false,
            paired_slots: vec![1, 2],
            rejected_commands: HashSet::new(),
            stream_without_start: false,
        }
    }
}

#[derive(Default)]
struct MockState {
    shutdown: AtomicBool,
    streaming: AtomicBool,
    /// Bumped on every START so the data thread can reset its frame count
    start_generation: AtomicU64,
    frames_sent: AtomicU64,
    control_connections: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl MockState {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn record(&self, command: &str) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
    }
}

/// A fake device serving a control port and a data port on 127.0.0.1.
///
/// Dropping it stops both server threads.
pub struct MockBaseStation {
    control_port: u16,
    data_port: u16,
    state: Arc<MockState>,
    threads: Vec<JoinHandle<()>>,
}

impl MockBaseStation {
    pub fn start() -> io::Result<Self> {
        Self::with_options(MockOptions::default())
    }

    pub fn with_options(options: MockOptions) -> io::Result<Self> {
        let control = TcpListener::bind("127.0.0.1:0")?;
        let data = TcpListener::bind("127.0.0.1:0")?;
        control.set_nonblocking(true)?;
        data.set_nonblocking(true)?;
        let control_port = control.local_addr()?.port();
        let data_port = data.local_addr()?.port();

        let options = Arc::new(options);
        let state = Arc::new(MockState::default());

        let control_thread = {
            let options = Arc::clone(&options);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("mock-control".to_string())
                .spawn(move || serve_control(control, &options, &state))?
        };
        let data_thread = {
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("mock-data".to_string())
                .spawn(move || serve_data(data, &options, &state))?
        };

        info!(
            "Mock base station listening on 127.0.0.1 (control {}, data {})",
            control_port, data_port
        );
        Ok(Self {
            control_port,
            data_port,
            state,
            threads: vec![control_thread, data_thread],
        })
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    /// Connection settings pointing at this mock.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1").with_ports(self.control_port, self.data_port)
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_of(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.state.frames_sent.load(Ordering::Acquire)
    }

    pub fn control_connections(&self) -> usize {
        self.state.control_connections.load(Ordering::Acquire)
    }
}

impl Drop for MockBaseStation {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Mock base station thread panicked");
            }
        }
    }
}

/// Poll a nonblocking listener until a peer arrives or shutdown is requested.
fn accept(listener: &TcpListener, state: &MockState) -> Option<TcpStream> {
    while !state.stopping() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Mock accepted {}", peer);
                // Accepted sockets inherit nonblocking mode on some platforms.
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("Mock could not configure socket: {}", e);
                    continue;
                }
                return Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Mock accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    None
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

fn serve_control(listener: TcpListener, options: &MockOptions, state: &MockState) {
    while let Some(stream) = accept(&listener, state) {
        state.control_connections.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = handle_control(stream, options, state) {
            debug!("Mock control connection ended: {}", e);
        }
    }
}

fn handle_control(mut stream: TcpStream, options: &MockOptions, state: &MockState) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.write_all(format!("{}\r\n\r\n", options.banner).as_bytes())?;

    let mut pending = Vec::new();
    let mut buf = [0u8; 1024];
    while !state.stopping() {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if is_poll_timeout(&e) => continue,
            Err(e) => return Err(e),
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = find_terminator(&pending) {
            let packet: Vec<u8> = pending.drain(..end + TERMINATOR.len()).collect();
            let command = String::from_utf8_lossy(&packet[..end]).trim().to_string();
            state.record(&command);
            let reply = respond(&command, options, state);
            stream.write_all(format!("{}\r\n\r\n", reply.text).as_bytes())?;
            if reply.close {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

struct Reply {
    text: String,
    close: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            close: false,
        }
    }

    fn closing(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            close: true,
        }
    }
}

fn respond(command: &str, options: &MockOptions, state: &MockState) -> Reply {
    if options.rejected_commands.contains(command) {
        return Reply::text("INVALID COMMAND");
    }

    match command {
        "ENDIAN LITTLE" | "BACKWARDS COMPATIBILITY OFF" | "BACKWARDS COMPATIBILITY ON"
        | "UPSAMPLE ON" | "UPSAMPLE OFF" => Reply::text("OK"),
        "START" | "StreamFrames AllFrames Analog" => {
            state.start_generation.fetch_add(1, Ordering::AcqRel);
            state.streaming.store(true, Ordering::Release);
            Reply::text("OK")
        }
        "STOP" | "StreamFrames Stop" => {
            state.streaming.store(false, Ordering::Release);
            Reply::text("OK")
        }
        "QUIT" => {
            state.streaming.store(false, Ordering::Release);
            Reply::closing("BYE!")
        }
        "Disconnect" => {
            state.streaming.store(false, Ordering::Release);
            Reply::closing("OK")
        }
        "Version 1.22" => Reply::text("Version set to 1.22"),
        "BACKWARDS COMPATIBILITY?" => Reply::text("NO"),
        "UPSAMPLING?" => Reply::text("YES"),
        "FRAME INTERVAL?" => Reply::text("0.0135"),
        "MAX SAMPLES EMG?" => Reply::text("27"),
        "MAX SAMPLES AUX?" => Reply::text("2"),
        "ENDIANNESS?" => Reply::text("LITTLE"),
        "BASE FIRMWARE?" => Reply::text("MA2919"),
        "BASE SERIAL?" => Reply::text("SP-W02C-1759"),
        _ => match command.strip_prefix("SENSOR ") {
            Some(rest) => sensor_reply(rest, options),
            None => Reply::text("INVALID COMMAND"),
        },
    }
}

fn sensor_reply(rest: &str, options: &MockOptions) -> Reply {
    let (index, query) = match rest.split_once(' ') {
        Some((index, query)) => (index, query),
        None => return Reply::text("INVALID COMMAND"),
    };
    let index: usize = match index.parse() {
        Ok(index) if (1..=16).contains(&index) => index,
        _ => return Reply::text("INVALID COMMAND"),
    };
    let paired = options.paired_slots.contains(&index);

    let text = match query {
        "PAIRED?" | "ACTIVE?" => {
            if paired {
                "YES".to_string()
            } else {
                "NO".to_string()
            }
        }
        _ if !paired => "CANNOT COMPLETE".to_string(),
        "TYPE?" => "21".to_string(),
        "SETMODE 40" | "SETMODE 41" => "OK".to_string(),
        "MODE?" => "40".to_string(),
        "SERIAL?" => format!("SP-W06-{:03}", index),
        "FIRMWARE?" => "40.22".to_string(),
        "EMGCHANNELCOUNT?" | "CHANNELCOUNT?" => "1".to_string(),
        "AUXCHANNELCOUNT?" => "0".to_string(),
        "STARTINDEX?" => index.to_string(),
        q if q.starts_with("CHANNEL 1 ") => match &q["CHANNEL 1 ".len()..] {
            "GAIN?" => "300".to_string(),
            "SAMPLES?" => "26".to_string(),
            "RATE?" => "1925.926".to_string(),
            "UNITS?" => "V".to_string(),
            _ => "INVALID COMMAND".to_string(),
        },
        _ => "INVALID COMMAND".to_string(),
    };
    Reply::text(text)
}

fn serve_data(listener: TcpListener, options: &MockOptions, state: &MockState) {
    while let Some(stream) = accept(&listener, state) {
        if let Err(e) = stream_frames(stream, options, state) {
            debug!("Mock data connection ended: {}", e);
        }
    }
}

fn stream_frames(mut stream: TcpStream, options: &MockOptions, state: &MockState) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_POLL))?;
    let interval_secs = options.frame_interval.as_secs_f32();
    let mut generation = state.start_generation.load(Ordering::Acquire);
    let mut sent_this_start = 0u64;
    let mut frame = 0u64;
    let mut bytes = Vec::new();
    let mut probe = [0u8; 64];

    while !state.stopping() {
        let current = state.start_generation.load(Ordering::Acquire);
        if current != generation {
            generation = current;
            sent_this_start = 0;
        }

        let exhausted = options
            .frame_limit
            .map_or(false, |limit| sent_this_start >= limit);
        if exhausted && options.close_after_limit {
            debug!("Mock closing data connection after {} frames", sent_this_start);
            return Ok(());
        }

        let streaming = options.stream_without_start || state.streaming.load(Ordering::Acquire);
        if !streaming || exhausted {
            // Nothing to send. The client never writes here, so a read only
            // returns when the peer has gone away.
            match stream.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => return Err(e),
            }
            continue;
        }

        let values = frame_values(options.waveform, frame, interval_secs, options.channel_count);
        encode_frame(&values, &mut bytes);
        stream.write_all(&bytes)?;
        frame += 1;
        sent_this_start += 1;
        state.frames_sent.fetch_add(1, Ordering::AcqRel);

        if !options.frame_interval.is_zero() {
            thread::sleep(options.frame_interval);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandChannel;

    #[test]
    fn answers_configuration_and_rejects_unknown_commands() {
        let mock = MockBaseStation::start().unwrap();
        let stream = TcpStream::connect(("127.0.0.1", mock.control_port())).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut channel = CommandChannel::new(stream);

        assert!(channel.read_banner().unwrap().starts_with("Delsys Trigno"));
        assert!(channel.send("ENDIAN LITTLE").unwrap().is_ok());
        assert!(channel.send("FLY TO MOON").is_err());
        assert_eq!(channel.query("SENSOR 3 PAIRED?").unwrap(), "NO");
        assert_eq!(channel.query("SENSOR 1 SERIAL?").unwrap(), "SP-W06-001");
        assert_eq!(mock.count_of("ENDIAN LITTLE"), 1);
        assert_eq!(mock.commands().len(), 4);
    }

    #[test]
    fn rejected_commands_are_configurable() {
        let mut options = MockOptions::default();
        options.rejected_commands.insert("UPSAMPLE ON".to_string());
        let mock = MockBaseStation::with_options(options).unwrap();
        let stream = TcpStream::connect(("127.0.0.1", mock.control_port())).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut channel = CommandChannel::new(stream);
        channel.read_banner().unwrap();
        assert!(channel.send("UPSAMPLE ON").is_err());
    }

    #[test]
    fn terminator_search_finds_first_packet() {
        assert_eq!(find_terminator(b"START\r\n\r\nSTOP\r\n\r\n"), Some(5));
        assert_eq!(find_terminator(b"START\r\n"), None);
    }
}

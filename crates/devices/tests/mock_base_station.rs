//! Device clients against the in-process mock base station.

use std::time::Duration;

use devices::mock::{MockBaseStation, MockOptions, Waveform};
use devices::analog::AnalogClient;
use devices::qtm::QtmClient;
use devices::trigno::TrignoClient;
use devices::{ClientStatus, ConnectionConfig, DeviceClient, DeviceError, FrameSource, SocketRole};

fn next_frame(source: &mut Box<dyn FrameSource>) -> biosig_types::Frame {
    for _ in 0..40 {
        match source.next_frame() {
            Ok(frame) => return frame,
            Err(e) if e.is_timeout() => continue,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    panic!("no frame within the deadline");
}

#[test]
fn trigno_connect_configures_and_discovers() {
    let mock = MockBaseStation::with_options(MockOptions {
        paired_slots: vec![2, 7],
        ..MockOptions::default()
    })
    .unwrap();

    let mut client = TrignoClient::new(mock.connection_config());
    client.connect().unwrap();
    client.discover().unwrap();

    assert_eq!(
        &mock.commands()[..3],
        &["ENDIAN LITTLE", "BACKWARDS COMPATIBILITY OFF", "UPSAMPLE ON"]
    );
    assert_eq!(client.query_status(), ClientStatus::Connected);
    assert!(client.banner().unwrap().contains("Trigno"));

    let base = client.base_station().unwrap();
    assert_eq!(base.serial, "SP-W02C-1759");
    assert!((base.emg_sample_rate() - 2000.0).abs() < 1e-6);

    assert_eq!(client.active_indices(), vec![2, 7]);
    let labels = client.channel_labels();
    assert_eq!(labels[0], "sensor1");
    assert_eq!(labels[1], "SP-W06-002");
    assert_eq!(labels[6], "SP-W06-007");
    assert_eq!(mock.count_of("SENSOR 2 SETMODE 40"), 1);
    assert_eq!(mock.count_of("SENSOR 3 ACTIVE?"), 0);

    client.disconnect().unwrap();
}

#[test]
fn discovery_can_be_disabled() {
    let mock = MockBaseStation::start().unwrap();
    let config = ConnectionConfig {
        discover_sensors: false,
        ..mock.connection_config()
    };
    let mut client = TrignoClient::new(config);
    client.connect().unwrap();
    client.discover().unwrap();
    assert!(client.active_indices().is_empty());
    assert_eq!(mock.commands().len(), 3);
}

#[test]
fn configuration_failure_closes_sockets() {
    let mut options = MockOptions::default();
    options
        .rejected_commands
        .insert("BACKWARDS COMPATIBILITY OFF".to_string());
    let mock = MockBaseStation::with_options(options).unwrap();

    let mut client = TrignoClient::new(mock.connection_config());
    let err = client.connect().unwrap_err();
    assert_eq!(
        err,
        DeviceError::Configuration {
            command: "BACKWARDS COMPATIBILITY OFF".into(),
            response: "INVALID COMMAND".into(),
        }
    );
    assert!(!client.is_connected());
    assert!(matches!(client.query_status(), ClientStatus::Error(_)));
    assert!(matches!(
        client.open_frame_source(),
        Err(DeviceError::NotConnected(_))
    ));
    // UPSAMPLE ON is never attempted after the failed step.
    assert_eq!(mock.count_of("UPSAMPLE ON"), 0);
}

#[test]
fn refused_data_socket_is_named() {
    let mock = MockBaseStation::start().unwrap();
    let unused = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ConnectionConfig::new("127.0.0.1").with_ports(mock.control_port(), unused);

    let mut client = TrignoClient::new(config);
    match client.connect() {
        Err(DeviceError::ConnectFailed { socket, .. }) => assert_eq!(socket, SocketRole::Data),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!client.is_connected());
    assert_eq!(mock.control_connections(), 1);
}

#[test]
fn double_disconnect_sends_one_quit() {
    let mock = MockBaseStation::start().unwrap();
    let mut client = TrignoClient::new(mock.connection_config());
    client.connect().unwrap();
    client.connect().unwrap();

    client.disconnect().unwrap();
    client.disconnect().unwrap();

    assert_eq!(mock.count_of("QUIT"), 1);
    assert_eq!(mock.count_of("ENDIAN LITTLE"), 1);
    assert_eq!(client.query_status(), ClientStatus::Disconnected);
}

#[test]
fn trigno_streams_ramp_frames() {
    let mock = MockBaseStation::with_options(MockOptions {
        waveform: Waveform::Ramp,
        frame_limit: Some(3),
        ..MockOptions::default()
    })
    .unwrap();

    let mut client = TrignoClient::new(mock.connection_config());
    client.connect().unwrap();
    let mut source = client.open_frame_source().unwrap();
    client.start_streaming().unwrap();
    assert_eq!(client.query_status(), ClientStatus::Streaming);

    for expected in 0..3u64 {
        let frame = next_frame(&mut source);
        assert_eq!(frame.sequence, expected);
        assert_eq!(frame.channel_count(), 16);
        assert!(frame.values().iter().all(|v| *v == expected as f32));
    }

    client.stop_streaming().unwrap();
    assert_eq!(mock.count_of("STOP"), 1);
    client.disconnect().unwrap();
}

#[test]
fn qtm_speaks_its_own_dialect() {
    let mock = MockBaseStation::with_options(MockOptions {
        channel_count: 8,
        frame_limit: Some(2),
        frame_interval: Duration::from_millis(2),
        ..MockOptions::default()
    })
    .unwrap();

    let mut client = QtmClient::new(mock.connection_config());
    client.connect().unwrap();
    let mut source = client.open_frame_source().unwrap();
    client.start_streaming().unwrap();
    assert_eq!(next_frame(&mut source).channel_count(), 8);
    client.stop_streaming().unwrap();
    client.disconnect().unwrap();

    assert_eq!(
        mock.commands(),
        vec![
            "Version 1.22",
            "StreamFrames AllFrames Analog",
            "StreamFrames Stop",
            "Disconnect",
        ]
    );
}

#[test]
fn analog_bridge_streams_without_commands() {
    let mock = MockBaseStation::with_options(MockOptions {
        channel_count: 4,
        waveform: Waveform::Ramp,
        stream_without_start: true,
        ..MockOptions::default()
    })
    .unwrap();

    let mut client = AnalogClient::new(ConnectionConfig {
        channel_count: Some(4),
        ..mock.connection_config()
    });
    client.connect().unwrap();
    client.start_streaming().unwrap();

    let mut source = client.open_frame_source().unwrap();
    let first: Vec<f32> = (0..3).map(|_| next_frame(&mut source).values()[0]).collect();
    assert_eq!(first[1], first[0] + 1.0);
    assert_eq!(first[2], first[0] + 2.0);
    client.stop_streaming().unwrap();
    drop(source);

    // The bridge kept streaming; the next session still starts on a frame.
    std::thread::sleep(Duration::from_millis(30));
    client.start_streaming().unwrap();
    let mut source = client.open_frame_source().unwrap();
    for _ in 0..3 {
        let frame = next_frame(&mut source);
        let ramp = frame.values()[0];
        assert!(frame.values().iter().all(|v| *v == ramp));
    }

    client.disconnect().unwrap();
    assert!(mock.commands().is_empty());
}

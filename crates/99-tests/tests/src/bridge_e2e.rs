use std::thread;
use std::time::Duration;

use bridge::{inbox, Bridge, NotificationSender};
use runtime_native::{BackingBuffer, BusConfig, ControlLoop, LoopExit, ProcessMemory, ShutdownFlag};
use transport::{Body, Message, ModuleId, MqttPublish};
use transport_channel::{ChannelError, SeqPacketChannel, SeqPacketListener};

use crate::{recv_within, wait_until, SharedClient};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_in(dir: &tempfile::TempDir) -> BusConfig {
    let toml = format!(
        "socket_path = {:?}\npoll_interval_ms = 1\nconnect_delay_ms = 10\n",
        dir.path().join("core.sock")
    );
    BusConfig::from_toml_str(&toml).unwrap()
}

struct RunningBridge {
    handle: thread::JoinHandle<LoopExit>,
    notifications: NotificationSender,
    shutdown: ShutdownFlag,
}

fn spawn_bridge(config: BusConfig, client: SharedClient) -> RunningBridge {
    let (notifications, rx) = inbox(32);
    let shutdown = ShutdownFlag::new();
    let flag = shutdown.clone();
    let handle = thread::spawn(move || {
        let mut backing = BackingBuffer::anonymous(config.region_bytes).unwrap();
        let memory = ProcessMemory::from_config(backing.as_mut_slice(), &config).unwrap();
        let channel = SeqPacketChannel::connect(&config.socket_path, config.retry_policy()).unwrap();
        let mut bridge = Bridge::new(client, memory, rx);
        let mut control = ControlLoop::new(channel, flag, config.poll_interval());
        control.run(&mut bridge)
    });
    RunningBridge {
        handle,
        notifications,
        shutdown,
    }
}

fn expect(core: &mut SeqPacketChannel) -> Message {
    recv_within(core, TIMEOUT).expect("bridge reply")
}

#[test]
fn bridge_relays_between_core_and_broker() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let listener = SeqPacketListener::bind(&config.socket_path).unwrap();
    let client = SharedClient::default();
    let broker = client.log();

    let bridge = spawn_bridge(config, client);
    let mut core = listener.accept().unwrap();

    core.send(&Message::new(ModuleId::Core, Body::Start)).unwrap();
    let ack = expect(&mut core);
    assert_eq!(ack.body(), &Body::Ack);
    assert_eq!(ack.origin, ModuleId::Bridge);
    assert!(broker.lock().connected);

    let cmd = MqttPublish::new("cyberdeck/teste", 1, b"HACK THE PLANET".to_vec()).unwrap();
    core.send(&Message::new(ModuleId::Core, Body::MqttPublish(cmd))).unwrap();
    assert!(wait_until(TIMEOUT, || !broker.lock().published.is_empty()));
    assert_eq!(
        broker.lock().published[0],
        ("cyberdeck/teste".to_owned(), b"HACK THE PLANET".to_vec())
    );

    assert!(bridge
        .notifications
        .message_arrived("sensors/temp", b"25.5".to_vec()));
    match expect(&mut core).into_body() {
        Body::MqttSubscription(event) => {
            assert_eq!(event.topic(), "sensors/temp");
            assert_eq!(event.data(), b"25.5");
        }
        other => panic!("expected subscription event, got {other:?}"),
    }

    core.send(&Message::new(ModuleId::Core, Body::Ping)).unwrap();
    assert_eq!(expect(&mut core).body(), &Body::Pong);

    core.send(&Message::new(ModuleId::Core, Body::Stop)).unwrap();
    assert_eq!(expect(&mut core).body(), &Body::Ack);
    assert!(!broker.lock().connected);

    bridge.shutdown.trigger();
    assert!(matches!(bridge.handle.join().unwrap(), LoopExit::Shutdown));
}

#[test]
fn bridge_leaves_loop_when_core_goes_away() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let listener = SeqPacketListener::bind(&config.socket_path).unwrap();

    let bridge = spawn_bridge(config, SharedClient::default());
    let mut core = listener.accept().unwrap();
    core.send(&Message::new(ModuleId::Core, Body::Ping)).unwrap();
    assert_eq!(expect(&mut core).body(), &Body::Pong);
    core.disconnect().unwrap();

    match bridge.handle.join().unwrap() {
        LoopExit::ChannelFailed(ChannelError::PeerClosed) => {}
        other => panic!("expected peer loss, got {other:?}"),
    }
}

#[test]
fn late_core_is_reached_by_connect_retries() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let socket_path = config.socket_path.clone();

    let bridge = spawn_bridge(config, SharedClient::default());
    thread::sleep(Duration::from_millis(50));
    let listener = SeqPacketListener::bind(&socket_path).unwrap();
    let mut core = listener.accept().unwrap();

    core.send(&Message::new(ModuleId::Core, Body::Ping)).unwrap();
    assert_eq!(expect(&mut core).body(), &Body::Pong);
    bridge.shutdown.trigger();
    assert!(matches!(bridge.handle.join().unwrap(), LoopExit::Shutdown));
}

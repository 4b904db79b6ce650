use std::thread;

use runtime_native::BusConfig;
use transport_channel::{FifoChannel, Framing};

#[test]
fn status_lines_cross_processes_through_the_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!("fifo_path = {:?}\nfifo_framing = \"nul\"\n", dir.path().join("status.fifo"));
    let config = BusConfig::from_toml_str(&toml).unwrap();
    assert_eq!(config.fifo_framing, Framing::Nul);

    let mut reader = FifoChannel::open(&config.fifo_path, config.fifo_framing).unwrap();
    let path = config.fifo_path.clone();
    let writer = thread::spawn(move || {
        let mut writer = FifoChannel::open(&path, Framing::Nul).unwrap();
        writer.write_nonblocking(b"display:ready").unwrap()
    });
    assert_eq!(writer.join().unwrap(), 13);

    let mut buf = [0xFFu8; 64];
    let read = reader.read_nonblocking(&mut buf);
    assert_eq!(read, 13);
    assert_eq!(&buf[..=read], b"display:ready\0");
    assert_eq!(reader.read_nonblocking(&mut buf), 0);
    reader.close();
}

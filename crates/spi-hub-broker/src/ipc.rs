//! IPC server: accepts local stream connections, decodes
//! inbound batches, enqueues work, and fans device-originated frames out to
//! every connected client.
//!
//! Runs entirely on the broker's single-threaded `LocalSet`.
//! `Broker` lives behind an `Rc<tokio::sync::Mutex<_>>` rather than a plain
//! `Rc<RefCell<_>>`: the bus service loop holds its lock for an entire
//! pass, including the inter-transaction sleeps, so that no two buses ever
//! run a transaction sequence at the same time. A `RefCell` borrow can't
//! span an `.await` without panicking the moment another task on this
//! `LocalSet` tries to touch the broker, whereas the async mutex just
//! makes that task wait its turn.

use std::rc::Rc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use spi_hub_proto::ipc_frame::InboundFrameReader;

use crate::broker::Broker;

/// Bind `socket_path`, removing a stale socket file left by a previous run.
pub fn bind(socket_path: &str) -> std::io::Result<UnixListener> {
    if let Err(e) = std::fs::remove_file(socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e);
        }
    }
    UnixListener::bind(socket_path)
}

/// Accept loop. Spawns one `!Send` task per client onto the current
/// `LocalSet`, so it must itself run inside one.
pub async fn serve(listener: UnixListener, broker: Rc<Mutex<Broker>>, broadcast_tx: broadcast::Sender<Vec<u8>>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("spi-hub: IPC accept failed: {e}");
                continue;
            }
        };

        let broker = broker.clone();
        let broadcast_rx = broadcast_tx.subscribe();
        tokio::task::spawn_local(handle_client(stream, broker, broadcast_rx));
    }
}

async fn handle_client(stream: UnixStream, broker: Rc<Mutex<Broker>>, mut broadcast_rx: broadcast::Receiver<Vec<u8>>) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let devices_list = broker.lock().await.devices_list_frame.clone();
    if let Some(frame) = devices_list {
        if let Err(e) = framed.send(Bytes::from(frame)).await {
            log::warn!("spi-hub: failed to send devices-list to new client: {e}");
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(bytes)) => handle_inbound_frame(&bytes, &broker).await,
                    Some(Err(e)) => {
                        log::warn!("spi-hub: client read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            outgoing = broadcast_rx.recv() => {
                match outgoing {
                    Ok(frame) => {
                        if let Err(e) = framed.send(Bytes::from(frame)).await {
                            log::warn!("spi-hub: send to client failed, dropping connection: {e}");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("spi-hub: client lagged behind, dropped {n} broadcast frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Decode one inbound "messages to devices" frame and enqueue every
/// sub-record up to the first malformed one (partial-success
/// rule — [`InboundFrameReader`] already stops there; this just enqueues
/// whatever it managed to yield before that point).
async fn handle_inbound_frame(bytes: &[u8], broker: &Rc<Mutex<Broker>>) {
    let reader = match InboundFrameReader::new(bytes) {
        Ok(reader) => reader,
        Err(e) => {
            log::warn!("spi-hub: rejecting inbound IPC frame: {e}");
            return;
        }
    };

    for record in reader {
        match record {
            Ok(rec) => {
                let enqueued = broker
                    .lock()
                    .await
                    .enqueue(rec.bus_id, rec.device_id, rec.channel_id, rec.dedupe_id, rec.payload);
                if !enqueued {
                    log::warn!(
                        "spi-hub: dropping message for unknown bus {} device {}",
                        rec.bus_id,
                        rec.device_id
                    );
                }
            }
            Err(e) => {
                log::warn!("spi-hub: aborting inbound frame after malformed sub-record: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spi_hub_core::device::Device;
    use spi_hub_core::error::TransceiverError;
    use spi_hub_core::transceiver::SpiTransceiver;
    use spi_hub_proto::ipc_frame::{command, DeviceInfo, IPC_VERSION, PREAMBLE};

    struct NullTransceiver;
    impl SpiTransceiver for NullTransceiver {
        fn transceive(&mut self, _buf: &mut [u8]) -> Result<(), TransceiverError> {
            Ok(())
        }
    }

    fn socket_path(name: &str) -> String {
        format!("/tmp/spi-hub-test-{name}-{}.sock", std::process::id())
    }

    fn inbound_frame(records: &[(u8, u8, u8, u16, &[u8])]) -> Vec<u8> {
        let mut buf = vec![IPC_VERSION, command::MESSAGES_TO_DEVICES];
        buf.extend_from_slice(&(records.len() as u16).to_le_bytes());
        for &(bus, device, channel, dedupe, payload) in records {
            buf.push(PREAMBLE);
            buf.push(bus);
            buf.push(device);
            buf.push(channel);
            buf.extend_from_slice(&dedupe.to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            buf.extend_from_slice(payload);
        }
        buf
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connecting_client_receives_cached_devices_list_then_can_enqueue() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let path = socket_path("enqueue");
                let listener = bind(&path).expect("bind");

                let mut broker = Broker::new();
                broker.add_bus(spi_hub_core::bus::Bus::new(
                    1,
                    Box::new(NullTransceiver),
                    None,
                    vec![Device::new(1, DeviceInfo { model: "iron-pi-cm8".into(), version: "1".into() })],
                ));
                broker.devices_list_frame = Some(vec![IPC_VERSION, command::DEVICES_LIST, b'{', b'}']);
                let broker = Rc::new(Mutex::new(broker));
                let (broadcast_tx, _rx) = broadcast::channel(16);

                tokio::task::spawn_local(serve(listener, broker.clone(), broadcast_tx));

                let stream = UnixStream::connect(&path).await.expect("connect");
                let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

                let first = framed.next().await.expect("devices-list frame").expect("ok");
                assert_eq!(&first[..2], &[IPC_VERSION, command::DEVICES_LIST]);

                let frame = inbound_frame(&[(1, 1, 4, 0, b"hello")]);
                framed.send(Bytes::from(frame)).await.expect("send inbound frame");

                // Give the server task a chance to process the frame.
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;

                assert_eq!(broker.lock().await.buses.get(&1).unwrap().device(1).unwrap().queue.len(), 1);

                let _ = std::fs::remove_file(&path);
            })
            .await;
    }
}

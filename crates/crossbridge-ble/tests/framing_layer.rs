//! Framing layer behaviour against mock peripherals

use std::sync::Arc;

use crossbridge_ble::{BleError, BleFramingLayer, FramingEvent};
use crossbridge_core::framing::fragment;
use crossbridge_core::testing::MockPeripheral;
use crossbridge_core::{
    FramingConfig, PeerId, WriteType, CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID,
    FRAME_MARKER, HEADER_SIZE, RETRANSMIT_MARKER,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn setup(mtu: usize) -> (
    BleFramingLayer,
    UnboundedReceiver<FramingEvent>,
    Arc<MockPeripheral>,
    PeerId,
) {
    let (layer, events) = BleFramingLayer::new(FramingConfig::default());
    let peripheral = MockPeripheral::shared("AA:BB:CC:DD", mtu);
    let peer = layer.connect_peer(peripheral.clone());
    (layer, events, peripheral, peer)
}

fn sample_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn test_three_hundred_bytes_split_into_three_fragments() {
    let (layer, _events, peripheral, peer) = setup(104);
    let payload = sample_payload(300);

    let writes = layer
        .send_data(&payload, &peer, DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    assert_eq!(writes, 3);

    let recorded = peripheral.writes();
    assert_eq!(recorded.len(), 3);
    for (index, write) in recorded.iter().enumerate() {
        assert_eq!(write.characteristic, DATA_CHARACTERISTIC_UUID);
        assert_eq!(write.write_type, WriteType::WithResponse);
        assert_eq!(&write.data[..HEADER_SIZE], &[FRAME_MARKER, index as u8, 0, 3]);
    }

    let reassembled: Vec<u8> = recorded
        .iter()
        .flat_map(|write| write.data[HEADER_SIZE..].to_vec())
        .collect();
    assert_eq!(reassembled, payload);
}

#[tokio::test]
async fn test_payload_at_max_size_is_unframed() {
    let (layer, _events, peripheral, peer) = setup(104);
    let payload = sample_payload(100);

    layer
        .send_data(&payload, &peer, DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();

    let recorded = peripheral.writes();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].data, payload);
}

#[tokio::test]
async fn test_inbound_fragments_reassemble_in_order() {
    let (layer, mut events, _peripheral, peer) = setup(104);
    let payload = sample_payload(300);

    for packet in fragment(&payload, 100).unwrap() {
        layer
            .handle_incoming(&peer, &packet, DATA_CHARACTERISTIC_UUID)
            .await
            .unwrap();
    }

    assert_eq!(
        events.recv().await,
        Some(FramingEvent::DataReceived {
            peer: peer.clone(),
            data: payload
        })
    );
    let stats = layer.peer_stats(&peer).await.unwrap();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.retransmit_requests_sent, 0);
}

#[tokio::test]
async fn test_gap_emits_single_retransmit_request() {
    let (layer, mut events, peripheral, peer) = setup(104);
    let packets = fragment(&sample_payload(300), 100).unwrap();

    layer
        .handle_incoming(&peer, &packets[0], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    layer
        .handle_incoming(&peer, &packets[2], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();

    let control = peripheral.writes_on(CONTROL_CHARACTERISTIC_UUID);
    assert_eq!(control, vec![vec![RETRANSMIT_MARKER, 1]]);

    let snapshot = layer.reassembly_snapshot(&peer).await.unwrap();
    assert_eq!(snapshot.buffered, packets[0][HEADER_SIZE..].to_vec());
    assert_eq!(snapshot.expected_sequence, 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_retransmitted_fragments_complete_the_message() {
    let (layer, mut events, _peripheral, peer) = setup(104);
    let payload = sample_payload(300);
    let packets = fragment(&payload, 100).unwrap();

    layer
        .handle_incoming(&peer, &packets[0], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    layer
        .handle_incoming(&peer, &packets[2], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    // sender resumes from the requested sequence
    layer
        .handle_incoming(&peer, &packets[1], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    layer
        .handle_incoming(&peer, &packets[2], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();

    match events.recv().await {
        Some(FramingEvent::DataReceived { data, .. }) => assert_eq!(data, payload),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_mismatches_abandon_the_message() {
    let (layer, mut events, peripheral, peer) = setup(104);
    let packets = fragment(&sample_payload(400), 100).unwrap();

    layer
        .handle_incoming(&peer, &packets[0], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    for _ in 0..4 {
        layer
            .handle_incoming(&peer, &packets[3], DATA_CHARACTERISTIC_UUID)
            .await
            .unwrap();
    }

    assert_eq!(peripheral.writes_on(CONTROL_CHARACTERISTIC_UUID).len(), 3);
    assert_eq!(
        events.recv().await,
        Some(FramingEvent::ReassemblyAbandoned {
            peer: peer.clone(),
            expected_sequence: 1,
            attempts: 3
        })
    );
    let snapshot = layer.reassembly_snapshot(&peer).await.unwrap();
    assert!(snapshot.buffered.is_empty());
    assert_eq!(snapshot.expected_sequence, 0);
}

#[tokio::test]
async fn test_retransmit_request_resends_from_sequence() {
    let (layer, _events, peripheral, peer) = setup(54);
    let payload = sample_payload(200);

    layer
        .send_data(&payload, &peer, DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    let original = peripheral.writes_on(DATA_CHARACTERISTIC_UUID);
    assert_eq!(original.len(), 4);
    peripheral.clear();

    layer
        .handle_incoming(&peer, &[RETRANSMIT_MARKER, 2], CONTROL_CHARACTERISTIC_UUID)
        .await
        .unwrap();

    let resent = peripheral.writes_on(DATA_CHARACTERISTIC_UUID);
    assert_eq!(resent, original[2..].to_vec());
    assert_eq!(layer.peer_stats(&peer).await.unwrap().fragments_resent, 2);
}

#[tokio::test]
async fn test_retransmit_request_without_transfer_is_rejected() {
    let (layer, _events, peripheral, peer) = setup(104);

    let result = layer
        .handle_incoming(&peer, &[RETRANSMIT_MARKER, 0], CONTROL_CHARACTERISTIC_UUID)
        .await;

    assert!(matches!(result, Err(BleError::NothingToResend { .. })));
    assert!(peripheral.writes().is_empty());
}

#[tokio::test]
async fn test_retransmit_marker_on_data_characteristic_is_a_message() {
    let (layer, mut events, peripheral, peer) = setup(104);

    layer
        .handle_incoming(&peer, &[RETRANSMIT_MARKER, 5], DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();

    assert_eq!(
        events.try_recv().ok(),
        Some(FramingEvent::DataReceived {
            peer: peer.clone(),
            data: vec![RETRANSMIT_MARKER, 5]
        })
    );
    assert!(peripheral.writes().is_empty());
}

#[tokio::test]
async fn test_short_send_replaces_retained_transfer() {
    let (layer, _events, peripheral, peer) = setup(104);

    let fragments = layer
        .send_data(&sample_payload(300), &peer, DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    assert_eq!(fragments, 3);
    layer
        .send_data(b"new", &peer, DATA_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    peripheral.clear();

    let result = layer
        .handle_incoming(&peer, &[RETRANSMIT_MARKER, 1], CONTROL_CHARACTERISTIC_UUID)
        .await;

    assert!(matches!(result, Err(BleError::NothingToResend { .. })));
    assert!(peripheral.writes().is_empty());
    assert_eq!(layer.peer_stats(&peer).await.unwrap().fragments_resent, 0);
}

#[tokio::test]
async fn test_oversized_payload_is_refused() {
    let (layer, _events, peripheral, peer) = setup(5);

    let result = layer
        .send_data(&sample_payload(257), &peer, DATA_CHARACTERISTIC_UUID)
        .await;

    assert!(matches!(result, Err(BleError::Framing(_))));
    assert!(peripheral.writes().is_empty());
}

#[tokio::test]
async fn test_write_failure_propagates() {
    let (layer, _events, peripheral, peer) = setup(104);
    peripheral.set_fail_writes(true);

    let result = layer
        .send_data(b"hello", &peer, DATA_CHARACTERISTIC_UUID)
        .await;
    assert!(matches!(result, Err(BleError::Transport(_))));
}

#[tokio::test]
async fn test_peers_reassemble_independently() {
    let (layer, mut events) = BleFramingLayer::new(FramingConfig::default());
    let layer = Arc::new(layer);
    let first = layer.connect_peer(MockPeripheral::shared("first", 24));
    let second = layer.connect_peer(MockPeripheral::shared("second", 24));

    let payload_a = sample_payload(90);
    let payload_b: Vec<u8> = sample_payload(90).into_iter().rev().collect();
    let packets_a = fragment(&payload_a, 20).unwrap();
    let packets_b = fragment(&payload_b, 20).unwrap();

    // interleave the two transfers
    for (a, b) in packets_a.iter().zip(packets_b.iter()) {
        let (ra, rb) = tokio::join!(
            layer.handle_incoming(&first, a, DATA_CHARACTERISTIC_UUID),
            layer.handle_incoming(&second, b, DATA_CHARACTERISTIC_UUID)
        );
        tokio_test::assert_ok!(ra);
        tokio_test::assert_ok!(rb);
    }

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 2);
    assert!(received.contains(&FramingEvent::DataReceived {
        peer: first,
        data: payload_a
    }));
    assert!(received.contains(&FramingEvent::DataReceived {
        peer: second,
        data: payload_b
    }));
}

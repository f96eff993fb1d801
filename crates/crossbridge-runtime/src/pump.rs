//! Forwards BLE framing events to the engines through the router

use std::sync::Arc;

use crossbridge_ble::FramingEvent;
use crossbridge_core::{Envelope, MessageType, SharedTimeSource, Timestamp};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::router::ChannelRouter;

/// Envelope an engine sees for one framing event
pub fn framing_event_envelope(event: &FramingEvent, timestamp: Timestamp) -> Envelope {
    match event {
        FramingEvent::DataReceived { peer, data } => Envelope::from_value(
            MessageType::DataReceived,
            json!({
                "peripheral": peer.as_str(),
                "data": hex::encode(data),
                "length": data.len(),
            }),
            timestamp,
        ),
        FramingEvent::ReassemblyAbandoned {
            peer,
            expected_sequence,
            attempts,
        } => Envelope::from_value(
            MessageType::Error,
            json!({
                "peripheral": peer.as_str(),
                "expectedSequence": expected_sequence,
                "attempts": attempts,
            }),
            timestamp,
        ),
    }
}

/// Route every framing event until the layer's sender is dropped
pub fn spawn_framing_pump(
    mut events: UnboundedReceiver<FramingEvent>,
    router: Arc<ChannelRouter>,
    time_source: SharedTimeSource,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let envelope = framing_event_envelope(&event, time_source.now());
            match router.route_by_type(&envelope) {
                Ok(delivered) => debug!(
                    "Routed {} to {} engine(s)",
                    envelope.message_type(),
                    delivered
                ),
                Err(e) => error!("Failed to route {}: {}", envelope.message_type(), e),
            }
        }
        debug!("Framing pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbridge_core::PeerId;

    #[test]
    fn test_received_data_is_hex_encoded() {
        let event = FramingEvent::DataReceived {
            peer: PeerId::new("AA:BB"),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let envelope = framing_event_envelope(&event, Timestamp::new(42));

        assert_eq!(envelope.message_type(), MessageType::DataReceived);
        assert_eq!(envelope.field("peripheral"), Some(&json!("AA:BB")));
        assert_eq!(envelope.field("data"), Some(&json!("deadbeef")));
        assert_eq!(envelope.field("length"), Some(&json!(4)));
        assert_eq!(envelope.timestamp(), Timestamp::new(42));
    }

    #[test]
    fn test_abandoned_reassembly_is_an_error() {
        let event = FramingEvent::ReassemblyAbandoned {
            peer: PeerId::new("AA:BB"),
            expected_sequence: 1,
            attempts: 3,
        };
        let envelope = framing_event_envelope(&event, Timestamp::new(42));

        assert_eq!(envelope.message_type(), MessageType::Error);
        assert_eq!(envelope.field("expectedSequence"), Some(&json!(1)));
        assert_eq!(envelope.field("attempts"), Some(&json!(3)));
    }
}

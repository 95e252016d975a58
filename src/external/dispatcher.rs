use async_channel::Receiver;
use serde_json::json;

use crate::entities::RideEvent;
use crate::external::DynNotifier;

/// Turns engine events into notifications until the channel closes.
pub async fn dispatch(events: Receiver<RideEvent>, notifier: DynNotifier) {
    while let Ok(event) = events.recv().await {
        deliver(&event, &notifier).await;
    }

    tracing::info!("event channel closed, dispatcher stopping");
}

pub async fn deliver(event: &RideEvent, notifier: &DynNotifier) {
    let payload = json!({
        "request_id": event.request_id,
        "driver_id": event.driver_id,
        "offer_id": event.offer_id,
        "price": event.price,
        "timestamp": event.timestamp,
    });

    for recipient in event.recipients.iter() {
        if let Err(err) = notifier
            .notify(*recipient, event.kind.name(), payload.clone())
            .await
        {
            tracing::warn!(
                "failed to notify {} of {}: {}",
                recipient,
                event.kind.name(),
                err
            );
        }
    }
}

#[test]
fn delivers_to_every_recipient() {
    use std::sync::Arc;

    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::entities::EventKind;
    use crate::external::memory::RecordingNotifier;

    let notifier = Arc::new(RecordingNotifier::default());
    let dyn_notifier: DynNotifier = notifier.clone();
    let (rider_id, driver_id) = (Uuid::new_v4(), Uuid::new_v4());

    let event = RideEvent::new(EventKind::RequestAssigned, Uuid::new_v4(), rider_id)
        .driver(driver_id)
        .price(1800.0)
        .notify(rider_id)
        .notify(driver_id);

    let (tx, rx) = async_channel::unbounded();
    block_on(tx.send(event)).unwrap();
    drop(tx);

    block_on(dispatch(rx, dyn_notifier));

    let to_rider = block_on(notifier.sent_to(rider_id));
    assert_eq!(to_rider.len(), 1);
    assert_eq!(to_rider[0].event_type, "request_assigned");
    assert_eq!(to_rider[0].payload["price"], 1800.0);
    assert_eq!(block_on(notifier.sent_to(driver_id)).len(), 1);
}

#[test]
fn failures_do_not_stop_dispatch() {
    use std::sync::Arc;

    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::entities::EventKind;
    use crate::external::memory::RecordingNotifier;

    let notifier: DynNotifier = Arc::new(RecordingNotifier::failing());
    let (tx, rx) = async_channel::unbounded();

    for _ in 0..3 {
        let rider_id = Uuid::new_v4();
        let event = RideEvent::new(EventKind::Created, Uuid::new_v4(), rider_id).notify(rider_id);
        block_on(tx.send(event)).unwrap();
    }
    drop(tx);

    block_on(dispatch(rx.clone(), notifier));

    assert!(rx.is_empty());
}

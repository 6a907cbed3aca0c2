use golang_build_events::{Envelope, EventBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Subscribe / Publish Tests
// ============================================================================

#[test]
fn test_publish_without_listeners() {
    let bus: EventBus<u32> = EventBus::new();
    assert_eq!(bus.publish("Golang Build", "build_complete", 7), 0);
}

#[test]
fn test_publish_reaches_channel_listener() {
    let bus: EventBus<String> = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();

    bus.subscribe("Golang Build", move |envelope: &Envelope<String>| {
        assert_eq!(envelope.channel, "Golang Build");
        assert_eq!(envelope.event, "build_complete");
        assert_eq!(envelope.payload, "success");
        seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    let notified = bus.publish("Golang Build", "build_complete", "success".to_string());
    assert_eq!(notified, 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_publish_is_scoped_to_channel() {
    let bus: EventBus<u8> = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    bus.subscribe("Other Package", move |_| {
        seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    bus.publish("Golang Build", "build_complete", 1);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_multiple_listeners_all_notified() {
    let bus: EventBus<u8> = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let seen_clone = seen.clone();
        bus.subscribe("Golang Build", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(bus.listener_count("Golang Build"), 3);
    assert_eq!(bus.publish("Golang Build", "build_complete", 0), 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Unsubscribe Tests
// ============================================================================

#[test]
fn test_unsubscribe_stops_delivery() {
    let bus: EventBus<u8> = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    let id = bus.subscribe("Golang Build", move |_| {
        seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert!(bus.unsubscribe("Golang Build", id));
    bus.publish("Golang Build", "build_complete", 0);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert_eq!(bus.listener_count("Golang Build"), 0);
}

#[test]
fn test_unsubscribe_twice_reports_false() {
    let bus: EventBus<u8> = EventBus::new();
    let id = bus.subscribe("Golang Build", |_| {});
    assert!(bus.unsubscribe("Golang Build", id));
    assert!(!bus.unsubscribe("Golang Build", id));
}

#[test]
fn test_unsubscribe_wrong_channel() {
    let bus: EventBus<u8> = EventBus::new();
    let id = bus.subscribe("Golang Build", |_| {});
    assert!(!bus.unsubscribe("Other Package", id));
    assert_eq!(bus.listener_count("Golang Build"), 1);
}

#[test]
fn test_listener_may_unsubscribe_itself() {
    let bus: Arc<EventBus<u8>> = Arc::new(EventBus::new());
    let slot = Arc::new(slot::Slot::default());

    let bus_clone = bus.clone();
    let slot_clone = slot.clone();
    let id = bus.subscribe("Golang Build", move |_| {
        if let Some(id) = slot_clone.take() {
            bus_clone.unsubscribe("Golang Build", id);
        }
    });
    slot.put(id);

    assert_eq!(bus.publish("Golang Build", "build_complete", 1), 1);
    assert_eq!(bus.publish("Golang Build", "build_complete", 2), 0);
}

mod slot {
    use golang_build_events::ListenerId;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Slot(Mutex<Option<ListenerId>>);

    impl Slot {
        pub fn put(&self, id: ListenerId) {
            *self.0.lock().unwrap() = Some(id);
        }

        pub fn take(&self) -> Option<ListenerId> {
            self.0.lock().unwrap().take()
        }
    }
}

// ============================================================================
// Async listen() Tests
// ============================================================================

#[tokio::test]
async fn test_listen_forwards_envelopes() {
    let bus: EventBus<String> = EventBus::new();
    let (_id, mut rx) = bus.listen("Golang Build");

    bus.publish("Golang Build", "build_complete", "error".to_string());

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.event, "build_complete");
    assert_eq!(envelope.payload, "error");
}

#[tokio::test]
async fn test_listen_closes_after_unsubscribe() {
    let bus: EventBus<u8> = EventBus::new();
    let (id, mut rx) = bus.listen("Golang Build");
    assert!(bus.unsubscribe("Golang Build", id));
    assert!(rx.recv().await.is_none());
}

// ============================================================================
// Serialization Tests
// ============================================================================

#[test]
fn test_envelope_serialization() {
    let envelope = Envelope {
        channel: "Golang Build".to_string(),
        event: "build_complete".to_string(),
        payload: 42u32,
    };
    let json = serde_json::to_string(&envelope).unwrap();
    let deserialized: Envelope<u32> = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, envelope);
}

#[test]
fn test_event_bus_debug() {
    let bus: EventBus<u8> = EventBus::new();
    bus.subscribe("Golang Build", |_| {});
    let debug = format!("{:?}", bus);
    assert!(debug.contains("EventBus"));
    assert!(debug.contains("Golang Build"));
}

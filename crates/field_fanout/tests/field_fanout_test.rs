use async_nats::HeaderMap;
use bytes::Bytes;
use common::domain::{RoutedMessage, FEATURE_ID_KEY, PROPERTY_KEY, THING_ID_KEY};
use common::nats::{layered_publisher, ConsumeRequest, ConsumeResponse, MockJetStreamPublisher};
use field_fanout::domain::FieldFanoutTransformer;
use field_fanout::nats::{FanoutService, NatsRoutedMessageProducer};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Raw payload in, NATS publishes out, through the real producer and layers.
#[tokio::test]
async fn test_payload_is_split_into_routed_publishes() {
    let captured: Arc<Mutex<Vec<(String, HeaderMap, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);

    let mut jetstream = MockJetStreamPublisher::new();
    jetstream
        .expect_publish_with_headers()
        .times(2)
        .returning(move |subject, headers, payload| {
            sink.lock().unwrap().push((subject, headers, payload));
            Ok(())
        });

    let producer = NatsRoutedMessageProducer::new(layered_publisher(
        Arc::new(jetstream),
        "field_fanout",
    ));
    let service = FanoutService::new(
        Arc::new(FieldFanoutTransformer::new(Arc::new(producer))),
        "thing_routed.test:test",
    );

    let mut headers = HeaderMap::new();
    headers.insert("thingId", "test:test");
    headers.insert(
        "propertyFeatureMapping",
        "myValue=feature1;mySecondValue=feature2",
    );
    let request = ConsumeRequest::new(
        "thing_raw.mqtt-test:test-0a1b2c3d4e5f-source",
        Bytes::from_static(br#"{"myValue":12,"mySecondValue":"anyValue"}"#),
        Some(headers),
    );

    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response, ConsumeResponse::Ack);

    let mut routed: Vec<RoutedMessage> = captured
        .lock()
        .unwrap()
        .iter()
        .map(|(subject, headers, payload)| {
            assert_eq!(subject, "thing_routed.test:test");
            let metadata = common::nats::metadata_from_headers(
                Some(headers),
                &[THING_ID_KEY, FEATURE_ID_KEY, PROPERTY_KEY, "nullValue"],
            );
            RoutedMessage::from_parts(&metadata, payload).unwrap()
        })
        .collect();
    routed.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));

    assert_eq!(routed.len(), 2);
    assert_eq!(routed[0].feature_id, "feature1");
    assert_eq!(routed[0].property, "myValue");
    assert_eq!(routed[0].raw_value.as_deref(), Some("12"));
    assert_eq!(routed[1].feature_id, "feature2");
    assert_eq!(routed[1].property, "mySecondValue");
    assert_eq!(routed[1].raw_value.as_deref(), Some("anyValue"));
}

mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use card_capture::{
    ApiErrorKind, CaptureOptions, CardData, CardTechnology, CardType, Feedback, FeedbackMessage,
    Purpose, capture, config::Config, messages::MethodType,
};
use common::{SimulatedService, async_notification, device_notification, reply};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn authentication_result() -> serde_json::Value {
    json!({
        "purpose": "auth",
        "cardType": "CID",
        "tech": "iClass Legacy",
        "cardData": { "UID": "BCxWcjoUkAAAAAAA", "OTP": "837167" }
    })
}

#[tokio::test(start_paused = true)]
async fn test_capture_with_progress_feedback() {
    let service = SimulatedService::new(vec![
        (
            Duration::from_millis(100),
            device_notification(&json!({"Event": 1, "Reader": "HID OMNIKEY 5022"})),
        ),
        (
            Duration::from_millis(100),
            async_notification(&json!({"Event": 2, "Reader": "HID OMNIKEY 5022"})),
        ),
        (
            Duration::from_millis(300),
            async_notification(&json!({"Event": 4})),
        ),
        (
            Duration::from_millis(300),
            reply(0, Some(&authentication_result())),
        ),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = CaptureOptions::new()
        .with_card_type(CardType::ContactlessId)
        .with_feedback(move |f: &Feedback| {
            sink.lock().unwrap().push(f.message.clone().unwrap_or_default())
        });

    let result = capture(&service, Purpose::Auth, options).await.unwrap();

    assert_eq!(result.card_type, CardType::ContactlessId);
    assert_eq!(result.technology, Some(CardTechnology::IClassLegacy));
    let CardData::Authentication(data) = result.card_data else {
        panic!("expected authentication data");
    };
    assert_eq!(data.otp.as_deref(), Some("837167"));
    assert_eq!(*seen.lock().unwrap(), vec!["Starting", "UseCard", "UseSingleCard"]);
    assert_eq!(service.commands(), vec![MethodType::GetCardDataEx]);
    assert_eq!(service.disconnects(), 1);
}

#[tokio::test]
async fn test_unrecognized_notifications_reach_feedback_verbatim() {
    let status = json!({"Reader": "R1", "Status": "Waiting"});
    let completion = json!({"Event": 0, "Reader": "R1"});
    let service = SimulatedService::new(vec![
        (Duration::ZERO, async_notification(&status)),
        (Duration::ZERO, async_notification(&completion)),
        (Duration::ZERO, reply(0, Some(&authentication_result()))),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = CaptureOptions::new()
        .with_feedback(move |f: &Feedback| sink.lock().unwrap().push(f.clone()));

    capture(&service, Purpose::Auth, options).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is(FeedbackMessage::Starting));
    assert_eq!(seen[1].message, None);
    assert_eq!(seen[1].payload.as_ref(), Some(&status));
    assert_eq!(seen[2].message, None);
    assert_eq!(seen[2].payload.as_ref(), Some(&completion));
}

#[tokio::test]
async fn test_new_card_type_without_technology() {
    let service = SimulatedService::new(vec![(
        Duration::ZERO,
        reply(0, Some(&json!({"cardType": "PIV", "cardData": {"UID": "BCxW"}}))),
    )]);

    let result = capture(&service, Purpose::Auth, CaptureOptions::default())
        .await
        .unwrap();

    assert_eq!(result.card_type, CardType::Other("PIV".to_string()));
    assert_eq!(result.technology, None);
}

#[tokio::test(start_paused = true)]
async fn test_traffic_keeps_session_alive() {
    // each gap is shorter than the timeout, the total is longer
    let service = SimulatedService::new(vec![
        (
            Duration::from_millis(800),
            async_notification(&json!({"Event": 2})),
        ),
        (
            Duration::from_millis(800),
            device_notification(&json!({"Event": 3})),
        ),
        (
            Duration::from_millis(800),
            async_notification(&json!({"Event": 2})),
        ),
        (
            Duration::from_millis(800),
            reply(0, Some(&authentication_result())),
        ),
    ]);
    let options = CaptureOptions::new().with_inactivity_timeout(Duration::from_secs(1));

    let result = capture(&service, Purpose::Auth, options).await;

    assert!(result.is_ok());
    assert_eq!(service.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_from_config() {
    let mut overrides = HashMap::new();
    overrides.insert("capture.inactivity_timeout_secs".to_string(), "1".to_string());
    let config = Config::load_with_sources(Some(overrides)).unwrap();
    config.capture.validate().unwrap();

    let service = SimulatedService::new(vec![(
        Duration::from_secs(5),
        reply(0, Some(&authentication_result())),
    )]);

    let err = capture(&service, Purpose::Auth, CaptureOptions::from_settings(&config.capture))
        .await
        .unwrap_err();

    assert!(err.is_kind(&ApiErrorKind::Timeout));
    assert_eq!(service.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_card() {
    let service = SimulatedService::new(vec![(
        Duration::from_millis(100),
        async_notification(&json!({"Event": 2})),
    )]);
    let token = CancellationToken::new();
    let options = CaptureOptions::new().with_cancellation_token(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
    });
    let err = capture(&service, Purpose::Enroll, options).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_kind(&ApiErrorKind::Aborted));
    assert_eq!(
        service.commands(),
        vec![MethodType::GetCardDataEx, MethodType::GetCardCancel]
    );
    assert_eq!(service.disconnects(), 1);
}

#[tokio::test]
async fn test_failure_reply() {
    let service = SimulatedService::new(vec![(Duration::ZERO, reply(0x8010_0069, None))]);

    let err = capture(&service, Purpose::Enroll, CaptureOptions::default())
        .await
        .unwrap_err();

    let api = err.api().expect("expected an API error");
    assert_eq!(api.kind, ApiErrorKind::BadResponse);
    assert_eq!(api.code, Some(0x8010_0069));
    assert_eq!(service.disconnects(), 1);
}

#[tokio::test]
async fn test_concurrent_captures_are_independent() {
    let first = SimulatedService::new(vec![(
        Duration::from_millis(20),
        reply(0, Some(&authentication_result())),
    )]);
    let second =
        SimulatedService::new(vec![(Duration::from_millis(10), reply(0x8000_4005, None))]);

    let (ok, failed) = tokio::join!(
        capture(&first, Purpose::Auth, CaptureOptions::default()),
        capture(&second, Purpose::Auth, CaptureOptions::default()),
    );

    assert!(ok.is_ok());
    assert!(failed.is_err());
    assert_eq!(first.disconnects(), 1);
    assert_eq!(second.disconnects(), 1);
}

//! Tests for the HTTP gadget family against a stub device server

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use neohub_core::{CommandEvent, TelemetryMessage};
use neohub_devices::{AdapterError, Device, DeviceFamily, GadgetReadings, HttpGadgetFamily};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Stub {
    received: Arc<Mutex<Vec<Value>>>,
}

async fn sys() -> Json<Value> {
    Json(json!({"uuid": "gadget-42", "model": "SmartPlug", "fw_version": "1.4.2"}))
}

async fn status() -> Json<Value> {
    Json(json!({"power": 12.5, "relay": true, "mode": "auto", "nested": {"x": 1}}))
}

async fn set(State(stub): State<Stub>, Json(body): Json<Value>) -> &'static str {
    let accepted = body.get("mode").is_none();
    stub.received.lock().push(body);
    if accepted {
        r#"{"result":"success"}"#
    } else {
        r#"{"result":"error"}"#
    }
}

async fn serve() -> (String, Stub) {
    let stub = Stub::default();
    let app = Router::new()
        .route("/sys", get(sys))
        .route("/status", get(status))
        .route("/set", post(set))
        .with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, stub)
}

fn command(name: &str, index: Option<char>, argument: &str) -> CommandEvent {
    CommandEvent {
        command_id: 4,
        user_is_watching: false,
        no_more_commands: false,
        device_id: "gadget-42".into(),
        command_type: "set".into(),
        command_name: name.into(),
        index,
        argument: Some(argument.into()),
    }
}

#[tokio::test]
async fn test_capture_details_confirms_gadget() {
    let (addr, _) = serve().await;
    let family = HttpGadgetFamily::default();

    let device = family.capture_details(&addr).await.unwrap().unwrap();
    assert_eq!(device.ip, addr);
    assert_eq!(device.uuid, "gadget-42");
    assert_eq!(device.model, "SmartPlug");
    assert_eq!(device.firmware_version, "1.4.2");
}

#[tokio::test]
async fn test_measurements_are_captured_and_written() {
    let (addr, _) = serve().await;
    let family = HttpGadgetFamily::default();
    let mut device: Device<GadgetReadings> = Device::new(addr).with_uuid("gadget-42");

    family.capture_measurements(&mut device).await.unwrap();
    assert_eq!(device.payload.values.len(), 3);
    assert_eq!(device.payload.values["relay"], "1");

    let mut msg = TelemetryMessage::new(4096);
    assert!(family.write_measurements(&device, &mut msg) > 0);
    assert_eq!(msg.elements(), 3);
    assert!(msg.as_str().contains(r#"<param name="power">12.5</param>"#));
    assert!(msg.as_str().contains(r#"<param name="mode">auto</param>"#));
}

#[tokio::test]
async fn test_apply_command_posts_indexed_setting() {
    let (addr, stub) = serve().await;
    let family = HttpGadgetFamily::default();
    let device: Device<GadgetReadings> = Device::new(addr).with_uuid("gadget-42");

    family
        .apply_command(&device, &command("outlet", Some('1'), "0"))
        .await
        .unwrap();
    assert_eq!(stub.received.lock().as_slice(), &[json!({"outlet1": 0})]);
}

#[tokio::test]
async fn test_rejected_setting_is_execution_error() {
    let (addr, _) = serve().await;
    let family = HttpGadgetFamily::default();
    let device: Device<GadgetReadings> = Device::new(addr).with_uuid("gadget-42");

    let err = family
        .apply_command(&device, &command("mode", None, "heat"))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Execution(_)));
}

#[tokio::test]
async fn test_unreachable_gadget_is_connection_error() {
    // bind then drop to get a port nobody listens on
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let family = HttpGadgetFamily::new("3".into(), Duration::from_secs(1));

    let err = family.capture_details(&addr).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Connection(_) | AdapterError::Timeout(_)
    ));
}

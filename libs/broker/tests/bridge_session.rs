//! End-to-end broker sessions over an in-memory duplex stream: the test
//! plays the control process, the broker and modules run as they would in
//! the bridge daemon.

use std::time::Duration;

use broker::{Broker, BrokerError, Module};
use protocol::{Message, MessageType};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

type ControlReader = tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>;
type ControlWriter = WriteHalf<DuplexStream>;

/// Wire the broker to one end of a duplex pipe and hand back the control
/// process's reader/writer for the other end.
fn connect(broker: &Broker) -> (ControlReader, ControlWriter) {
    let (control, bridge) = tokio::io::duplex(4096);
    broker.start(bridge).expect("broker start");
    let (read_half, write_half) = tokio::io::split(control);
    (BufReader::new(read_half).lines(), write_half)
}

async fn send_command(
    writer: &mut ControlWriter,
    module: &str,
    action: &str,
    data: serde_json::Value,
    msg_id: &str,
) {
    let frame = format!(
        "{}\n",
        json!({
            "type": "CMD",
            "module": module,
            "action": action,
            "data": data,
            "msg_id": msg_id,
        })
    );
    writer.write_all(frame.as_bytes()).await.unwrap();
}

async fn next_frame(reader: &mut ControlReader, deadline: Duration) -> Message {
    let line = tokio::time::timeout(deadline, reader.next_line())
        .await
        .expect("frame within deadline")
        .expect("stream healthy")
        .expect("stream open");
    Message::decode(&line).expect("valid frame from broker")
}

#[tokio::test]
async fn command_round_trips_within_deadline() {
    let broker = Broker::new();
    let module = Module::new("deauth", broker.clone());
    module.register_handler("get_status", |_msg| async {
        Ok(Some(json!({"attacking": false, "interface": "wlan0"})))
    });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    send_command(&mut writer, "deauth", "get_status", json!(null), "abc12345").await;

    let response = next_frame(&mut reader, Duration::from_millis(1100)).await;
    assert_eq!(response.msg_type, MessageType::Response);
    assert_eq!(response.module, "deauth");
    assert_eq!(response.action, "get_status");
    assert_eq!(response.msg_id, "abc12345");
    assert_eq!(
        response.data,
        Some(json!({"attacking": false, "interface": "wlan0"}))
    );
}

#[tokio::test]
async fn per_module_order_is_preserved() {
    let broker = Broker::new();
    let module = Module::new("probe", broker.clone());
    module.register_handler("echo", |msg| async move { Ok(msg.data) });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    for n in 0..5 {
        send_command(&mut writer, "probe", "echo", json!(n), &format!("id{n}")).await;
    }

    for n in 0..5 {
        let response = next_frame(&mut reader, Duration::from_secs(1)).await;
        assert_eq!(response.msg_id, format!("id{n}"));
        assert_eq!(response.data, Some(json!(n)));
    }
}

#[tokio::test]
async fn slow_module_does_not_delay_its_neighbor() {
    let broker = Broker::new();

    let slow = Module::new("slow", broker.clone());
    slow.register_handler("work", |_msg| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Some(json!("slow done")))
    });
    slow.start().await;

    let fast = Module::new("fast", broker.clone());
    fast.register_handler("work", |_msg| async { Ok(Some(json!("fast done"))) });
    fast.start().await;

    let (mut reader, mut writer) = connect(&broker);
    send_command(&mut writer, "slow", "work", json!(null), "slow1").await;
    send_command(&mut writer, "fast", "work", json!(null), "fast1").await;

    let first = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(first.module, "fast", "fast module answered while slow was busy");
    assert_eq!(first.msg_id, "fast1");

    let second = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(second.module, "slow");
    assert_eq!(second.msg_id, "slow1");
}

#[tokio::test]
async fn unknown_module_bounces_with_original_id() {
    let broker = Broker::new();
    let module = Module::new("known", broker.clone());
    module.register_handler("ping", |_msg| async { Ok(Some(json!("pong"))) });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    send_command(&mut writer, "ghost", "run", json!(null), "orig1").await;

    let err = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(err.msg_type, MessageType::Error);
    assert_eq!(err.action, "unknown_module");
    assert_eq!(err.msg_id, "orig1");

    // Broker is still alive and routing.
    send_command(&mut writer, "known", "ping", json!(null), "after1").await;
    let response = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(response.msg_id, "after1");
    assert!(broker.is_running());
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_session_continues() {
    let broker = Broker::new();
    let module = Module::new("probe", broker.clone());
    module.register_handler("ping", |_msg| async { Ok(Some(json!("pong"))) });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    writer.write_all(b"this is not json\n").await.unwrap();
    writer
        .write_all(b"{\"type\":\"BOGUS\",\"module\":\"probe\",\"action\":\"ping\"}\n")
        .await
        .unwrap();
    send_command(&mut writer, "probe", "ping", json!(null), "valid1").await;

    // The first frame back is the valid command's response: no NACKs were
    // produced for the garbage.
    let response = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(response.msg_type, MessageType::Response);
    assert_eq!(response.msg_id, "valid1");
}

#[tokio::test]
async fn handler_failure_crosses_the_wire_as_error() {
    let broker = Broker::new();
    let module = Module::new("dns", broker.clone());
    module.register_handler("spoof", |_msg| async {
        Err(broker::HandlerError::failed("no target domain"))
    });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    send_command(&mut writer, "dns", "spoof", json!({}), "fail1").await;

    let err = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(err.msg_type, MessageType::Error);
    assert_eq!(err.msg_id, "fail1");
    assert_eq!(err.data, Some(json!({"error": "no target domain"})));
}

#[tokio::test]
async fn worker_pool_exhaustion_is_reported_not_queued() {
    let broker = Broker::new();
    let module = Module::new("scanner", broker.clone()).worker_limit(1);
    let ctx = module.context();
    module.register_handler("scan", move |_msg| {
        let ctx = ctx.clone();
        async move {
            ctx.spawn_worker({
                let ctx = ctx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    ctx.emit_event("scan_complete", Some(json!({"hosts": 0})));
                }
            })?;
            Ok(Some(json!({"status": "started"})))
        }
    });
    module.start().await;

    let (mut reader, mut writer) = connect(&broker);
    send_command(&mut writer, "scanner", "scan", json!(null), "scan1").await;
    send_command(&mut writer, "scanner", "scan", json!(null), "scan2").await;

    let ack = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(ack.msg_type, MessageType::Response);
    assert_eq!(ack.msg_id, "scan1");

    let busy = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(busy.msg_type, MessageType::Error);
    assert_eq!(busy.msg_id, "scan2");
    assert_eq!(busy.data, Some(json!({"error": "worker pool exhausted"})));

    // The first scan still completes and reports through an event.
    let event = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(event.msg_type, MessageType::Event);
    assert_eq!(event.action, "scan_complete");
    assert_ne!(event.msg_id, "scan1");
}

#[tokio::test]
async fn peer_close_terminates_the_session() {
    let broker = Broker::new();
    let module = Module::new("probe", broker.clone());
    module.start().await;

    let (reader, writer) = connect(&broker);
    assert!(broker.is_running());

    drop(reader);
    drop(writer);

    // The receive loop sees the empty read and stops the broker.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!broker.is_running());
}

#[tokio::test]
async fn starting_twice_is_a_usage_error() {
    let broker = Broker::new();
    let (_control_a, bridge_a) = tokio::io::duplex(1024);
    let (_control_b, bridge_b) = tokio::io::duplex(1024);

    broker.start(bridge_a).unwrap();
    let second = broker.start(bridge_b);
    assert!(matches!(second, Err(BrokerError::AlreadyStarted)));
}

#[tokio::test]
async fn events_flow_without_a_prompting_command() {
    let broker = Broker::new();
    let module = Module::new("monitor", broker.clone());
    module.start().await;

    let (mut reader, _writer) = connect(&broker);
    module
        .context()
        .emit_event("client_joined", Some(json!({"mac": "aa:bb:cc:dd:ee:ff"})));

    let event = next_frame(&mut reader, Duration::from_secs(1)).await;
    assert_eq!(event.msg_type, MessageType::Event);
    assert_eq!(event.module, "monitor");
    assert_eq!(event.action, "client_joined");
    assert_eq!(event.msg_id.len(), 8);
}

//! Control session tests against an in-process MQTT-over-WebSocket broker
//!
//! The broker below speaks just enough MQTT 3.1.1 for one session: it
//! accepts CONNECT, acknowledges SUBSCRIBE and QoS 1 PUBLISH, answers
//! PINGREQ and echoes every shadow update on the accepted topic with a
//! `reported` state, the way the vendor backend does.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use airlink::bridge::{Bridge, ConnectionPlan};
use airlink::cloud::DeviceIdentity;
use airlink::config::MqttConfig;
use airlink::control::{reported_power, ControlSurface, MqttConnectionGrant, SessionEvent};

const THING: &str = "da-1234abcd";

/// What the broker saw during one session.
#[derive(Debug, Default)]
struct BrokerLog {
    upgrade_headers: HeaderMap,
    client_id: String,
    subscriptions: Vec<String>,
    publishes: Vec<(String, Vec<u8>)>,
    disconnected: bool,
}

// ---------------------------------------------------------------------------
// Minimal broker
// ---------------------------------------------------------------------------

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Splits one complete packet off the front of `buf`.
fn take_packet(buf: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
    let mut len = 0usize;
    let mut shift = 0;
    let mut pos = 1;
    loop {
        let byte = *buf.get(pos)?;
        len |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if buf.len() < pos + len {
        return None;
    }
    let header = buf[0];
    let body = buf[pos..pos + len].to_vec();
    buf.drain(..pos + len);
    Some((header, body))
}

fn read_string(body: &[u8], at: usize) -> (String, usize) {
    let len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
    let value = String::from_utf8(body[at + 2..at + 2 + len].to_vec()).unwrap();
    (value, at + 2 + len)
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    encode_remaining_length(body.len(), &mut packet);
    packet.extend_from_slice(&body);
    packet
}

fn spawn_broker(listener: TcpListener) -> JoinHandle<BrokerLog> {
    tokio::spawn(async move {
        let mut log = BrokerLog::default();
        let (stream, _) = listener.accept().await.unwrap();

        let mut seen = HeaderMap::new();
        let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            seen = request.headers().clone();
            response
                .headers_mut()
                .insert("sec-websocket-protocol", HeaderValue::from_static("mqtt"));
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        log.upgrade_headers = seen;

        let mut buf = Vec::new();
        'session: while let Some(Ok(message)) = ws.next().await {
            let Message::Binary(data) = message else {
                continue;
            };
            buf.extend_from_slice(&data);

            while let Some((header, body)) = take_packet(&mut buf) {
                let mut replies = Vec::new();
                match header >> 4 {
                    // CONNECT: protocol name, level, flags, keep alive, client id
                    1 => {
                        let (_, at) = read_string(&body, 0);
                        let (client_id, _) = read_string(&body, at + 4);
                        log.client_id = client_id;
                        replies.push(vec![0x20, 0x02, 0x00, 0x00]);
                    }
                    // SUBSCRIBE
                    8 => {
                        let (topic, _) = read_string(&body, 2);
                        log.subscriptions.push(topic);
                        replies.push(vec![0x90, 0x03, body[0], body[1], 0x01]);
                    }
                    // PUBLISH
                    3 => {
                        let qos = (header >> 1) & 0x03;
                        let (topic, mut at) = read_string(&body, 0);
                        if qos > 0 {
                            replies.push(vec![0x40, 0x02, body[at], body[at + 1]]);
                            at += 2;
                        }
                        let payload = body[at..].to_vec();

                        if topic.ends_with("/shadow/update") {
                            let desired: serde_json::Value =
                                serde_json::from_slice(&payload).unwrap();
                            let echo = serde_json::json!({
                                "state": {
                                    "desired": desired["state"]["desired"],
                                    "reported": desired["state"]["desired"],
                                },
                                "version": 1,
                            });
                            replies.push(publish_packet(
                                &format!("{topic}/accepted"),
                                echo.to_string().as_bytes(),
                            ));
                        }
                        log.publishes.push((topic, payload));
                    }
                    // PINGREQ
                    12 => replies.push(vec![0xd0, 0x00]),
                    // DISCONNECT
                    14 => {
                        log.disconnected = true;
                        break 'session;
                    }
                    _ => {}
                }

                for reply in replies {
                    if ws.send(Message::Binary(reply)).await.is_err() {
                        break 'session;
                    }
                }
            }
        }
        log
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

async fn local_broker() -> (MqttConfig, JoinHandle<BrokerLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = MqttConfig {
        url: format!("ws://127.0.0.1:{port}/mqtt"),
        connect_timeout_seconds: 10,
        reconnect_delay_seconds: 1,
        ..MqttConfig::default()
    };
    (config, spawn_broker(listener))
}

fn plan() -> ConnectionPlan {
    ConnectionPlan {
        device: DeviceIdentity {
            thing_name: THING.to_string(),
            friendly_name: "Office".to_string(),
            device_id: "dev-7".to_string(),
        },
        grant: MqttConnectionGrant::mint("acct-9", "sig-1", "tok-1"),
    }
}

#[tokio::test]
async fn test_bridge_session_round_trip_through_broker() {
    let (config, broker) = local_broker().await;
    let plan = plan();
    let client_id = plan.grant.client_id.clone();

    let mut bridge = Bridge::connect(plan, &config).await.unwrap();
    let mut events = bridge.take_events();

    bridge.controller().power_on().await.unwrap();

    let (topic, payload) = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let SessionEvent::Message { topic, payload } = events.recv().await.unwrap() {
                return (topic, payload);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(topic, format!("$aws/things/{THING}/shadow/update/accepted"));
    assert_eq!(reported_power(&payload), Some(true));

    bridge.shutdown().await;
    let log = tokio::time::timeout(Duration::from_secs(10), broker)
        .await
        .unwrap()
        .unwrap();

    let header = |name: &str| {
        log.upgrade_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(header("token-header").as_deref(), Some("Bearer tok-1"));
    assert_eq!(
        header("x-amz-customauthorizer-signature").as_deref(),
        Some("sig-1")
    );
    assert_eq!(
        header("x-amz-customauthorizer-name").as_deref(),
        Some("CustomAuthorizer")
    );
    assert_eq!(header("tenant").as_deref(), Some("da"));

    assert_eq!(log.client_id, client_id);
    assert_eq!(
        log.subscriptions,
        vec![format!("$aws/things/{THING}/shadow/update/accepted")]
    );
    assert_eq!(log.publishes.len(), 1);
    assert_eq!(log.publishes[0].0, format!("$aws/things/{THING}/shadow/update"));
    assert_eq!(
        String::from_utf8(log.publishes[0].1.clone()).unwrap(),
        r#"{"state":{"desired":{"powerOn":true}}}"#
    );
    assert!(log.disconnected);
}

#[tokio::test]
async fn test_commands_after_shutdown_are_refused() {
    let (config, broker) = local_broker().await;

    let bridge = Bridge::connect(plan(), &config).await.unwrap();
    bridge.shutdown().await;

    let err = bridge.controller().power_off().await.unwrap_err();
    assert!(format!("{err:#}").contains("not connected"));

    let log = tokio::time::timeout(Duration::from_secs(10), broker)
        .await
        .unwrap()
        .unwrap();
    assert!(log.publishes.is_empty());
}

//! End-to-end tests: a real switch, a real skill server, and an agent-side
//! publisher/subscriber pair exchanging envelopes over TCP.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tempfile::TempDir;
use tokio::time::timeout;
use uuid::Uuid;

use skillscale_bus::{Envelope, Publisher, Subscriber};
use skillscale_protocol::{ResponseStatus, SkillResponse};
use skillscale_server::{ServerConfig, ServerHandle, SkillServer};
use skillscale_switch::{Switch, SwitchConfig, SwitchHandle};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn write_skill(dir: &Path, name: &str, description: &str, script: &str) {
    let skill_dir = dir.join(name);
    std::fs::create_dir_all(skill_dir.join("scripts")).unwrap();
    std::fs::write(
        skill_dir.join("SKILL.md"),
        format!("---\nname: {name}\ndescription: {description}\n---\nInstructions.\n"),
    )
    .unwrap();
    std::fs::write(skill_dir.join("scripts/run.sh"), script).unwrap();
}

/// A skills directory with an echo skill and a deliberately slow skill.
fn demo_skills_dir() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(
        tmp.path(),
        "echo",
        "Echoes its input back verbatim",
        "#!/bin/bash\ncat\n",
    );
    write_skill(
        tmp.path(),
        "slow",
        "Sleeps long enough to trip any reasonable timeout",
        "#!/bin/bash\nsleep 5\n",
    );
    tmp
}

async fn start_switch() -> SwitchHandle {
    let config = SwitchConfig {
        xsub_bind: "127.0.0.1:0".into(),
        xpub_bind: "127.0.0.1:0".into(),
        metrics_port: 0,
        hwm: 1024,
    };
    Switch::bind(config).await.expect("switch should bind")
}

async fn start_server(
    switch: &SwitchHandle,
    topic: &str,
    skills_dir: &Path,
    timeout_ms: u64,
) -> ServerHandle {
    let config = ServerConfig::parse_from([
        "skillscale-server",
        "--topic",
        topic,
        "--skills-dir",
        &skills_dir.display().to_string(),
        "--proxy-xpub",
        &switch.xpub_addr().to_string(),
        "--proxy-xsub",
        &switch.xsub_addr().to_string(),
        "--timeout",
        &timeout_ms.to_string(),
        "--settle-ms",
        "100",
    ]);
    SkillServer::start(config).await.expect("server should start")
}

async fn recv_response(replies: &mut Subscriber) -> (Bytes, SkillResponse) {
    let msg = timeout(RECV_TIMEOUT, replies.recv())
        .await
        .expect("response should arrive in time")
        .expect("reply connection open");
    let envelope = Envelope::from_message(msg).expect("two-frame envelope");
    let response = SkillResponse::from_payload(&envelope.payload).expect("valid response payload");
    (envelope.topic, response)
}

#[tokio::test]
async fn explicit_skill_echo_round_trip() {
    let switch = start_switch().await;
    let skills = demo_skills_dir();
    let server = start_server(&switch, "TOPIC_DEMO", skills.path(), 30_000).await;

    let request_id = "r1";
    let reply_to = format!("AGENT_{}", Uuid::now_v7().simple());
    let payload = serde_json::json!({
        "request_id": request_id,
        "reply_to": reply_to,
        "intent": r#"{"skill":"echo","data":"hello"}"#,
    })
    .to_string();
    let (_, mut replies) =
        send_request_with_reply(&switch, "TOPIC_DEMO", &reply_to, payload).await;

    let (topic, response) = recv_response(&mut replies).await;
    assert_eq!(&topic[..], reply_to.as_bytes());
    assert_eq!(response.request_id, request_id);
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.content, "hello");
    assert_eq!(response.error, "");

    // Exactly one response per request.
    let extra = timeout(Duration::from_millis(300), replies.recv()).await;
    assert!(extra.is_err(), "received a duplicate response");

    server.shutdown();
    server.join().await;
    switch.shutdown();
    switch.join().await;
}

#[tokio::test]
async fn unmatched_task_gets_error_response() {
    let switch = start_switch().await;
    let skills = demo_skills_dir();
    let server = start_server(&switch, "TOPIC_MATCH", skills.path(), 30_000).await;

    let payload = serde_json::json!({
        "request_id": "r-nomatch",
        "reply_to": "AGENT_nomatch",
        "intent": "play music",
    })
    .to_string();
    let (_, mut replies) = send_request_with_reply(
        &switch,
        "TOPIC_MATCH",
        "AGENT_nomatch",
        payload,
    )
    .await;

    let (_, response) = recv_response(&mut replies).await;
    assert_eq!(response.request_id, "r-nomatch");
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(
        response.error.starts_with("No matching skill"),
        "unexpected error text: {}",
        response.error
    );
    assert_eq!(response.content, "");

    server.shutdown();
    server.join().await;
    switch.shutdown();
    switch.join().await;
}

#[tokio::test]
async fn slow_skill_times_out_and_server_recovers() {
    let switch = start_switch().await;
    let skills = demo_skills_dir();
    let server = start_server(&switch, "TOPIC_SLOW", skills.path(), 500).await;

    let payload = serde_json::json!({
        "request_id": "r-slow",
        "reply_to": "AGENT_slow",
        "intent": r#"{"skill":"slow","data":""}"#,
    })
    .to_string();
    let (_, mut replies) =
        send_request_with_reply(&switch, "TOPIC_SLOW", "AGENT_slow", payload).await;

    let (_, response) = recv_response(&mut replies).await;
    assert_eq!(response.request_id, "r-slow");
    assert_eq!(response.status, ResponseStatus::Timeout);
    assert!(response.error.contains("timed out"));

    // Subsequent requests proceed normally.
    let payload = serde_json::json!({
        "request_id": "r-after",
        "reply_to": "AGENT_after",
        "intent": r#"{"skill":"echo","data":"still alive"}"#,
    })
    .to_string();
    let (_, mut replies) =
        send_request_with_reply(&switch, "TOPIC_SLOW", "AGENT_after", payload).await;

    let (_, response) = recv_response(&mut replies).await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.content, "still alive");

    server.shutdown();
    server.join().await;
    switch.shutdown();
    switch.join().await;
}

#[tokio::test]
async fn malformed_envelope_is_dropped_without_response() {
    let switch = start_switch().await;
    let skills = demo_skills_dir();
    let server = start_server(&switch, "TOPIC_BAD", skills.path(), 30_000).await;

    // Subscribe to everything the server might say back.
    let mut replies = Subscriber::connect(&switch.xpub_addr().to_string())
        .await
        .expect("reply subscriber connect");
    replies
        .subscribe(Bytes::from("AGENT_"))
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut publisher = Publisher::connect(&switch.xsub_addr().to_string())
        .await
        .expect("publisher connect");
    publisher
        .publish(Bytes::from("TOPIC_BAD"), "not a document")
        .await
        .expect("publish malformed payload");

    // No response for the malformed envelope.
    let nothing = timeout(Duration::from_millis(700), replies.recv()).await;
    assert!(nothing.is_err(), "malformed envelope produced a response");

    // A follow-up well-formed request on the same topic is answered.
    let payload = serde_json::json!({
        "request_id": "r-ok",
        "reply_to": "AGENT_ok",
        "intent": r#"{"skill":"echo","data":"recovered"}"#,
    })
    .to_string();
    publisher
        .publish(Bytes::from("TOPIC_BAD"), payload)
        .await
        .expect("publish valid request");

    let (_, response) = recv_response(&mut replies).await;
    assert_eq!(response.request_id, "r-ok");
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.content, "recovered");

    server.shutdown();
    server.join().await;
    switch.shutdown();
    switch.join().await;
}

#[tokio::test]
async fn task_intent_is_matched_by_description() {
    let switch = start_switch().await;
    let tmp = tempfile::tempdir().unwrap();
    write_skill(
        tmp.path(),
        "text-summarizer",
        "Summarizes long text into key points",
        "#!/bin/bash\nprintf summarized\n",
    );
    write_skill(
        tmp.path(),
        "csv-analyzer",
        "Analyzes CSV data and computes statistics",
        "#!/bin/bash\nprintf analyzed\n",
    );
    let server = start_server(&switch, "TOPIC_TASKS", tmp.path(), 30_000).await;

    let payload = serde_json::json!({
        "request_id": "r-task",
        "reply_to": "AGENT_task",
        "intent": "please summarize this article about databases",
    })
    .to_string();
    let (_, mut replies) =
        send_request_with_reply(&switch, "TOPIC_TASKS", "AGENT_task", payload).await;

    let (_, response) = recv_response(&mut replies).await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.content, "summarized");

    server.shutdown();
    server.join().await;
    switch.shutdown();
    switch.join().await;
}

/// Agent-side send: subscribe to the reply topic, give the subscription a
/// moment to settle at the switch, then publish the request.
async fn send_request_with_reply(
    switch: &SwitchHandle,
    topic: &str,
    reply_to: &str,
    payload: String,
) -> (String, Subscriber) {
    let mut replies = Subscriber::connect(&switch.xpub_addr().to_string())
        .await
        .expect("reply subscriber connect");
    replies
        .subscribe(Bytes::from(reply_to.to_owned().into_bytes()))
        .await
        .expect("subscribe to reply topic");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut publisher = Publisher::connect(&switch.xsub_addr().to_string())
        .await
        .expect("request publisher connect");
    publisher
        .publish(Bytes::from(topic.to_owned().into_bytes()), payload)
        .await
        .expect("publish request");

    (reply_to.to_owned(), replies)
}

//! Conformance suite: protocol guarantees that hold across the whole stack.
//!
//! Each section exercises one guarantee end to end:
//!
//! 1. **Terminal events**: every command ends in exactly one terminal event
//! 2. **Ordering**: commands on one kernel run FIFO, one at a time
//! 3. **Routing slips**: duplicate stamps are errors, continuation never double-appends
//! 4. **Wire round trip**: token, id, slip and payload survive serialization
//! 5. **Composite resolution**: destination URI, then name or alias, then default
//! 6. **Proxy forwarding**: two hosts speaking newline-delimited JSON
//! 7. **Isolation**: concurrent unrelated commands never see each other's events

use futures::future::join_all;
use polyglot_host::{KernelHost, KernelHostConfig};
use polyglot_kernel::{
    CompositeKernel, Kernel, KernelCommandResult, KernelError, KernelInvocation, LocalKernel,
    handler_fn,
};
use polyglot_protocol::command::{CommandPayload, RequestValue, SendValue, SubmitCode};
use polyglot_protocol::event::{CodeSubmissionReceived, ReturnValueProduced};
use polyglot_protocol::test_utils::EventCollector;
use polyglot_protocol::{
    ExtensionPayload, FormattedValue, KernelCommand, KernelCommandEnvelope, KernelEvent,
    KernelEventEnvelope, RoutingSlip, RoutingSlipError, Token,
};
use polyglot_transport::JsonLinesTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

fn code_of(invocation: &KernelInvocation) -> String {
    match &invocation.command.command().payload {
        CommandPayload::SubmitCode(submit) => submit.code.clone(),
        _ => String::new(),
    }
}

/// A kernel that echoes `<name>:<code>` as a code submission and a return value.
fn echo_kernel(name: &str) -> Arc<LocalKernel> {
    let kernel = LocalKernel::new(name);
    let label = name.to_owned();
    kernel.register_command_handler(
        "SubmitCode",
        handler_fn(move |inv| {
            let label = label.clone();
            async move {
                let code = code_of(&inv);
                inv.publish(CodeSubmissionReceived {
                    code: format!("{label}:{code}"),
                });
                tokio::task::yield_now().await;
                if code == "fail" {
                    return Err(KernelError::handler(format!("{label} refused")));
                }
                inv.publish(ReturnValueProduced {
                    formatted_values: vec![FormattedValue::plain_text(format!("{label}:{code}"))],
                    value_id: None,
                });
                Ok(())
            }
        }),
    );
    kernel
}

fn submit(code: &str) -> KernelCommandEnvelope {
    KernelCommandEnvelope::new(SubmitCode::new(code))
}

fn submit_to(target: &str, code: &str) -> KernelCommandEnvelope {
    KernelCommandEnvelope::new(KernelCommand::new(SubmitCode::new(code)).with_target_kernel_name(target))
}

async fn send(kernel: &dyn Kernel, command: KernelCommandEnvelope) -> KernelCommandResult {
    tokio::time::timeout(Duration::from_secs(5), kernel.send(command))
        .await
        .expect("command never completed")
        .unwrap()
}

fn submissions(result: &KernelCommandResult) -> Vec<String> {
    result
        .events
        .iter()
        .filter_map(|e| match e.event() {
            KernelEvent::CodeSubmissionReceived(c) => Some(c.code.clone()),
            _ => None,
        })
        .collect()
}

fn terminal_count(result: &KernelCommandResult) -> usize {
    result.events.iter().filter(|e| e.is_terminal()).count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 1. Terminal events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unhandled_command_fails_once_and_the_queue_moves_on() {
    let kernel = echo_kernel("python");

    let unhandled = KernelCommandEnvelope::new(SendValue {
        name: "x".into(),
        formatted_value: FormattedValue::plain_text("1"),
    });
    let (failed, next) = tokio::join!(
        send(kernel.as_ref(), unhandled),
        send(kernel.as_ref(), submit("after"))
    );

    assert_eq!(failed.event_types(), ["CommandFailed"]);
    assert_eq!(
        failed.failure().map(|f| f.message.as_str()),
        Some("No handler found for command type SendValue")
    );
    assert!(next.succeeded());
    assert_eq!(terminal_count(&next), 1);
}

#[tokio::test]
async fn handler_error_is_the_only_terminal_event() {
    let kernel = echo_kernel("python");
    let result = send(kernel.as_ref(), submit("fail")).await;

    assert_eq!(result.event_types(), ["CodeSubmissionReceived", "CommandFailed"]);
    assert_eq!(
        result.failure().map(|f| f.message.as_str()),
        Some("python refused")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 2. Ordering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn commands_start_in_submission_order_one_at_a_time() {
    let kernel = LocalKernel::new("python");
    let started = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let started = Arc::clone(&started);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        kernel.register_command_handler(
            "SubmitCode",
            handler_fn(move |inv| {
                let started = Arc::clone(&started);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    started.lock().await.push(code_of(&inv));
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
    }

    let codes: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let results = join_all(codes.iter().map(|c| send(kernel.as_ref(), submit(c)))).await;

    assert!(results.iter().all(KernelCommandResult::succeeded));
    assert_eq!(*started.lock().await, codes);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 3. Routing slips
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn stamping_a_kernel_twice_is_an_error() {
    let mut command = submit("1");
    let slip = command.routing_slip_mut();
    slip.stamp_as_arrived("kernel://local/python").unwrap();
    assert!(matches!(
        slip.stamp_as_arrived("kernel://local/python"),
        Err(RoutingSlipError::AlreadyStamped { .. })
    ));

    let mut event = KernelEventEnvelope::new(CodeSubmissionReceived { code: "1".into() }, None);
    event.routing_slip_mut().stamp("kernel://local/python").unwrap();
    assert!(event.routing_slip_mut().stamp("kernel://local/python").is_err());
    assert_eq!(event.routing_slip().len(), 1);
}

#[test]
fn continuing_twice_never_double_appends() {
    let mut local = RoutingSlip::from_uris(["kernel://a/"]).unwrap();
    let remote = RoutingSlip::from_uris(["kernel://a/", "kernel://b/", "kernel://b/python"]).unwrap();

    local.continue_with(&remote).unwrap();
    let once = local.clone();
    let _ = local.continue_with(&remote);

    assert_eq!(local, once);
    assert_eq!(
        local.as_slice(),
        ["kernel://a/", "kernel://b/", "kernel://b/python"]
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 4. Wire round trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn envelopes_survive_the_wire() {
    let commands = [
        submit_to("csharp", "Console.WriteLine(1)"),
        KernelCommandEnvelope::new(RequestValue {
            name: "x".into(),
            mime_type: Some("text/plain".into()),
        }),
        KernelCommandEnvelope::new(
            ExtensionPayload::new("ConformanceCustomCommand").with_field("depth", 3),
        ),
    ];

    for sent in commands {
        let mut sent = sent.with_token(Token::new("conformance-token"));
        sent
            .routing_slip_mut()
            .stamp_as_arrived("kernel://local/csharp")
            .unwrap();

        let copy = KernelCommandEnvelope::from_json(&sent.to_json().unwrap()).unwrap();
        assert_eq!(copy.token(), sent.token());
        assert_eq!(copy.id(), sent.id());
        assert_eq!(copy.routing_slip(), sent.routing_slip());
        assert_eq!(copy.command(), sent.command());

        let mut event = KernelEventEnvelope::new(
            ReturnValueProduced {
                formatted_values: vec![FormattedValue::plain_text("1")],
                value_id: None,
            },
            Some(&sent),
        );
        event.routing_slip_mut().stamp("kernel://local/csharp").unwrap();
        let event_copy = KernelEventEnvelope::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(event_copy.event(), event.event());
        assert_eq!(event_copy.routing_slip(), event.routing_slip());
        assert!(event_copy.command().unwrap().is_same_command(&sent));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 5. Composite resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn composite_resolves_default_alias_then_destination() {
    let root = CompositeKernel::new(".NET");
    root.set_host_uri("kernel://local").unwrap();
    root.add(echo_kernel("csharp"), &["c#"]).unwrap();
    root.add(echo_kernel("python"), &[]).unwrap();

    let default = send(root.as_ref(), submit("1")).await;
    let alias = send(root.as_ref(), submit_to("c#", "2")).await;
    let by_uri = send(
        root.as_ref(),
        KernelCommandEnvelope::new(
            KernelCommand::new(SubmitCode::new("3"))
                .with_target_kernel_name("csharp")
                .with_destination_uri("kernel://local/python"),
        ),
    )
    .await;

    assert_eq!(submissions(&default), ["csharp:1"]);
    assert_eq!(submissions(&alias), ["csharp:2"]);
    assert_eq!(submissions(&by_uri), ["python:3"]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 6. Proxy forwarding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Front-end host `a` and back-end host `b` exposing python, joined by
/// newline-delimited JSON over an in-memory duplex stream.
struct Wired {
    a: Arc<KernelHost>,
    _b: Arc<KernelHost>,
    a_wire: JsonLinesTransport,
    _b_wire: JsonLinesTransport,
}

async fn wired() -> Wired {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    let a_wire = JsonLinesTransport::new(left_read, left_write).with_remote_host_uri("kernel://b");
    let b_wire = JsonLinesTransport::new(right_read, right_write).with_remote_host_uri("kernel://a");

    let a = KernelHost::new(
        CompositeKernel::new("vscode"),
        a_wire.sender(),
        a_wire.receiver(),
        KernelHostConfig {
            host_uri: "kernel://a".into(),
            ..KernelHostConfig::default()
        },
    )
    .unwrap();

    let b_root = CompositeKernel::new(".NET");
    b_root.add(echo_kernel("python"), &[]).unwrap();
    let b = KernelHost::new(
        b_root,
        b_wire.sender(),
        b_wire.receiver(),
        KernelHostConfig {
            host_uri: "kernel://b".into(),
            ..KernelHostConfig::default()
        },
    )
    .unwrap();
    b.connect().await.unwrap();

    a.connect_proxy_kernel("python", "kernel://b/python", &[]).unwrap();
    Wired {
        a,
        _b: b,
        a_wire,
        _b_wire: b_wire,
    }
}

#[tokio::test]
async fn proxy_replays_remote_events_then_one_local_terminal() {
    let w = wired().await;
    let proxy = w.a.kernel().find_kernel_by_name("python").unwrap();
    let replayed = EventCollector::attach(proxy.events());
    let observers_before = w.a_wire.inbound().observer_count();

    let result = send(w.a.kernel().as_ref(), submit_to("python", "1 + 1")).await;

    assert_eq!(
        result.event_types(),
        ["CodeSubmissionReceived", "ReturnValueProduced", "CommandSucceeded"]
    );
    assert_eq!(submissions(&result), ["python:1 + 1"]);
    for event in &replayed.events()[..2] {
        assert!(event.routing_slip().contains("kernel://b/python", false));
        assert!(event.routing_slip().contains("kernel://a/python", false));
    }
    assert_eq!(w.a_wire.inbound().observer_count(), observers_before);
}

#[tokio::test]
async fn remote_failure_arrives_as_the_local_failure() {
    let w = wired().await;
    let result = send(w.a.kernel().as_ref(), submit_to("python", "fail")).await;

    assert_eq!(terminal_count(&result), 1);
    assert_eq!(
        result.failure().map(|f| f.message.as_str()),
        Some("python refused")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 7. Isolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_trees_never_see_each_others_events() {
    let left = CompositeKernel::new("left");
    left.add(echo_kernel("csharp"), &[]).unwrap();
    let right = CompositeKernel::new("right");
    right.add(echo_kernel("fsharp"), &[]).unwrap();
    let left_seen = EventCollector::attach(left.events());

    let (l, r) = tokio::join!(
        join_all((0..5).map(|i| send(left.as_ref(), submit(&format!("l{i}"))))),
        join_all((0..5).map(|i| send(right.as_ref(), submit(&format!("r{i}"))))),
    );

    for (i, result) in l.iter().enumerate() {
        assert_eq!(submissions(result), [format!("csharp:l{i}")]);
    }
    for (i, result) in r.iter().enumerate() {
        assert_eq!(submissions(result), [format!("fsharp:r{i}")]);
    }
    assert!(
        left_seen
            .events()
            .iter()
            .all(|e| !e.routing_slip().contains("kernel://local/right", true))
    );
}

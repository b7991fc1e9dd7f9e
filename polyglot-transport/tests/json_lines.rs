use polyglot_protocol::command::SubmitCode;
use polyglot_protocol::event::CommandSucceeded;
use polyglot_protocol::test_utils::RecordingObserver;
use polyglot_protocol::{
    KernelCommandEnvelope, KernelCommandOrEventEnvelope, KernelEventEnvelope, TransportError,
};
use polyglot_transport::JsonLinesTransport;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Two transports joined by a pair of in-memory pipes.
fn pipe_pair() -> (JsonLinesTransport, JsonLinesTransport) {
    let (a_out, b_in) = tokio::io::duplex(64 * 1024);
    let (b_out, a_in) = tokio::io::duplex(64 * 1024);
    (
        JsonLinesTransport::new(a_in, a_out).with_remote_host_uri("kernel://b"),
        JsonLinesTransport::new(b_in, b_out).with_remote_host_uri("kernel://a"),
    )
}

async fn wait_for_len<T: Clone + Send + 'static>(recorder: &RecordingObserver<T>, len: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("envelopes never arrived");
}

// --- Round trip ---

#[tokio::test]
async fn commands_and_events_cross_the_stream() {
    let (a, b) = pipe_pair();
    let seen = RecordingObserver::attach(b.inbound());

    let command = KernelCommandEnvelope::new(SubmitCode::new("print(1)"));
    let event = KernelEventEnvelope::new(CommandSucceeded {}, Some(&command));
    a.sender().send(command.clone().into()).await.unwrap();
    a.sender().send(event.into()).await.unwrap();

    wait_for_len(&seen, 2).await;
    let received = seen.values();
    assert_eq!(received[0].as_command().map(|c| c.id()), Some(command.id()));
    let echoed = received[1].as_event().unwrap();
    assert_eq!(echoed.event_type(), "CommandSucceeded");
    assert_eq!(echoed.command().map(|c| c.id()), Some(command.id()));
    assert_eq!(a.sender().remote_host_uri(), Some("kernel://b"));
}

#[tokio::test]
async fn concurrent_sends_never_interleave() {
    let (a, b) = pipe_pair();
    let seen = RecordingObserver::attach(b.inbound());

    let sender = a.sender();
    let sends = (0..20).map(|i| {
        let sender = sender.clone();
        tokio::spawn(async move {
            let code = "x".repeat(500 + i);
            sender
                .send(KernelCommandEnvelope::new(SubmitCode::new(code)).into())
                .await
        })
    });
    for send in sends.collect::<Vec<_>>() {
        send.await.unwrap().unwrap();
    }

    wait_for_len(&seen, 20).await;
    assert!(
        seen.values()
            .iter()
            .all(|e| matches!(e, KernelCommandOrEventEnvelope::Command(_)))
    );
}

// --- Framing ---

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let (mut raw, remote) = tokio::io::duplex(4096);
    let (local_out, _unused) = tokio::io::duplex(4096);
    let transport = JsonLinesTransport::new(remote, local_out);
    let seen = RecordingObserver::attach(transport.inbound());

    let good = KernelCommandEnvelope::new(SubmitCode::new("1")).to_json().unwrap();
    raw.write_all(b"not json\n").await.unwrap();
    raw.write_all(b"{\"commandType\":\"NoSuchCommand\",\"command\":{}}\n").await.unwrap();
    raw.write_all(b"\n").await.unwrap();
    raw.write_all(format!("{good}\n").as_bytes()).await.unwrap();

    wait_for_len(&seen, 1).await;
    assert_eq!(seen.values()[0].as_command().unwrap().command_type(), "SubmitCode");
}

#[tokio::test]
async fn end_of_stream_closes_the_inbound_side() {
    let (raw, remote) = tokio::io::duplex(4096);
    let (local_out, _unused) = tokio::io::duplex(4096);
    let transport = JsonLinesTransport::new(remote, local_out);

    drop(raw);
    tokio::time::timeout(Duration::from_secs(5), transport.closed())
        .await
        .expect("end of stream not observed");
}

#[tokio::test]
async fn each_envelope_is_one_line() {
    let (local_in, _unused) = tokio::io::duplex(4096);
    let (local_out, raw) = tokio::io::duplex(4096);
    let transport = JsonLinesTransport::new(local_in, local_out);

    transport
        .sender()
        .send(KernelCommandEnvelope::new(SubmitCode::new("a\nb")).into())
        .await
        .unwrap();

    let mut line = String::new();
    BufReader::new(raw).read_line(&mut line).await.unwrap();
    assert!(line.ends_with('\n'));
    let parsed = KernelCommandOrEventEnvelope::from_json(line.trim_end()).unwrap();
    assert_eq!(parsed.as_command().unwrap().command_type(), "SubmitCode");
}

#[tokio::test]
async fn writing_to_a_closed_peer_fails() {
    let (local_in, _unused) = tokio::io::duplex(4096);
    let (local_out, raw) = tokio::io::duplex(16);
    let transport = JsonLinesTransport::new(local_in, local_out);
    drop(raw);

    let result = transport
        .sender()
        .send(KernelCommandEnvelope::new(SubmitCode::new("1")).into())
        .await;
    assert!(matches!(
        result,
        Err(TransportError::Closed | TransportError::Io(_))
    ));
}

use polyglot_kernel::{CompositeKernel, Kernel, KernelError, LocalKernel, handler_fn};
use polyglot_protocol::command::{CommandPayload, RequestKernelInfo, SubmitCode};
use polyglot_protocol::event::CodeSubmissionReceived;
use polyglot_protocol::test_utils::EventCollector;
use polyglot_protocol::{KernelCommand, KernelCommandEnvelope, KernelEvent};
use std::sync::Arc;

/// A kernel that reports `<name>:<code>` for every submission.
fn language_kernel(name: &str) -> Arc<LocalKernel> {
    let kernel = LocalKernel::new(name);
    let label = name.to_owned();
    kernel.register_command_handler(
        "SubmitCode",
        handler_fn(move |inv| {
            let label = label.clone();
            async move {
                let code = match &inv.command.command().payload {
                    CommandPayload::SubmitCode(s) => s.code.clone(),
                    _ => String::new(),
                };
                inv.publish(CodeSubmissionReceived {
                    code: format!("{label}:{code}"),
                });
                Ok(())
            }
        }),
    );
    kernel
}

fn polyglot() -> Arc<CompositeKernel> {
    let root = CompositeKernel::new(".NET");
    root.set_host_uri("kernel://local").unwrap();
    root.add(language_kernel("csharp"), &["c#"]).unwrap();
    root.add(language_kernel("python"), &[]).unwrap();
    root
}

fn handled_by(result: &polyglot_kernel::KernelCommandResult) -> Vec<String> {
    result
        .events
        .iter()
        .filter_map(|e| match e.event() {
            KernelEvent::CodeSubmissionReceived(c) => Some(c.code.clone()),
            _ => None,
        })
        .collect()
}

fn submit(command: KernelCommand) -> KernelCommandEnvelope {
    KernelCommandEnvelope::new(command)
}

// --- Resolution ---

#[tokio::test]
async fn untargeted_command_goes_to_default_child() {
    let root = polyglot();
    let result = root
        .send(submit(KernelCommand::new(SubmitCode::new("1"))))
        .await
        .unwrap();
    assert_eq!(handled_by(&result), ["csharp:1"]);
    assert!(result.succeeded());
}

#[tokio::test]
async fn alias_resolves_to_child() {
    let root = polyglot();
    let result = root
        .send(submit(
            KernelCommand::new(SubmitCode::new("2")).with_target_kernel_name("c#"),
        ))
        .await
        .unwrap();
    assert_eq!(handled_by(&result), ["csharp:2"]);
}

#[tokio::test]
async fn destination_uri_wins_over_default() {
    let root = polyglot();
    let result = root
        .send(submit(
            KernelCommand::new(SubmitCode::new("3")).with_destination_uri("kernel://local/python"),
        ))
        .await
        .unwrap();
    assert_eq!(handled_by(&result), ["python:3"]);
}

#[tokio::test]
async fn per_command_type_default_applies_to_untargeted_commands() {
    let root = polyglot();
    root.set_default_target_kernel_name_for_command("SubmitCode", "python");
    let result = root
        .send(submit(KernelCommand::new(SubmitCode::new("4"))))
        .await
        .unwrap();
    assert_eq!(handled_by(&result), ["python:4"]);
}

#[tokio::test]
async fn unknown_target_fails_with_kernel_not_found() {
    let root = polyglot();
    let collector = EventCollector::attach(root.events());

    let result = root
        .send(submit(
            KernelCommand::new(SubmitCode::new("5")).with_target_kernel_name("fsharp"),
        ))
        .await
        .unwrap();

    assert_eq!(
        result.failure().map(|f| f.message.as_str()),
        Some("Kernel not found: fsharp")
    );
    assert_eq!(collector.event_types(), ["CommandFailed"]);
}

#[test]
fn duplicate_names_and_aliases_are_rejected() {
    let root = polyglot();
    assert!(matches!(
        root.add(LocalKernel::new("python"), &[]),
        Err(KernelError::DuplicateKernelName(n)) if n == "python"
    ));
    assert!(matches!(
        root.add(LocalKernel::new("csharp-script"), &["c#"]),
        Err(KernelError::DuplicateKernelName(n)) if n == "c#"
    ));
    assert_eq!(root.children().len(), 2);
}

// --- Routing slips ---

#[tokio::test]
async fn command_slip_records_composite_and_child_hops() {
    let root = polyglot();
    let result = root
        .send(submit(KernelCommand::new(SubmitCode::new("1"))))
        .await
        .unwrap();
    assert_eq!(
        result.command.routing_slip().as_slice(),
        [
            "kernel://local/?tag=arrived",
            "kernel://local/csharp?tag=arrived",
            "kernel://local/csharp",
            "kernel://local/",
        ]
    );
}

#[tokio::test]
async fn child_events_are_republished_with_composite_stamp() {
    let root = polyglot();
    let collector = EventCollector::attach(root.events());

    root.send(submit(KernelCommand::new(SubmitCode::new("1"))))
        .await
        .unwrap();

    let events = collector.events();
    assert_eq!(
        collector.event_types(),
        ["CodeSubmissionReceived", "CommandSucceeded"]
    );
    for event in events {
        assert_eq!(
            event.routing_slip().as_slice(),
            ["kernel://local/csharp", "kernel://local/"]
        );
    }
}

// --- Discovery ---

#[tokio::test]
async fn request_kernel_info_describes_composite_and_children() {
    let root = polyglot();
    let result = root
        .send(KernelCommandEnvelope::new(RequestKernelInfo {}))
        .await
        .unwrap();

    let names: Vec<String> = result
        .events
        .iter()
        .filter_map(|e| match e.event() {
            KernelEvent::KernelInfoProduced(p) => Some(p.kernel_info.local_name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names, [".NET", "csharp", "python"]);
    assert!(result.succeeded());
}

#[test]
fn children_are_rehomed_under_the_host() {
    let root = polyglot();
    let csharp = root.find_kernel_by_name("c#").unwrap();
    assert_eq!(csharp.uri(), "kernel://local/csharp");
    assert_eq!(csharp.kernel_info().aliases, ["c#"]);

    let python = root.find_kernel_by_uri("kernel://local/python").unwrap();
    assert_eq!(python.name(), "python");
    assert_eq!(root.find_kernel_by_uri("kernel://local").unwrap().name(), ".NET");

    root.set_host_uri("kernel://vscode").unwrap();
    assert_eq!(csharp.uri(), "kernel://vscode/csharp");
    assert!(root.find_kernel_by_uri("kernel://local/csharp").is_none());
}

#[test]
fn find_kernels_includes_the_composite() {
    let root = polyglot();
    let all = root.find_kernels(|_| true);
    assert_eq!(all.len(), 3);
    let supports_submit = root.find_kernels(|k| k.supports_command("SubmitCode"));
    assert_eq!(supports_submit.len(), 2);
    assert_eq!(
        root.find_kernel(|k| k.kernel_info().is_composite)
            .map(|k| k.name().to_owned()),
        Some(".NET".to_owned())
    );
}

//! Example: two kernel hosts in one process.
//!
//! A front-end host discovers the kernels of a back-end host and runs
//! code on them through a proxy, as a notebook front end would with a
//! kernel process.
//!
//! Run with: `RUST_LOG=debug cargo run --example two_hosts -p polyglot --features host`

use polyglot::prelude::*;
use polyglot::protocol::FormattedValue;
use polyglot::protocol::event::{CodeSubmissionReceived, ReturnValueProduced};
use tracing_subscriber::EnvFilter;

fn csharp_kernel() -> std::sync::Arc<LocalKernel> {
    let kernel = LocalKernel::with_info(KernelInfo::new("csharp").with_language("C#", "12.0"));
    kernel.register_command_handler(
        "SubmitCode",
        handler_fn(|inv| async move {
            let code = match &inv.command.command().payload {
                CommandPayload::SubmitCode(submit) => submit.code.clone(),
                _ => String::new(),
            };
            inv.publish(CodeSubmissionReceived { code: code.clone() });
            inv.publish(ReturnValueProduced {
                formatted_values: vec![FormattedValue::plain_text(format!("evaluated `{code}`"))],
                value_id: None,
            });
            Ok(())
        }),
    );
    kernel
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (front_side, back_side) = connected_pair(Some("kernel://vscode"), Some("kernel://pid-1"));

    let back_root = CompositeKernel::new(".NET");
    back_root.add(csharp_kernel(), &["c#"])?;
    let back = KernelHost::new(
        back_root,
        back_side.sender(),
        back_side.receiver(),
        KernelHostConfig {
            host_uri: "kernel://pid-1".into(),
            ..KernelHostConfig::default()
        },
    )?;

    let front = KernelHost::new(
        CompositeKernel::new("vscode"),
        front_side.sender(),
        front_side.receiver(),
        KernelHostConfig {
            host_uri: "kernel://vscode".into(),
            proxy_discovery: true,
            ..KernelHostConfig::default()
        },
    )?;

    back.connect().await?;
    front.connect().await?;

    for info in front.get_kernel_infos() {
        println!(
            "{:<8} {:<24} proxy={} remote={}",
            info.local_name,
            info.uri,
            info.is_proxy,
            info.remote_uri.as_deref().unwrap_or("-")
        );
    }

    let command = KernelCommandEnvelope::new(
        KernelCommand::new(SubmitCode::new("Console.WriteLine(1 + 1)")).with_target_kernel_name("c#"),
    );
    let result = front.kernel().send(command).await?;
    for event in &result.events {
        println!("{:<24} {:?}", event.event_type(), event.routing_slip().as_slice());
    }
    println!("command slip: {:?}", result.command.routing_slip().as_slice());
    Ok(())
}

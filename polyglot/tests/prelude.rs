//! The prelude is enough to build and drive a kernel tree.

use polyglot::prelude::*;

#[tokio::test]
async fn prelude_builds_a_working_tree() {
    let root = CompositeKernel::new("root");
    root.set_host_uri("kernel://local").unwrap();
    let echo = LocalKernel::new("echo");
    echo.register_command_handler("SubmitCode", handler_fn(|_| async move { Ok(()) }));
    root.add(echo, &[]).unwrap();

    let result = root
        .send(KernelCommandEnvelope::new(SubmitCode::new("1")))
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(
        result.command.routing_slip().as_slice(),
        [
            "kernel://local/?tag=arrived",
            "kernel://local/echo?tag=arrived",
            "kernel://local/echo",
            "kernel://local/",
        ]
    );
}

#[cfg(feature = "host")]
#[tokio::test]
async fn host_feature_exposes_the_host_stack() {
    let (side, _peer) = connected_pair(None, None);
    let host = KernelHost::new(
        CompositeKernel::new("root"),
        side.sender(),
        side.receiver(),
        KernelHostConfig::default(),
    )
    .unwrap();
    assert_eq!(host.uri(), "kernel://local/");
}

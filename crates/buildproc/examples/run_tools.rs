//! Runs a few tool invocations concurrently in one process group, streams
//! their output line by line and stops everything on Ctrl-C.
//!
//! ```text
//! RUST_LOG=debug cargo run -p buildproc --example run_tools
//! ```

use buildproc::{
    CancellationToken, ManagedProcess, Priority, ProcessGroup, ProcessSpec, create_process_group,
    logging,
};
use tokio::task::JoinSet;
use tracing::{error, info};

fn tool(script: &str) -> buildproc::Result<ProcessSpec> {
    #[cfg(windows)]
    let spec = ProcessSpec::builder()
        .executable("cmd.exe")
        .args(["/d", "/c", script])
        .priority(Priority::BelowNormal)
        .build()?;

    #[cfg(not(windows))]
    let spec = ProcessSpec::builder()
        .executable("/bin/sh")
        .args(["-c", script])
        .priority(Priority::BelowNormal)
        .build()?;

    Ok(spec)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let group = create_process_group()?;
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling tools");
            ctrl_c.cancel();
        }
    });

    let mut tasks = JoinSet::new();
    for (name, script) in [
        ("compile", "echo compiling a.c && echo warning: unused variable 1>&2"),
        ("link", "echo linking && echo done"),
        ("slow", "echo waiting && sleep 3 && echo finished"),
    ] {
        let spec = tool(script)?;
        let group = group.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let mut process = ManagedProcess::spawn(&group, spec).await?;
            while let Some(line) = process.try_read_line(&cancel).await {
                info!(tool = name, "{line}");
            }
            let status = process.dispose().await;
            info!(tool = name, ?status, "Tool finished");
            Ok::<(), buildproc::ProcessError>(())
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result? {
            error!(error = %e, "Tool failed");
        }
    }

    group.dispose();
    Ok(())
}

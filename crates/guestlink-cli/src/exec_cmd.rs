//! `guestlink exec` and `guestlink search`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use guestlink_core::{
    ChannelRegistry, Config, Dispatcher, ExecMode, FrameExecutor, OutputQueues, Progress,
    SocketConnector,
};

/// Arguments shared by `exec` and `search`.
#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    /// Worker to run the command on
    pub worker: String,

    /// Command line sent to the guest agent
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Wire the registry, queue store and dispatcher for one invocation.
pub fn build_dispatcher(config: &Config) -> Dispatcher {
    let registry =
        ChannelRegistry::from_config(config, OutputQueues::new(), Arc::new(SocketConnector));
    Dispatcher::new(registry, FrameExecutor).with_timeout(config.dispatch.timeout())
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling submission");
            token.cancel();
        }
    });
}

/// Execute the `exec` or `search` subcommand.
#[allow(clippy::print_stdout)]
pub async fn run(config: &Config, args: ExecArgs, mode: ExecMode) -> Result<()> {
    let dispatcher = build_dispatcher(config);
    let command = args.command.join(" ");
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match mode {
        ExecMode::Exec => {
            let output = dispatcher
                .submit(&args.worker, &command, mode, None, &cancel)
                .await
                .with_context(|| format!("exec on worker {} failed", args.worker))?;
            println!("{}", output.text());
        }
        ExecMode::Search => {
            let (tx, mut rx) = mpsc::channel::<Progress>(64);
            let printer = tokio::spawn(async move {
                let mut printed = 0usize;
                while let Some(progress) = rx.recv().await {
                    println!("{}", progress.frame);
                    printed += 1;
                }
                printed
            });

            let result = dispatcher
                .submit(&args.worker, &command, mode, Some(&tx), &cancel)
                .await;
            drop(tx);
            let printed = printer.await.context("Progress printer failed")?;
            let output =
                result.with_context(|| format!("search on worker {} failed", args.worker))?;
            info!(worker = %args.worker, matches = output.frames.len(), printed, "Search finished");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use guestlink_core::Endpoint;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    /// Guest that answers every line with `reply`.
    async fn guest(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write.write_all(reply).await.unwrap();
            }
        });
        addr
    }

    fn config_for(addr: String) -> Config {
        let mut config = Config::default();
        config.workers.insert("vm-1".into(), Endpoint::Tcp(addr));
        config.dispatch.timeout_ms = Some(2_000);
        config
    }

    fn args(worker: &str, command: &[&str]) -> ExecArgs {
        ExecArgs {
            worker: worker.into(),
            command: command.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn dispatcher_uses_configured_timeout() {
        let config = config_for("127.0.0.1:1".into());
        let dispatcher = build_dispatcher(&config);
        assert_eq!(dispatcher.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(dispatcher.registry().workers(), vec!["vm-1"]);
    }

    #[tokio::test]
    async fn exec_against_guest() {
        let config = config_for(guest(b"Linux\0").await);
        run(&config, args("vm-1", &["uname", "-s"]), ExecMode::Exec)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn search_against_guest() {
        let config = config_for(guest(b"/a\0/b\0\0").await);
        run(&config, args("vm-1", &["find", "/"]), ExecMode::Search)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_worker_fails() {
        let config = config_for("127.0.0.1:1".into());
        let err = run(&config, args("vm-9", &["true"]), ExecMode::Exec)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vm-9"));
    }
}

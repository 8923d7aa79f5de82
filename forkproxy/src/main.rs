use forkproxy::{addr::Transport, cli, cli::Invocation, daemonize, error::Error, nsenter, relay, shutdown::Supervisor};
use std::{path::PathBuf, process};

fn main() {
    if let Err(err) = run() {
        eprintln!("forkproxy: {}", err);
        process::exit(1);
    }
}

/// Everything up to and including namespace entry runs synchronously,
/// before any tokio runtime exists — `setns(2)` into a different user
/// namespace requires the calling process still be single-threaded,
/// and constructing a multi-threaded runtime any earlier would violate
/// that.
fn run() -> Result<(), Error> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(Error::NotPrivileged);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match Invocation::from_args(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("{}", cli::usage());
            return Err(err);
        }
    };

    match nsenter::enter(invocation)? {
        nsenter::Role::Child(child) => {
            child.create_and_send()?;
            Ok(())
        }
        nsenter::Role::Parent(parent) => run_parent(parent),
    }
}

fn run_parent(parent: nsenter::ParentSide) -> Result<(), Error> {
    let (listeners, child_pid, invocation) = parent.receive_all()?;
    let grandchild = daemonize::daemonize(listeners, child_pid, invocation)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_relay_engine(grandchild))
}

async fn run_relay_engine(grandchild: daemonize::Grandchild) -> Result<(), Error> {
    // Reinitialize the logger now that an async runtime exists: everything
    // up to here logged (if at all) through the process-wide default
    // logger the pre-main shim inherited; from here on, every diagnostic
    // line goes through the same `stderr`-target drain, which already
    // points at the log file via the fd redirection `nsenter::enter` did.
    #[cfg(feature = "log")]
    let _log_guard = forkproxy_log::async_logger("forkproxy", true)
        .await
        .map_err(|err| Error::LogInit(Box::new(err)))?;

    // Only the listen endpoint's UNIX path is ever created by this process
    // (the connect endpoint is only ever dialed, never bound) — §4.6 scopes
    // cleanup to paths the proxy itself created.
    let unix_paths = unix_socket_paths(&grandchild.invocation.listen_addr).collect();

    let supervisor = Supervisor::new();

    let relay_task = relay::run(grandchild, supervisor.clone());
    let shutdown_task = supervisor.run(unix_paths);

    tokio::pin!(relay_task);
    tokio::pin!(shutdown_task);

    tokio::select! {
        result = &mut relay_task => result,
        result = &mut shutdown_task => result,
    }
}

fn unix_socket_paths(endpoint: &forkproxy::addr::Endpoint) -> impl Iterator<Item = PathBuf> + '_ {
    let is_unix_path = endpoint.transport == Transport::Unix && !endpoint.abstract_socket;
    endpoint
        .addresses
        .iter()
        .filter(move |_| is_unix_path)
        .map(PathBuf::from)
}

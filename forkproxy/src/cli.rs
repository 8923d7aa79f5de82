//! Parses the helper's fixed 8-argument invocation.
//!
//! ```text
//! <listen-pid> <listen-addr> <connect-pid> <connect-addr> <fd-placeholder> <reexec-flag> <log-path> <pid-path>
//! ```
//!
//! `fd-placeholder` and `reexec-flag` exist only for compatibility with
//! the surrounding daemon and are read but otherwise ignored; this
//! helper's contract with its caller stops at argv, the pid/log files,
//! and the `SIGTERM` it receives to stop.

use crate::{
    addr::Endpoint,
    error::Error,
};
use nix::unistd::Pid;
use std::path::PathBuf;

/// The fully parsed invocation of the helper.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub listen_pid: Pid,
    pub listen_addr: Endpoint,
    pub connect_pid: Pid,
    pub connect_addr: Endpoint,
    pub log_path: PathBuf,
    pub pid_path: PathBuf,
}

const EXPECTED_ARGS: usize = 8;

impl Invocation {
    /// Parse `argv[1..]` (the program name must already be stripped).
    pub fn from_args(args: &[String]) -> Result<Self, Error> {
        if args.len() != EXPECTED_ARGS {
            return Err(Error::BadInvocation(
                "expected exactly 8 arguments: <listen-pid> <listen-addr> <connect-pid> <connect-addr> <fd-placeholder> <reexec-flag> <log-path> <pid-path>",
            ));
        }

        let listen_pid = parse_pid(&args[0])?;
        let listen_addr = Endpoint::parse(&args[1])?;
        let connect_pid = parse_pid(&args[2])?;
        let connect_addr = Endpoint::parse(&args[3])?;
        // args[4] = fd-placeholder, args[5] = reexec-flag: consumed, not used.
        let log_path = PathBuf::from(&args[6]);
        let pid_path = PathBuf::from(&args[7]);

        Ok(Invocation {
            listen_pid,
            listen_addr,
            connect_pid,
            connect_addr,
            log_path,
            pid_path,
        })
    }
}

fn parse_pid(s: &str) -> Result<Pid, Error> {
    let raw: i32 = s
        .parse()
        .map_err(|_| Error::BadInvocation("pid argument is not an integer"))?;
    Ok(Pid::from_raw(raw))
}

/// Usage string printed to stderr on `BadInvocation`.
pub fn usage() -> &'static str {
    "usage: forkproxy <listen-pid> <listen-addr> <connect-pid> <connect-addr> \
     <fd-placeholder> <reexec-flag> <log-path> <pid-path>\n\
     \n\
     addr := tcp:<host>:<port>[,<port>|<low>-<high>]...\n\
           | udp:<host>:<port>[,<port>|<low>-<high>]...\n\
           | unix:<path>\n\
           | unix:@<abstract-name>\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_full_invocation() {
        let invocation = Invocation::from_args(&args(&[
            "100",
            "tcp:0.0.0.0:8080,8081",
            "200",
            "tcp:127.0.0.1:9000",
            "3",
            "0",
            "/var/log/forkproxy.log",
            "/var/run/forkproxy.pid",
        ]))
        .unwrap();

        assert_eq!(invocation.listen_pid, Pid::from_raw(100));
        assert_eq!(invocation.connect_pid, Pid::from_raw(200));
        assert_eq!(
            invocation.listen_addr.addresses,
            vec!["0.0.0.0:8080", "0.0.0.0:8081"]
        );
        assert_eq!(invocation.log_path, PathBuf::from("/var/log/forkproxy.log"));
    }

    #[test]
    fn rejects_wrong_argument_count() {
        let err = Invocation::from_args(&args(&["1", "tcp:a:1"])).unwrap_err();
        assert!(matches!(err, Error::BadInvocation(_)));
    }

    #[test]
    fn rejects_non_numeric_pid() {
        let err = Invocation::from_args(&args(&[
            "not-a-pid",
            "tcp:a:1",
            "2",
            "tcp:b:2",
            "0",
            "0",
            "log",
            "pid",
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::BadInvocation(_)));
    }
}

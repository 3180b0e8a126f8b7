//! The host the tool runs on: tools, network and process table.

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use sysinfo::{PidExt, ProcessExt, System, SystemExt};

use crate::config::Settings;
use crate::privileges;
use crate::utils::command::{CommandRunner, SystemCommandRunner};
use crate::utils::fetch::{HttpFetcher, ReqwestFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub pid: u32,
    pub command: String,
}

/// Privilege and process-table queries.
pub trait HostProbe: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// First running process whose command line contains any of `patterns`
    fn find_process(&self, patterns: &[String]) -> Option<RunningProcess>;
}

/// First process whose command line contains one of `patterns`, lowest pid first.
pub fn find_matching<I>(processes: I, patterns: &[String]) -> Option<RunningProcess>
where
    I: IntoIterator<Item = RunningProcess>,
{
    let own_pid = std::process::id();
    processes
        .into_iter()
        .filter(|p| p.pid != own_pid)
        .filter(|p| patterns.iter().any(|pattern| p.command.contains(pattern.as_str())))
        .min_by_key(|p| p.pid)
}

/// Probe backed by `geteuid` and the live process table
#[derive(Debug, Default)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn is_elevated(&self) -> bool {
        privileges::is_elevated()
    }

    fn find_process(&self, patterns: &[String]) -> Option<RunningProcess> {
        let mut system = System::new();
        system.refresh_processes();
        debug!("Scanning {} processes for provisioning extensions", system.processes().len());

        let processes = system.processes().iter().map(|(pid, process)| {
            let command = if process.cmd().is_empty() {
                process.name().to_string()
            } else {
                process.cmd().join(" ")
            };
            RunningProcess {
                pid: pid.as_u32(),
                command,
            }
        });
        find_matching(processes, patterns)
    }
}

/// Everything the orchestrator touches outside its own bundle.
#[derive(Clone)]
pub struct Host {
    pub runner: Arc<dyn CommandRunner>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub probe: Arc<dyn HostProbe>,
}

impl Host {
    /// The real machine. Only the metadata service bypasses the proxy.
    pub fn system(settings: &Settings) -> Result<Self> {
        Ok(Host {
            runner: Arc::new(SystemCommandRunner::new()),
            fetcher: Arc::new(ReqwestFetcher::new(&[settings.metadata_url.as_str()])?),
            probe: Arc::new(SystemProbe),
        })
    }
}

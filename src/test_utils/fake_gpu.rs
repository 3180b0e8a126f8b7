//! Stateful stand-in for a GPU host: `dcgmi`, `nv-hostengine` and `nvidia-smi`
//! behave like the real tools against an in-memory device table.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::gpu::CleanupRegistry;
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};

struct HostState {
    persistence: Vec<bool>,
    daemon_running: bool,
    calls: Vec<String>,
    toggles: Vec<(u32, bool)>,
    diag_runs: usize,
}

pub struct FakeGpuHost {
    state: Mutex<HostState>,
    installed: HashSet<String>,
    hang_after_first_diag: bool,
    interrupt_during_diag: Mutex<Option<Arc<CleanupRegistry>>>,
}

impl FakeGpuHost {
    /// `device_count` GPUs, all with persistence mode on except `lacking`
    pub fn new(device_count: u32, lacking: &[u32]) -> Self {
        let persistence = (0..device_count).map(|id| !lacking.contains(&id)).collect();
        let installed = ["dcgmi", "nv-hostengine", "nvidia-smi", "nvidia-debugdump"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        FakeGpuHost {
            state: Mutex::new(HostState {
                persistence,
                daemon_running: false,
                calls: Vec::new(),
                toggles: Vec::new(),
                diag_runs: 0,
            }),
            installed,
            hang_after_first_diag: false,
            interrupt_during_diag: Mutex::new(None),
        }
    }

    pub fn with_daemon_running(self) -> Self {
        self.state.lock().unwrap().daemon_running = true;
        self
    }

    /// Every diagnostic pass after the persistence check exceeds its timeout
    pub fn with_hanging_diagnostics(mut self) -> Self {
        self.hang_after_first_diag = true;
        self
    }

    pub fn without_tool(mut self, tool: &str) -> Self {
        self.installed.remove(tool);
        self
    }

    /// Simulate Ctrl-C arriving while the requested diagnostic pass runs
    pub fn interrupt_during_diag(&self, registry: Arc<CleanupRegistry>) {
        *self.interrupt_during_diag.lock().unwrap() = Some(registry);
    }

    pub fn daemon_running(&self) -> bool {
        self.state.lock().unwrap().daemon_running
    }

    pub fn persistence(&self) -> Vec<bool> {
        self.state.lock().unwrap().persistence.clone()
    }

    pub fn toggles(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().toggles.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn diag_report(persistence: &[bool]) -> String {
        let mut report = String::from(
            "+---------------------------+------------------------------------------------+\n\
             | Diagnostic                | Result                                         |\n\
             +===========================+================================================+\n",
        );
        let all_on = persistence.iter().all(|&on| on);
        report.push_str(&format!(
            "| Persistence Mode          | {:<46} |\n",
            if all_on { "Pass" } else { "Fail" }
        ));
        for (id, on) in persistence.iter().enumerate() {
            if !on {
                report.push_str(&format!(
                    "| Warning                   | GPU {id} Persistence mode for GPU {id} is disabled. |\n"
                ));
            }
        }
        report
    }

    fn diag(&self) -> Result<CommandOutput> {
        let (main_pass, hang) = {
            let mut state = self.state.lock().unwrap();
            if !state.daemon_running {
                return Ok(CommandOutput::failed(1, "Error: unable to connect to host engine"));
            }
            state.diag_runs += 1;
            let main_pass = state.diag_runs > 1;
            (main_pass, main_pass && self.hang_after_first_diag)
        };

        if main_pass {
            // Our own locks are released here: restoring calls back into this host
            let registry = self.interrupt_during_diag.lock().unwrap().clone();
            if let Some(registry) = registry {
                registry.restore_all();
            }
        }

        if hang {
            return Ok(CommandOutput {
                exit_code: None,
                stdout: b"Running diagnostics...\n".to_vec(),
                timed_out: true,
                ..Default::default()
            });
        }

        let report = Self::diag_report(&self.state.lock().unwrap().persistence);
        Ok(CommandOutput::ok(report))
    }
}

impl CommandRunner for FakeGpuHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.state.lock().unwrap().calls.push(spec.display());

        if !self.installed.contains(&spec.program) {
            return Err(anyhow!("{}: not found", spec.program));
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("dcgmi", ["discovery", "-l"]) => {
                if self.daemon_running() {
                    Ok(CommandOutput::ok("2 GPUs found.\n"))
                } else {
                    Ok(CommandOutput::failed(1, "Error: unable to establish a connection"))
                }
            }
            ("dcgmi", ["diag", "-r", _]) => self.diag(),
            ("nv-hostengine", []) => {
                self.state.lock().unwrap().daemon_running = true;
                Ok(CommandOutput::ok(""))
            }
            ("nv-hostengine", ["-t"]) => {
                self.state.lock().unwrap().daemon_running = false;
                Ok(CommandOutput::ok("Host engine successfully terminated.\n"))
            }
            ("nvidia-smi", ["-i", id, "-pm", mode]) => {
                let id: u32 = id.parse()?;
                let on = *mode == "1";
                let mut guard = self.state.lock().unwrap();
                let state = &mut *guard;
                match state.persistence.get_mut(id as usize) {
                    Some(slot) => {
                        *slot = on;
                        state.toggles.push((id, on));
                        Ok(CommandOutput::ok(""))
                    }
                    None => Ok(CommandOutput::failed(6, "No devices were found")),
                }
            }
            ("nvidia-smi", ["-q"]) => Ok(CommandOutput::ok("==============NVSMI LOG==============\n")),
            ("nvidia-debugdump", _) => Ok(CommandOutput::ok("")),
            _ => Ok(CommandOutput::failed(127, "unexpected command")),
        }
    }

    fn is_installed(&self, program: &str) -> bool {
        self.installed.contains(program)
    }
}

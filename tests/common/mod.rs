//! Scripted hosts for end-to-end runs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;
use tempfile::TempDir;

use hpc_diag::config::{GpuLevel, RunConfig, Settings};
use hpc_diag::host::{Host, HostProbe, RunningProcess};
use hpc_diag::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use hpc_diag::utils::fetch::HttpFetcher;

pub const METADATA_URL: &str = "http://metadata.test/instance";

pub fn metadata(vm_id: &str, vm_size: &str) -> String {
    format!(
        r#"{{"compute": {{"vmId": "{}", "vmSize": "{}", "location": "eastus"}}}}"#,
        vm_id, vm_size
    )
}

pub struct ScriptedProbe {
    pub elevated: bool,
    pub running: Vec<RunningProcess>,
}

impl HostProbe for ScriptedProbe {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn find_process(&self, patterns: &[String]) -> Option<RunningProcess> {
        hpc_diag::host::find_matching(self.running.clone(), patterns)
    }
}

#[derive(Default)]
pub struct MapFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl MapFetcher {
    pub fn serve(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }
}

impl HttpFetcher for MapFetcher {
    fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: {}", url))
    }
}

/// Nothing installed
pub struct BareHost;

impl CommandRunner for BareHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Err(anyhow!("{}: command not found", spec.program))
    }

    fn is_installed(&self, _program: &str) -> bool {
        false
    }
}

/// Every tool claims to exist and then panics when run
pub struct ExplodingHost;

impl CommandRunner for ExplodingHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        panic!("{} crashed", spec.program)
    }

    fn is_installed(&self, _program: &str) -> bool {
        true
    }
}

pub struct Workspace {
    _dir: TempDir,
    pub output: PathBuf,
    pub sysroot: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("out");
        let sysroot = dir.path().join("root");
        fs::create_dir_all(&output).expect("output dir");
        fs::create_dir_all(&sysroot).expect("sysroot");
        Workspace {
            _dir: dir,
            output,
            sysroot,
        }
    }

    pub fn write_host_file(&self, relative: &str, content: &str) {
        let path = self.sysroot.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("host dir");
        fs::write(path, content).expect("host file");
    }

    pub fn settings(&self) -> Settings {
        Settings {
            metadata_url: METADATA_URL.to_string(),
            sysroot: self.sysroot.clone(),
            ..Settings::default()
        }
    }

    pub fn run_config(&self, assume_yes: bool) -> RunConfig {
        RunConfig {
            output_root: self.output.clone(),
            gpu_level: GpuLevel::Quick,
            memory_test: false,
            verbosity: 0,
            assume_yes,
        }
    }

    pub fn output_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output)
            .expect("read output")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn host(runner: Arc<dyn CommandRunner>, fetcher: MapFetcher, probe: ScriptedProbe) -> Host {
    Host {
        runner,
        fetcher: Arc::new(fetcher),
        probe: Arc::new(probe),
    }
}

pub fn root_probe() -> ScriptedProbe {
    ScriptedProbe {
        elevated: true,
        running: Vec::new(),
    }
}

/// Paths and contents of every regular file in a `.tar.gz`
pub fn archive_files(path: &Path) -> HashMap<String, String> {
    let file = fs::File::open(path).expect("open archive");
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut files = HashMap::new();
    for entry in archive.entries().expect("entries") {
        let mut entry = entry.expect("entry");
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().expect("path").to_string_lossy().into_owned();
        let mut content = String::new();
        entry.read_to_string(&mut content).expect("utf-8 content");
        files.insert(name, content);
    }
    files
}

/// A GPU node with the NVIDIA tools installed and nothing else.
///
/// Devices listed as lacking start without persistence mode; the DCGM
/// report names them until they are switched on.
pub struct GpuNode {
    state: std::sync::Mutex<(Vec<bool>, bool)>,
    pub calls: std::sync::Mutex<Vec<String>>,
}

impl GpuNode {
    pub fn new(devices: usize, lacking: &[usize]) -> Self {
        let persistence = (0..devices).map(|d| !lacking.contains(&d)).collect();
        GpuNode {
            state: std::sync::Mutex::new((persistence, false)),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn persistence(&self) -> Vec<bool> {
        self.state.lock().unwrap().0.clone()
    }

    pub fn daemon_running(&self) -> bool {
        self.state.lock().unwrap().1
    }
}

impl CommandRunner for GpuNode {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.display());
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();
        let output = match (spec.program.as_str(), args.as_slice()) {
            ("dcgmi", ["discovery", "-l"]) if state.1 => CommandOutput::ok("1 GPU found.\n"),
            ("dcgmi", ["discovery", "-l"]) => CommandOutput::failed(1, "no host engine"),
            ("dcgmi", ["diag", "-r", level]) => {
                let mut report = format!("Diagnostic level {}\n", level);
                for (id, on) in state.0.iter().enumerate() {
                    if !on {
                        report.push_str(&format!("| Persistence mode for GPU {} is disabled. |\n", id));
                    }
                }
                CommandOutput::ok(report)
            }
            ("nv-hostengine", []) => {
                state.1 = true;
                CommandOutput::ok("")
            }
            ("nv-hostengine", ["-t"]) => {
                state.1 = false;
                CommandOutput::ok("")
            }
            ("nvidia-smi", ["-i", id, "-pm", mode]) => {
                let id: usize = id.parse()?;
                state.0[id] = *mode == "1";
                CommandOutput::ok("")
            }
            ("nvidia-smi", ["-q"]) => CommandOutput::ok("==============NVSMI LOG==============\n"),
            ("nvidia-debugdump", _) => CommandOutput::ok(""),
            _ => return Err(anyhow!("{}: command not found", spec.program)),
        };
        Ok(output)
    }

    fn is_installed(&self, program: &str) -> bool {
        matches!(program, "dcgmi" | "nv-hostengine" | "nvidia-smi" | "nvidia-debugdump")
    }
}

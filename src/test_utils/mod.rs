//! Test utilities for hpc-diag
//!
//! Temporary host layouts, canned tools and fetchers shared by the unit
//! tests of every module.

#![cfg(test)]

pub mod fake_gpu;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use crate::classify::classify;
use crate::collectors::CollectionContext;
use crate::config::{GpuLevel, RunConfig, Settings};
use crate::gpu::CleanupRegistry;
use crate::metadata::InstanceDescriptor;
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::fetch::HttpFetcher;

/// A scratch host: a sysroot for host files and an empty bundle directory.
pub struct TestHost {
    _dir: TempDir,
    sysroot: PathBuf,
    bundle: PathBuf,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let sysroot = dir.path().join("sysroot");
        let bundle = dir.path().join("out").join("test-vm.2024-01-01_00-00-00");
        fs::create_dir_all(&sysroot).expect("Failed to create sysroot");
        fs::create_dir_all(&bundle).expect("Failed to create bundle dir");
        TestHost {
            _dir: dir,
            sysroot,
            bundle,
        }
    }

    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle
    }

    /// Create a host file under the sysroot, with parent directories
    pub fn write_host_file(&self, relative: &str, content: &str) {
        let path = self.sysroot.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create host dir");
        }
        fs::write(path, content).expect("Failed to write host file");
    }

    pub fn settings(&self) -> Settings {
        Settings {
            sysroot: self.sysroot.clone(),
            ..Settings::default()
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            output_root: self.bundle.parent().map(Path::to_path_buf).unwrap_or_default(),
            gpu_level: GpuLevel::Quick,
            memory_test: false,
            verbosity: 0,
            assume_yes: true,
        }
    }
}

pub fn descriptor(vm_size: &str) -> InstanceDescriptor {
    InstanceDescriptor {
        vm_size: vm_size.to_string(),
        vm_id: "test-vm".to_string(),
        timestamp: "2024-01-01_00-00-00".to_string(),
        raw_metadata: format!(r#"{{"compute":{{"vmId":"test-vm","vmSize":"{}"}}}}"#, vm_size)
            .into_bytes(),
    }
}

pub fn context(
    host: &TestHost,
    vm_size: &str,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn HttpFetcher>,
) -> CollectionContext {
    CollectionContext {
        runner,
        fetcher,
        settings: host.settings(),
        config: host.run_config(),
        instance: descriptor(vm_size),
        capabilities: classify(vm_size),
        cleanup: Arc::new(CleanupRegistry::new()),
    }
}

/// A context on a host with no diagnostic tools and no network
pub fn offline_context(host: &TestHost, vm_size: &str) -> CollectionContext {
    context(host, vm_size, Arc::new(NoTools), Arc::new(OfflineFetcher))
}

/// A host where no tool is installed
pub struct NoTools;

impl CommandRunner for NoTools {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Err(anyhow!("{}: command not found", spec.program))
    }

    fn is_installed(&self, _program: &str) -> bool {
        false
    }
}

/// Tools that print canned output, keyed by program name; records every call.
#[derive(Default)]
pub struct CannedTools {
    outputs: HashMap<String, CommandOutput>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl CannedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, program: &str, stdout: &str) -> Self {
        self.outputs.insert(program.to_string(), CommandOutput::ok(stdout));
        self
    }

    pub fn with_output(mut self, program: &str, output: CommandOutput) -> Self {
        self.outputs.insert(program.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for CannedTools {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        // Absolute paths (downloaded binaries) are looked up by file name
        let name = Path::new(&spec.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&spec.program);
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("{}: command not found", spec.program))
    }

    fn is_installed(&self, program: &str) -> bool {
        self.outputs.contains_key(program)
    }
}

/// No network at all
pub struct OfflineFetcher;

impl HttpFetcher for OfflineFetcher {
    fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        Err(anyhow!("network unreachable: {}", url))
    }
}

/// Serves fixed bodies by URL; anything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }
}

impl HttpFetcher for StaticFetcher {
    fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for {}", url))
    }
}

/// A gzip-compressed tarball holding `entries` (path, content, mode)
pub fn tarball(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .expect("Failed to append tar entry");
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("Failed to finish tarball")
}

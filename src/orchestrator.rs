//! The run from privilege check to archive path.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use crate::classify::classify;
use crate::cli::confirm_disclosure;
use crate::collectors::{planned_collectors, run_isolated, CollectionContext};
use crate::config::{RunConfig, Settings};
use crate::constants::{GENERAL_LOG_NAME, SUMMARY_NAME};
use crate::gpu::CleanupRegistry;
use crate::host::Host;
use crate::logging::GeneralLog;
use crate::metadata::fetch_instance_descriptor;
use crate::models::CollectorOutcome;
use crate::privileges::get_elevation_instructions;
use crate::utils::compress::build_archive;
use crate::utils::summary::create_collection_summary;

#[derive(Debug)]
pub enum RunOutcome {
    /// The operator declined the disclosure; nothing was created
    Declined,
    Completed {
        archive: PathBuf,
        outcomes: Vec<CollectorOutcome>,
    },
}

/// Create an empty bundle directory, replacing any earlier one of the same name.
pub fn create_bundle(output_root: &Path, name: &str) -> Result<PathBuf> {
    let bundle = output_root.join(name);
    if bundle.exists() {
        warn!("Removing existing bundle directory {}", bundle.display());
        fs::remove_dir_all(&bundle)
            .context(format!("Failed to remove existing {}", bundle.display()))?;
    }
    fs::create_dir_all(&bundle)
        .context(format!("Failed to create bundle directory {}", bundle.display()))?;
    Ok(bundle)
}

/// Install the Ctrl-C handler: restore any GPU state borrowed by a running
/// diagnostic pass and remove live scratch directories, then exit with code 0.
pub fn install_interrupt_handler(cleanup: Arc<CleanupRegistry>) -> Result<()> {
    ctrlc::set_handler(move || {
        warn!("Interrupted; restoring host state");
        if cleanup.restore_all() {
            info!("GPU state restored");
        }
        std::process::exit(0);
    })
    .context("Failed to install interrupt handler")
}

pub struct Orchestrator {
    config: RunConfig,
    settings: Settings,
    host: Host,
    cleanup: Arc<CleanupRegistry>,
    general_log: GeneralLog,
}

impl Orchestrator {
    pub fn new(config: RunConfig, settings: Settings, host: Host) -> Self {
        Orchestrator {
            config,
            settings,
            host,
            cleanup: Arc::new(CleanupRegistry::new()),
            general_log: GeneralLog::new(),
        }
    }

    /// Send `general.log` records to this sink (the one the logger writes to)
    pub fn with_general_log(mut self, general_log: GeneralLog) -> Self {
        self.general_log = general_log;
        self
    }

    /// Registry shared with the interrupt handler
    pub fn cleanup_registry(&self) -> Arc<CleanupRegistry> {
        Arc::clone(&self.cleanup)
    }

    /// Run a full collection. `input`/`output` carry the disclosure prompt.
    pub fn run<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<RunOutcome> {
        if !self.host.probe.is_elevated() {
            return Err(anyhow!(
                "hpcdiag must be run as root. {}",
                get_elevation_instructions()
            ));
        }
        self.config.validate()?;

        if !self.config.assume_yes && !confirm_disclosure(input, output)? {
            info!("Disclosure declined; nothing collected");
            return Ok(RunOutcome::Declined);
        }

        if let Some(process) = self.host.probe.find_process(&self.settings.extension_processes) {
            return Err(anyhow!(
                "A driver extension is still being provisioned (pid {}: {}). \
                 Wait for it to finish and run hpcdiag again.",
                process.pid,
                process.command
            ));
        }

        let instance = fetch_instance_descriptor(self.host.fetcher.as_ref(), &self.settings.metadata_url)?;
        let capabilities = classify(&instance.vm_size);
        info!("Capabilities: {:?}", capabilities);

        let bundle = create_bundle(&self.config.output_root, &instance.bundle_name())?;
        if let Err(e) = self.general_log.attach(&bundle.join(GENERAL_LOG_NAME)) {
            warn!("Continuing without general.log: {:#}", e);
        }
        info!("Collecting into {}", bundle.display());

        let ctx = CollectionContext {
            runner: Arc::clone(&self.host.runner),
            fetcher: Arc::clone(&self.host.fetcher),
            settings: self.settings.clone(),
            config: self.config.clone(),
            instance,
            capabilities,
            cleanup: Arc::clone(&self.cleanup),
        };

        let (collectors, mut skipped) = planned_collectors(&capabilities, self.config.memory_test);
        let mut outcomes: Vec<CollectorOutcome> = collectors
            .iter()
            .map(|collector| run_isolated(collector.as_ref(), &ctx, &bundle))
            .collect();
        outcomes.append(&mut skipped);

        match create_collection_summary(&ctx.instance, &capabilities, &self.config, &outcomes) {
            Ok(summary) => {
                if let Err(e) = fs::write(bundle.join(SUMMARY_NAME), summary) {
                    warn!("Failed to write collection summary: {}", e);
                }
            }
            Err(e) => warn!("Failed to create collection summary: {:#}", e),
        }

        info!("Collection finished; packing archive");
        if let Err(e) = self.general_log.detach() {
            warn!("Failed to close general.log: {:#}", e);
        }
        let archive = build_archive(&bundle)?;
        info!("Archive written to {}", archive.display());

        Ok(RunOutcome::Completed { archive, outcomes })
    }
}

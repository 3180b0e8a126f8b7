use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::collectors::collector::{read_nonempty, run_steps, step, CollectionContext, Collector};
use crate::constants::{
    MESSAGES_LOG_PATH, NO_LSVMBUS, NO_SYSTEM_LOGS, NO_WAAGENT_LOGS, SYSLOG_PATH, VM_DIR,
    WAAGENT_LOG_PATH,
};
use crate::utils::command::CommandSpec;
use crate::utils::fallback::FallbackChain;

/// Instance identity, kernel state, device inventory and system logs.
pub struct VmCollector;

impl VmCollector {
    fn lsvmbus(&self, ctx: &CollectionContext, dest: &Path) -> Result<()> {
        let resolution = FallbackChain::new("lsvmbus")
            .then("installed lsvmbus", || {
                ctx.command_stdout(&CommandSpec::new("lsvmbus").arg("-vv"))
            })
            .then("kernel tree script", || {
                let script = ctx.fetcher.get(&ctx.settings.lsvmbus_script_url, &[])?;
                let dir = ctx.cleanup.scratch_dir("hpcdiag-lsvmbus")?;
                let path = dir.path().join("lsvmbus");
                fs::write(&path, script)?;
                ctx.command_stdout(
                    &CommandSpec::new("python3")
                        .arg(path.to_string_lossy())
                        .arg("-vv"),
                )
            })
            .write_to(dest, NO_LSVMBUS)?;
        debug!("lsvmbus resolved by {:?}", resolution);
        Ok(())
    }

    fn system_log(&self, ctx: &CollectionContext, dest: &Path) -> Result<()> {
        let resolution = FallbackChain::new("system log")
            .then("journal", || {
                ctx.command_stdout(&CommandSpec::new("journalctl").arg("--no-pager"))
            })
            .then("syslog", || read_nonempty(&ctx.host_path(SYSLOG_PATH)))
            .then("messages", || read_nonempty(&ctx.host_path(MESSAGES_LOG_PATH)))
            .write_to(dest, NO_SYSTEM_LOGS)?;
        info!("System log collected from {:?}", resolution);
        Ok(())
    }
}

impl Collector for VmCollector {
    fn name(&self) -> &'static str {
        "VM"
    }

    fn subdir(&self) -> &'static str {
        VM_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        let capture = |program: &'static str, args: &'static [&'static str], file: &'static str| {
            move || {
                ctx.capture(CommandSpec::new(program).args(args.iter().copied()), &out_dir.join(file))
                    .map(|_| ())
            }
        };

        run_steps(
            self.name(),
            vec![
                step("metadata", || {
                    fs::write(out_dir.join("metadata.json"), &ctx.instance.raw_metadata)
                        .context("Failed to write metadata.json")
                }),
                step("dmesg", capture("dmesg", &[], "dmesg.log")),
                step("waagent", || {
                    FallbackChain::new("waagent log")
                        .then("waagent.log", || read_nonempty(&ctx.host_path(WAAGENT_LOG_PATH)))
                        .write_to(&out_dir.join("waagent.log"), NO_WAAGENT_LOGS)
                        .map(|_| ())
                }),
                step("lspci", capture("lspci", &["-vv"], "lspci.txt")),
                step("lsvmbus", || self.lsvmbus(ctx, &out_dir.join("lsvmbus.log"))),
                step("ip", capture("ip", &["addr"], "ipconfig.txt")),
                step("sysctl", capture("sysctl", &["-a"], "sysctl.txt")),
                step("uname", capture("uname", &["-a"], "uname.txt")),
                step("dmidecode", capture("dmidecode", &[], "dmidecode.txt")),
                step("syslog", || self.system_log(ctx, &out_dir.join("syslog"))),
            ],
        )
    }
}

//! Ordered fallback strategies.
//!
//! Several artifacts can be produced more than one way (a native tool, a
//! fetched script, a legacy log file). A [`FallbackChain`] tries each strategy
//! in order, keeps the first one that succeeds and otherwise yields a
//! placeholder message so the bundle never has a silent gap.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};

type Strategy<'a> = Box<dyn FnOnce() -> Result<Vec<u8>> + 'a>;

/// Which strategy produced the content, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Strategy(&'static str),
    Placeholder,
}

pub struct FallbackChain<'a> {
    artifact: &'static str,
    strategies: Vec<(&'static str, Strategy<'a>)>,
}

impl<'a> FallbackChain<'a> {
    pub fn new(artifact: &'static str) -> Self {
        FallbackChain {
            artifact,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy; earlier strategies take precedence
    pub fn then<F>(mut self, name: &'static str, strategy: F) -> Self
    where
        F: FnOnce() -> Result<Vec<u8>> + 'a,
    {
        self.strategies.push((name, Box::new(strategy)));
        self
    }

    /// Run strategies in order, returning the first success or the placeholder.
    pub fn resolve(self, placeholder: &str) -> (Vec<u8>, Resolution) {
        for (name, strategy) in self.strategies {
            match strategy() {
                Ok(content) => {
                    debug!("{}: using {}", self.artifact, name);
                    return (content, Resolution::Strategy(name));
                }
                Err(e) => debug!("{}: {} unavailable: {:#}", self.artifact, name, e),
            }
        }

        info!("{}: no source available, writing placeholder", self.artifact);
        (format!("{}\n", placeholder).into_bytes(), Resolution::Placeholder)
    }

    /// Resolve and write the result to `dest`.
    pub fn write_to(self, dest: &Path, placeholder: &str) -> Result<Resolution> {
        let (content, resolution) = self.resolve(placeholder);
        fs::write(dest, content)
            .context(format!("Failed to write {}", dest.display()))?;
        Ok(resolution)
    }
}

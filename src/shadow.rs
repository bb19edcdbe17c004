use std::collections::BTreeSet;

use rand::Rng;

use crate::config::{ShadowConfig, XnatServer};
use crate::error::PipelineError;

/// Round-robin selector over the numbered shadow servers, skipping bad ones.
#[derive(Debug, Clone)]
pub struct ShadowDispatcher {
    min: u32,
    max: u32,
    bad: BTreeSet<u32>,
    server: XnatServer,
    current: u32,
}

impl ShadowDispatcher {
    /// Starts at a uniformly random shadow number in `[min, max]`.
    pub fn new(config: &ShadowConfig) -> Result<Self, PipelineError> {
        validate(config)?;
        let start = rand::rng().random_range(config.min..=config.max);
        Self::starting_at(config, start)
    }

    pub fn starting_at(config: &ShadowConfig, start: u32) -> Result<Self, PipelineError> {
        validate(config)?;
        if !(config.min..=config.max).contains(&start) {
            return Err(PipelineError::InvalidShadowRange(format!(
                "start {start} outside [{}, {}]",
                config.min, config.max
            )));
        }
        Ok(Self {
            min: config.min,
            max: config.max,
            bad: config.bad.clone(),
            server: config.server,
            current: start,
        })
    }

    /// Returns the current shadow number and advances, wrapping past `max`.
    pub fn get_and_inc(&mut self) -> u32 {
        loop {
            let candidate = self.current;
            self.current = if self.current >= self.max {
                self.min
            } else {
                self.current + 1
            };
            if !self.bad.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn url(&self, number: u32) -> String {
        format!(
            "{}{number}{}:{}",
            self.server.shadow_prefix(),
            self.server.shadow_suffix(),
            self.server.shadow_port()
        )
    }

    pub fn next_url(&mut self) -> String {
        let number = self.get_and_inc();
        self.url(number)
    }
}

/// Rejects an inverted range and a range where every shadow is listed as bad.
pub(crate) fn validate(config: &ShadowConfig) -> Result<(), PipelineError> {
    if config.min > config.max {
        return Err(PipelineError::InvalidShadowRange(format!(
            "min {} is greater than max {}",
            config.min, config.max
        )));
    }
    if (config.min..=config.max).all(|number| config.bad.contains(&number)) {
        return Err(PipelineError::InvalidShadowRange(format!(
            "every shadow in [{}, {}] is listed as bad",
            config.min, config.max
        )));
    }
    Ok(())
}

// SPDX-License-Identifier: MIT
//! Provider registry: the configured services indexed for the request path.
//!
//! Built once at startup from a validated [`Config`] and read-only after
//! that. Executor order is config order, which the warm-up broadcaster and
//! the startup summary both rely on.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;

use crate::config::{Config, Role, Service};

#[derive(Debug)]
pub struct ProviderRegistry {
    services: Vec<Service>,
    by_id: HashMap<String, usize>,
    evaluator: usize,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let services = config.services.clone();

        let mut by_id = HashMap::with_capacity(services.len());
        for (index, service) in services.iter().enumerate() {
            if by_id.insert(service.id.clone(), index).is_some() {
                bail!("duplicate service id: {}", service.id);
            }
        }

        let evaluator = services
            .iter()
            .position(|s| s.role == Role::Evaluator)
            .context("no evaluator service configured")?;

        if !services.iter().any(|s| s.role == Role::Executor) {
            bail!("no executor services configured");
        }

        Ok(Self {
            services,
            by_id,
            evaluator,
        })
    }

    pub fn get(&self, id: &str) -> Result<&Service> {
        self.by_id
            .get(id)
            .map(|&index| &self.services[index])
            .with_context(|| format!("unknown service id: {id}"))
    }

    pub fn evaluator(&self) -> &Service {
        &self.services[self.evaluator]
    }

    /// All executors in config order.
    pub fn executors(&self) -> Vec<&Service> {
        self.services
            .iter()
            .filter(|s| s.role == Role::Executor)
            .collect()
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }
}

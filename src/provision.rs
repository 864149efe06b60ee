//! End-to-end provisioning of a tenant subdomain
//!
//! Normalizes the requested name, assigns its backend port, then writes the PM2
//! descriptor and nginx vhost that consume the resolved ports.

use crate::assign::PortAssigner;
use crate::config::Config;
use crate::error::PortError;
use crate::nginx::{NginxControl, NginxSite, VhostSpec};
use crate::pm2::ProcessDescriptor;
use crate::registry::{FileRegistry, RegistryStore};
use crate::slug::{slugify, Separator};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Result reported on stdout after provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub subdomain: String,
    pub backend_port: u16,
    pub frontend_port: u16,
}

/// Read-only view of a subdomain's ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortReport {
    pub subdomain: String,
    pub backend_port: Option<u16>,
    pub frontend_port: u16,
}

/// Files written for an assignment
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub process_descriptor: PathBuf,
    pub vhost: PathBuf,
    pub link_created: bool,
}

pub struct Provisioner<B, F> {
    config: Config,
    assigner: PortAssigner<B, F>,
    nginx: NginxControl,
}

impl Provisioner<FileRegistry, FileRegistry> {
    pub fn from_config(config: Config) -> Self {
        let assigner = PortAssigner::from_config(&config.registry);
        Provisioner::new(config, assigner)
    }
}

impl<B: RegistryStore, F: RegistryStore> Provisioner<B, F> {
    pub fn new(config: Config, assigner: PortAssigner<B, F>) -> Self {
        let nginx = NginxControl::new(config.provision.use_sudo);
        Self {
            config,
            assigner,
            nginx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn assigner(&self) -> &PortAssigner<B, F> {
        &self.assigner
    }

    /// Slugify `raw_name`, rejecting input that normalizes to nothing
    pub fn normalize(&self, raw_name: &str) -> Result<String, PortError> {
        let subdomain = slugify(raw_name, Separator::Hyphen);
        if subdomain.is_empty() {
            return Err(PortError::InvalidArgument(format!(
                "'{}' normalizes to an empty subdomain",
                raw_name
            )));
        }
        Ok(subdomain)
    }

    /// Assign the backend port and resolve the frontend port; writes only the registry
    pub fn assign(&mut self, raw_name: &str) -> Result<Assignment> {
        let subdomain = self.normalize(raw_name)?;
        info!(raw = raw_name, subdomain = %subdomain, "Processed subdomain");

        let backend_port = self
            .assigner
            .assign_backend_port(&subdomain)
            .context("Failed to assign backend port")?;
        let frontend_port = self.frontend_port(&subdomain)?;

        Ok(Assignment {
            subdomain,
            backend_port,
            frontend_port,
        })
    }

    /// Full provisioning: registry, PM2 descriptor, vhost, nginx reload
    pub async fn provision(&mut self, raw_name: &str) -> Result<(Assignment, Artifacts)> {
        let assignment = self.assign(raw_name)?;
        let artifacts = self.write_artifacts(&assignment)?;

        if self.config.provision.reload_nginx {
            self.nginx.test_and_reload().await?;
        }

        info!(
            subdomain = %assignment.subdomain,
            backend_port = assignment.backend_port,
            frontend_port = assignment.frontend_port,
            "Provisioning completed"
        );
        Ok((assignment, artifacts))
    }

    /// Write the PM2 descriptor and install the vhost for an assignment
    pub fn write_artifacts(&self, assignment: &Assignment) -> Result<Artifacts> {
        let provision = &self.config.provision;

        let release_dir = provision.releases_dir.join(&assignment.subdomain);
        let process_name = format!("{}{}", provision.process_prefix, assignment.subdomain);
        let descriptor = ProcessDescriptor::new(&process_name, &release_dir, assignment.backend_port);
        let descriptor_path = descriptor.write(&release_dir)?;

        let spec = self.vhost_spec(assignment)?;
        info!(
            subdomain = %spec.subdomain,
            frontend_port = spec.frontend_port,
            backend_port = spec.backend_port,
            versioned = spec.is_versioned(),
            "Creating nginx config"
        );
        let site = NginxSite::new(&spec);
        let vhost_path = site.write(&provision.sites_available)?;
        let link_created = site.enable(&provision.sites_available, &provision.sites_enabled)?;

        Ok(Artifacts {
            process_descriptor: descriptor_path,
            vhost: vhost_path,
            link_created,
        })
    }

    /// Ports for a subdomain without writing anything
    pub fn show(&self, raw_name: &str) -> Result<PortReport> {
        let subdomain = self.normalize(raw_name)?;
        let backend_port = self
            .assigner
            .backend_port(&subdomain)
            .context("Failed to read backend registry")?;
        let frontend_port = self.frontend_port(&subdomain)?;

        Ok(PortReport {
            subdomain,
            backend_port,
            frontend_port,
        })
    }

    fn frontend_port(&self, subdomain: &str) -> Result<u16> {
        self.assigner
            .resolve_frontend_port(subdomain, self.config.registry.default_frontend_port)
            .context("Failed to read frontend registry")
    }

    fn vhost_spec(&self, assignment: &Assignment) -> Result<VhostSpec> {
        let provision = &self.config.provision;
        let builder_port = if provision.is_versioned(&assignment.subdomain) {
            Some(self.frontend_port(&provision.builder_subdomain)?)
        } else {
            None
        };

        Ok(VhostSpec {
            subdomain: assignment.subdomain.clone(),
            domain: provision.domain.clone(),
            frontend_port: assignment.frontend_port,
            backend_port: assignment.backend_port,
            builder_port,
        })
    }
}

//! Idempotent assign-or-reuse of backend ports
//!
//! The backend registry is locked before lookup and released after the append,
//! so concurrent invocations for the same host serialize on the lock file.

use crate::allocator::PortAllocator;
use crate::config::RegistryConfig;
use crate::error::PortError;
use crate::registry::{FileRegistry, PortMapping, RegistryGuard, RegistryStore};
use tracing::{debug, info};

/// How a backend port was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The subdomain already had a mapping; nothing was written
    Reused(u16),
    /// A new mapping was appended to the backend registry
    Allocated(u16),
}

impl Resolution {
    pub fn port(&self) -> u16 {
        match self {
            Resolution::Reused(port) | Resolution::Allocated(port) => *port,
        }
    }
}

/// Resolves backend ports against a backend and a frontend registry
pub struct PortAssigner<B, F> {
    backend: B,
    frontend: F,
    allocator: PortAllocator,
    locking: bool,
}

impl PortAssigner<FileRegistry, FileRegistry> {
    /// File-backed assigner using the configured map locations
    pub fn from_config(config: &RegistryConfig) -> Self {
        PortAssigner::new(
            FileRegistry::new(&config.backend_map),
            FileRegistry::new(&config.frontend_map),
            PortAllocator::new(config.default_backend_port, config.max_port),
        )
        .with_locking(config.lock)
    }
}

impl<B: RegistryStore, F: RegistryStore> PortAssigner<B, F> {
    pub fn new(backend: B, frontend: F, allocator: PortAllocator) -> Self {
        Self {
            backend,
            frontend,
            allocator,
            locking: true,
        }
    }

    /// Enable or disable the advisory lock around assignment (builder pattern)
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Return the subdomain's backend port, allocating and persisting one if needed
    pub fn assign_backend_port(&mut self, subdomain: &str) -> Result<u16, PortError> {
        self.assign(subdomain).map(|r| r.port())
    }

    /// Like [`assign_backend_port`](Self::assign_backend_port), reporting whether a write happened
    pub fn assign(&mut self, subdomain: &str) -> Result<Resolution, PortError> {
        PortMapping::validate_subdomain(subdomain)?;
        info!(subdomain, "Assigning backend port");

        let _guard = self.lock()?;

        if let Some(port) = self.backend.lookup(subdomain)? {
            info!(subdomain, port, "Subdomain already has a backend port");
            return Ok(Resolution::Reused(port));
        }

        let port = self.allocator.allocate(&self.backend, &self.frontend)?;
        let mapping = PortMapping::new(port, subdomain)?;
        self.backend.append(&mapping)?;

        info!(
            subdomain,
            port,
            registry = %self.backend.location().display(),
            "Assigned new backend port"
        );
        Ok(Resolution::Allocated(port))
    }

    /// Existing backend port for a subdomain, without allocating
    pub fn backend_port(&self, subdomain: &str) -> Result<Option<u16>, PortError> {
        self.backend.lookup(subdomain)
    }

    /// Frontend port for a subdomain, or `default_port` when the frontend map has none
    pub fn resolve_frontend_port(&self, subdomain: &str, default_port: u16) -> Result<u16, PortError> {
        match self.frontend.lookup(subdomain)? {
            Some(port) => {
                debug!(subdomain, port, "Found frontend port");
                Ok(port)
            }
            None => {
                debug!(subdomain, port = default_port, "No frontend port mapped, using default");
                Ok(default_port)
            }
        }
    }

    /// All backend mappings in registry order
    pub fn backend_mappings(&self) -> Result<Vec<PortMapping>, PortError> {
        self.backend.mappings()
    }

    fn lock(&self) -> Result<RegistryGuard, PortError> {
        if self.locking {
            self.backend.lock_exclusive()
        } else {
            Ok(RegistryGuard::unlocked())
        }
    }
}

//! Backend port allocation
//!
//! Candidates start one above the highest backend port (or at the configured
//! default for an empty registry) and are bumped past every port the frontend
//! registry claims. Probing stops at `max_port`.

use crate::error::{PortError, Step};
use crate::registry::RegistryStore;
use tracing::{debug, info};

/// Computes free backend ports against both registries
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    default_port: u16,
    max_port: u16,
}

impl PortAllocator {
    pub fn new(default_port: u16, max_port: u16) -> Self {
        Self {
            default_port,
            max_port,
        }
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn max_port(&self) -> u16 {
        self.max_port
    }

    /// `max(backend) + 1`, or the default port when the backend registry is empty
    ///
    /// Returned as `u32` because `max + 1` may already be past 65535.
    pub fn next_candidate<B: RegistryStore + ?Sized>(&self, backend: &B) -> Result<u32, PortError> {
        let candidate = match backend.max_port().map_err(|e| e.at_step(Step::Allocate))? {
            Some(last) => {
                let next = u32::from(last) + 1;
                debug!(last_port = last, next_port = next, "Computed next candidate from backend registry");
                next
            }
            None => {
                debug!(port = self.default_port, "Backend registry empty, using default port");
                u32::from(self.default_port)
            }
        };
        Ok(candidate)
    }

    /// First port at or above `candidate` that the frontend registry does not claim
    pub fn resolve_free<F: RegistryStore + ?Sized>(
        &self,
        candidate: u32,
        frontend: &F,
    ) -> Result<u16, PortError> {
        let claimed = frontend
            .mappings()
            .map_err(|e| e.at_step(Step::Allocate))?;

        let mut port = candidate;
        while port <= u32::from(self.max_port) {
            // port <= max_port <= u16::MAX
            let probe = port as u16;
            if !claimed.iter().any(|m| m.port == probe) {
                return Ok(probe);
            }
            info!(port = probe, "Port is claimed by the frontend registry, trying next port");
            port += 1;
        }

        Err(PortError::RangeExhausted {
            start: candidate,
            max: self.max_port,
        })
    }

    /// `resolve_free(next_candidate(backend), frontend)`
    pub fn allocate<B, F>(&self, backend: &B, frontend: &F) -> Result<u16, PortError>
    where
        B: RegistryStore + ?Sized,
        F: RegistryStore + ?Sized,
    {
        let candidate = self.next_candidate(backend)?;
        self.resolve_free(candidate, frontend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    fn allocator() -> PortAllocator {
        PortAllocator::new(3333, 65535)
    }

    #[test]
    fn test_next_candidate_empty_uses_default() {
        assert_eq!(allocator().next_candidate(&MemoryRegistry::new()).unwrap(), 3333);
    }

    #[test]
    fn test_next_candidate_is_max_plus_one() {
        let backend = MemoryRegistry::from_lines(&["3340 old", "3333 acme", "notaport foo"]);
        assert_eq!(allocator().next_candidate(&backend).unwrap(), 3341);
    }

    #[test]
    fn test_next_candidate_may_sit_below_default() {
        let backend = MemoryRegistry::from_lines(&["2000 legacy"]);
        assert_eq!(allocator().next_candidate(&backend).unwrap(), 2001);
    }

    #[test]
    fn test_resolve_free_skips_frontend_claims() {
        let frontend = MemoryRegistry::from_lines(&["3333 www", "3334 shop", "3336 blog"]);
        assert_eq!(allocator().resolve_free(3333, &frontend).unwrap(), 3335);
        assert_eq!(allocator().resolve_free(3336, &frontend).unwrap(), 3337);
    }

    #[test]
    fn test_resolve_free_unclaimed_candidate_is_kept() {
        let frontend = MemoryRegistry::from_lines(&["3000 www"]);
        assert_eq!(allocator().resolve_free(3333, &frontend).unwrap(), 3333);
    }

    #[test]
    fn test_resolve_free_range_exhausted() {
        let frontend = MemoryRegistry::from_lines(&["65534 a", "65535 b"]);
        let err = allocator().resolve_free(65534, &frontend).unwrap_err();
        assert!(matches!(err, PortError::RangeExhausted { start: 65534, max: 65535 }));
    }

    #[test]
    fn test_candidate_past_u16_is_exhausted() {
        let backend = MemoryRegistry::from_lines(&["65535 last"]);
        let err = allocator()
            .allocate(&backend, &MemoryRegistry::new())
            .unwrap_err();
        assert!(matches!(err, PortError::RangeExhausted { start: 65536, .. }));
    }

    #[test]
    fn test_custom_max_port() {
        let alloc = PortAllocator::new(3333, 3334);
        let frontend = MemoryRegistry::from_lines(&["3333 www", "3334 shop"]);
        assert!(alloc.allocate(&MemoryRegistry::new(), &frontend).is_err());
    }
}

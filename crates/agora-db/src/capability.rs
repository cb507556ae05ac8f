use anyhow::{Result, bail};
use tracing::debug;

/// The store operations allowed to look past per-user visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScope {
    /// The deletion engine loading and mutating a message regardless of
    /// whether it is already hidden for the actor.
    DeletionMutation,
    /// Room resolution looking up a dedup key the caller may not yet be a
    /// participant of.
    RoomDedup,
}

/// Elevated identity for a single scope. Unscoped queries filter rows by the
/// viewing user; methods that take a `ServiceIdentity` do not, and refuse to
/// run under a different scope.
#[derive(Debug)]
pub struct ServiceIdentity {
    scope: ServiceScope,
}

impl ServiceIdentity {
    pub fn scoped(scope: ServiceScope) -> Self {
        debug!("Service identity acquired for {:?}", scope);
        Self { scope }
    }

    pub fn scope(&self) -> ServiceScope {
        self.scope
    }

    pub(crate) fn require(&self, scope: ServiceScope) -> Result<()> {
        if self.scope != scope {
            bail!(
                "service identity scoped to {:?} cannot be used for {:?}",
                self.scope,
                scope
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_only_grants_its_own_scope() {
        let identity = ServiceIdentity::scoped(ServiceScope::RoomDedup);
        assert!(identity.require(ServiceScope::RoomDedup).is_ok());
        assert!(identity.require(ServiceScope::DeletionMutation).is_err());
    }
}

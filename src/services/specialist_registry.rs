//! Dispatch of phase handlers, keyed by the closed phase enum.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Phase;
use crate::domain::ports::Specialist;

/// Exact-match registry: one specialist per phase, no fallback.
#[derive(Default, Clone)]
pub struct SpecialistRegistry {
    specialists: HashMap<Phase, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `specialist` for `phase`, replacing any previous handler.
    pub fn register(&mut self, phase: Phase, specialist: Arc<dyn Specialist>) {
        debug!(%phase, specialist = specialist.name(), "Specialist registered");
        self.specialists.insert(phase, specialist);
    }

    /// Builder form of [`register`](Self::register), keyed by the
    /// specialist's own phase.
    pub fn with(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.register(specialist.phase(), specialist);
        self
    }

    /// The specialist for `phase`. An unmapped phase is a configuration error.
    pub fn resolve(&self, phase: Phase) -> DomainResult<Arc<dyn Specialist>> {
        self.specialists
            .get(&phase)
            .cloned()
            .ok_or(DomainError::UnknownPhaseHandler(phase))
    }

    pub fn is_registered(&self, phase: Phase) -> bool {
        self.specialists.contains_key(&phase)
    }

    /// Phases with no registered specialist, in phase order.
    pub fn unmapped_phases(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|p| !self.specialists.contains_key(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SpecialistResult;
    use crate::domain::ports::SpecialistContext;
    use async_trait::async_trait;

    struct Fixed(Phase);

    #[async_trait]
    impl Specialist for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn phase(&self) -> Phase {
            self.0
        }

        async fn execute(&self, _ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
            Ok(SpecialistResult::partial(Vec::new()))
        }
    }

    #[test]
    fn test_resolve_by_exact_phase() {
        let registry = SpecialistRegistry::new().with(Arc::new(Fixed(Phase::Coding)));
        assert_eq!(registry.resolve(Phase::Coding).unwrap().phase(), Phase::Coding);
        assert!(matches!(
            registry.resolve(Phase::Testing),
            Err(DomainError::UnknownPhaseHandler(Phase::Testing))
        ));
    }

    #[test]
    fn test_unmapped_phases() {
        let mut registry = SpecialistRegistry::new();
        for phase in Phase::ALL {
            registry.register(phase, Arc::new(Fixed(phase)));
        }
        assert!(registry.unmapped_phases().is_empty());
        assert!(SpecialistRegistry::new().unmapped_phases().len() == Phase::ALL.len());
    }
}

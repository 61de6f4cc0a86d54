//! # Service registry: registration order, dependencies, and lifecycle state.
//!
//! ```text
//! register(spec) ──► entries[...]  (registration order kept)
//!
//! start_order():
//!   Kahn's algorithm over depends_on, picking ready services in registration order
//!     a, b(dep a), c        → a, b, c
//!     b(dep c), c           → c, b
//!     a(dep b), b(dep a)    → DependencyCycle
//!
//! transition(name, next) ──► ServiceState::can_transition_to? ──► InvalidTransition
//! ```
//!
//! ## Rules
//! - Names are unique.
//! - Every state change goes through [`Registry::transition`].
//! - A run (`generation`) starts on every `Starting`; failure reports from older
//!   runs are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ServiceError, SupervisorError};
use crate::services::{ServiceRuntime, ServiceSpec, ServiceState};

/// One recorded service failure.
#[derive(Debug, Clone)]
pub struct ServiceFailure {
    /// Service name.
    pub service: String,
    /// What went wrong.
    pub error: ServiceError,
    /// When it was recorded.
    pub at: SystemTime,
}

pub(crate) struct Entry {
    pub(crate) spec: ServiceSpec,
    pub(crate) name: Arc<str>,
    pub(crate) state: ServiceState,
    pub(crate) generation: u64,
    /// Set while `start` has been called and `stop` has not completed.
    pub(crate) runtime: Option<ServiceRuntime>,
    pub(crate) restarts: u32,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    failures: Vec<ServiceFailure>,
}

impl Registry {
    pub(crate) fn register(&mut self, spec: ServiceSpec) -> Result<(), SupervisorError> {
        let name = spec.name().to_string();
        if self.index.contains_key(&name) {
            return Err(SupervisorError::DuplicateService(name));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            spec,
            name: Arc::from(name),
            state: ServiceState::Created,
            generation: 0,
            runtime: None,
            restarts: 0,
        });
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut Entry, SupervisorError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.entries[i]),
            None => Err(SupervisorError::UnknownService(name.to_string())),
        }
    }

    pub(crate) fn state(&self, name: &str) -> Option<ServiceState> {
        self.get(name).map(|e| e.state)
    }

    pub(crate) fn states(&self) -> Vec<(String, ServiceState)> {
        self.entries
            .iter()
            .map(|e| (e.name.to_string(), e.state))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Moves `name` to `next`, enforcing the lifecycle state machine.
    pub(crate) fn transition(
        &mut self,
        name: &str,
        next: ServiceState,
    ) -> Result<ServiceState, SupervisorError> {
        let entry = self.get_mut(name)?;
        let from = entry.state;
        if !from.can_transition_to(next) {
            return Err(SupervisorError::InvalidTransition {
                service: name.to_string(),
                from: from.as_str(),
                to: next.as_str(),
            });
        }
        if next == ServiceState::Starting {
            entry.generation += 1;
        }
        entry.state = next;
        Ok(from)
    }

    pub(crate) fn record_failure(&mut self, service: &str, error: ServiceError) {
        self.failures.push(ServiceFailure {
            service: service.to_string(),
            error,
            at: SystemTime::now(),
        });
    }

    pub(crate) fn failures(&self) -> Vec<ServiceFailure> {
        self.failures.clone()
    }

    /// Dependency-respecting start order; ties keep registration order.
    pub(crate) fn start_order(&self) -> Result<Vec<String>, SupervisorError> {
        let n = self.entries.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, e) in self.entries.iter().enumerate() {
            for dep in e.spec.dependencies() {
                let Some(&j) = self.index.get(dep) else {
                    return Err(SupervisorError::UnknownDependency {
                        service: e.name.to_string(),
                        dependency: dep.clone(),
                    });
                };
                pending[i] += 1;
                dependents[j].push(i);
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut done = vec![false; n];
        while order.len() < n {
            let Some(next) = (0..n).find(|&i| !done[i] && pending[i] == 0) else {
                let cycle = (0..n)
                    .filter(|&i| !done[i])
                    .map(|i| self.entries[i].name.to_string())
                    .collect();
                return Err(SupervisorError::DependencyCycle(cycle));
            };
            done[next] = true;
            for &d in &dependents[next] {
                pending[d] -= 1;
            }
            order.push(self.entries[next].name.to_string());
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Service, ServiceContext};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Service for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn start(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn spec(name: &'static str, deps: &[&str]) -> ServiceSpec {
        deps.iter()
            .fold(ServiceSpec::new(Arc::new(Named(name))), |s, d| s.depends_on(*d))
    }

    fn registry(specs: Vec<ServiceSpec>) -> Registry {
        let mut r = Registry::default();
        for s in specs {
            r.register(s).unwrap();
        }
        r
    }

    #[test]
    fn test_independent_services_keep_registration_order() {
        let r = registry(vec![spec("db", &[]), spec("stt", &[]), spec("tts", &[])]);
        assert_eq!(r.start_order().unwrap(), vec!["db", "stt", "tts"]);
    }

    #[test]
    fn test_dependencies_start_first() {
        let r = registry(vec![
            spec("orchestrator", &["stt", "tts"]),
            spec("stt", &["db"]),
            spec("tts", &[]),
            spec("db", &[]),
        ]);
        assert_eq!(
            r.start_order().unwrap(),
            vec!["tts", "db", "stt", "orchestrator"]
        );
    }

    #[test]
    fn test_unknown_dependency_and_cycle_are_rejected() {
        let r = registry(vec![spec("stt", &["audio"])]);
        assert!(matches!(
            r.start_order(),
            Err(SupervisorError::UnknownDependency { ref dependency, .. }) if dependency == "audio"
        ));

        let r = registry(vec![spec("a", &["b"]), spec("b", &["a"]), spec("c", &[])]);
        match r.start_order() {
            Err(SupervisorError::DependencyCycle(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut r = registry(vec![spec("db", &[])]);
        assert!(matches!(
            r.register(spec("db", &[])),
            Err(SupervisorError::DuplicateService(_))
        ));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_transitions_follow_the_state_machine() {
        let mut r = registry(vec![spec("db", &[])]);
        assert_eq!(
            r.transition("db", ServiceState::Starting).unwrap(),
            ServiceState::Created
        );
        assert_eq!(r.get("db").map(|e| e.generation), Some(1));

        let err = r.transition("db", ServiceState::Stopped).unwrap_err();
        assert_eq!(err.as_label(), "supervisor_invalid_transition");
        assert_eq!(r.state("db"), Some(ServiceState::Starting));
        assert!(matches!(
            r.transition("nope", ServiceState::Starting),
            Err(SupervisorError::UnknownService(_))
        ));
    }
}

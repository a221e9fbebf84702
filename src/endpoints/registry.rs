//! Endpoint registry.
//!
//! Immutable once built. Injecting endpoints produces a new registry that
//! shares every existing definition with the old one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::ApiError;

use super::definition::{EndpointDefinition, EndpointKind};

/// What to do when an injected endpoint name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideExisting {
    /// Keep the existing definition and log a warning.
    #[default]
    No,
    /// Replace the existing definition.
    Yes,
    /// Fail the injection.
    Throw,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Arc<EndpointDefinition>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EndpointDefinition>> {
        self.endpoints.get(name)
    }

    /// Look up `name` and check that it is of an acceptable kind.
    pub fn require(
        &self,
        name: &str,
        accepts: impl Fn(EndpointKind) -> bool,
        expected: EndpointKind,
    ) -> Result<&Arc<EndpointDefinition>, ApiError> {
        let definition = self
            .endpoints
            .get(name)
            .ok_or_else(|| ApiError::unknown_endpoint(name))?;
        if accepts(definition.kind) {
            Ok(definition)
        } else {
            Err(ApiError::WrongEndpointKind {
                name: name.to_string(),
                expected,
                actual: definition.kind,
            })
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Copy-on-extend: a new registry with `definitions` added.
    pub fn extend<I>(&self, definitions: I, override_existing: OverrideExisting) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = EndpointDefinition>,
    {
        let mut endpoints = self.endpoints.clone();
        for definition in definitions {
            if endpoints.contains_key(&definition.name) {
                match override_existing {
                    OverrideExisting::Yes => {}
                    OverrideExisting::No => {
                        warn!(
                            endpoint = %definition.name,
                            "Endpoint already defined; keeping the existing definition"
                        );
                        continue;
                    }
                    OverrideExisting::Throw => {
                        return Err(ApiError::EndpointExists(definition.name.clone()));
                    }
                }
            }
            endpoints.insert(definition.name.clone(), Arc::new(definition));
        }
        Ok(Self { endpoints })
    }
}

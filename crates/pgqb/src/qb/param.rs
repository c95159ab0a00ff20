//! Parameter storage using Arc for clone-friendly query descriptors.

use std::sync::Arc;

use tokio_postgres::types::ToSql;

use crate::value::Cell;

/// A clone-friendly parameter wrapper using Arc.
///
/// Descriptors are copied on every builder step, so values are shared rather
/// than duplicated.
#[derive(Clone)]
pub struct Param(pub(crate) Arc<dyn ToSql + Send + Sync>);

impl Param {
    /// Create a new parameter from any ToSql value.
    pub fn new<T: ToSql + Send + Sync + 'static>(value: T) -> Self {
        Param(Arc::new(value))
    }

    /// Create a parameter from a JSON value; its SQL type is inferred by the server.
    pub fn cell(value: serde_json::Value) -> Self {
        Param::new(Cell(value))
    }

    /// Get a reference to the inner value as a ToSql trait object.
    pub fn as_ref(&self) -> &(dyn ToSql + Sync) {
        &*self.0 as &(dyn ToSql + Sync)
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0, f)
    }
}

/// An ordered collection of bind values; placeholder `$n` is entry `n - 1`.
#[derive(Clone, Debug, Default)]
pub struct ParamList {
    params: Vec<Param>,
}

impl ParamList {
    /// Create a new empty parameter list.
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based index.
    pub fn push<T: ToSql + Send + Sync + 'static>(&mut self, value: T) -> usize {
        self.push_param(Param::new(value))
    }

    /// Add a pre-wrapped Param and return its 1-based index.
    pub fn push_param(&mut self, param: Param) -> usize {
        self.params.push(param);
        self.params.len()
    }

    /// Add a parameter and return its `$n` placeholder.
    pub(crate) fn placeholder(&mut self, param: &Param) -> String {
        format!("${}", self.push_param(param.clone()))
    }

    /// Get the current parameter count.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate over the stored parameters in placeholder order.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Get all parameters as references for tokio-postgres.
    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }

    /// Debug renderings of every parameter, in placeholder order.
    pub fn debug_strings(&self) -> Vec<String> {
        self.params.iter().map(|p| format!("{p:?}")).collect()
    }
}

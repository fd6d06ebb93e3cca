//! Batch job definitions

use crate::error::Result;
use std::fmt;

/// A named unit of work producing a value of type `T`
pub struct BatchJob<T> {
    pub name: String,
    pub operation: Box<dyn FnOnce() -> Result<T> + Send>,
}

impl<T> BatchJob<T> {
    pub fn new<F>(name: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self {
            name: name.into(),
            operation: Box::new(operation),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn run(self) -> Result<T> {
        (self.operation)()
    }
}

impl<T> fmt::Debug for BatchJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchJob").field("name", &self.name).finish()
    }
}

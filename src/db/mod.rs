mod repository;
mod schema;

pub use repository::{LinkOutcome, Repository};

#[cfg(test)]
pub(crate) use repository::tests as fixtures;

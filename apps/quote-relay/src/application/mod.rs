//! Application Layer - Port definitions.
//!
//! This layer defines the interfaces the relay core depends on. Concrete
//! adapters live in the infrastructure layer.

/// Port interfaces for external collaborators.
pub mod ports;

//! Keel Core: the management model tree, resource addresses, operations,
//! schema descriptions and service names shared by the kernel.

pub mod address;
pub mod error;
pub mod model;
pub mod operation;
pub mod schema;
pub mod service_name;
pub mod types;

pub use address::{PathAddress, PathElement, WILDCARD};
pub use error::ModelError;
pub use model::ModelNode;
pub use operation::Operation;
pub use schema::{
    AttributeDescription, ChildDescription, OperationDescription, ResourceDescription,
    ValidationResult,
};
pub use service_name::ServiceName;
pub use types::ModelType;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}

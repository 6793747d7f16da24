pub mod error;
pub mod id;
pub mod model;
pub mod service;
pub mod supplement;
pub mod supplier;

pub use error::{PolicyError, PolicyErrorKind};
pub use id::PolicyId;
pub use model::ServicePolicy;
pub use service::{Service, ServiceGroup, ServiceMethod, ServicePath};
pub use supplement::Supplement;
pub use supplier::{GovernancePolicy, PolicySupplier, SnapshotPolicySupplier};

pub mod allocation;
pub mod error;
pub mod function;
pub mod lane;
pub mod metadata;
pub mod router;
pub mod types;
pub mod variable;

pub use error::{LiveError, LiveErrorKind};
pub use lane::{LANE_HEADER, Lane, LaneResolver, LaneRule, LaneSpace};
pub use metadata::{LaneMetadata, LiveDomainMetadata, LiveMetadata, RouteSource};
pub use router::UnitRouter;
pub use types::{Cell, LiveSpace, Location, Unit, UnitRange, UnitRule};

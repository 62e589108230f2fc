pub mod aggregate;
pub mod attribution;
pub mod labels;
pub mod output;

pub use aggregate::{RegionAttributionTensor, RegionMap, aggregate};
pub use attribution::{AncestryCall, AttributionTensor, Attributor, Scorer, ShapeError, call_ancestry};
pub use labels::{LabelDictionary, LabelError};

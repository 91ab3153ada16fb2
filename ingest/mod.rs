pub mod data;
pub mod schema;
pub mod table;

pub use data::{DataError, load_all_raters, load_observations};
pub use schema::{FactorKind, FactorSpec, Rater};
pub use table::{FactorColumn, FactorValues, Observation, ObservationTable};

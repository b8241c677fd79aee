//! Request pipeline: validation, input resolution, output shaping, route execution.

pub mod executor;
pub mod input;
pub mod output;
pub mod validation;

pub use executor::{Outcome, RouteExecutor};
pub use input::{InputResolver, RequestParts, ResolvedInput};
pub use output::OutputShaper;
pub use validation::{check_field, Validator};

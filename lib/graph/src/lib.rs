//! The graph-file side of manifold: the declarative model a user writes,
//! loading it from JSON, and every check that must pass before the runner
//! is allowed to create pipes and fork children.

mod cmd;
pub use cmd::*;

mod errors;
pub use errors::*;

mod labels;
pub use labels::*;

mod spec;
pub use spec::*;

mod validate;
pub use validate::*;

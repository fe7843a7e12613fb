//! # Otter VM External References
//!
//! Registry of addresses outside generated code that generated code refers
//! to: runtime functions, builtins, runtime fields, numeric constants and
//! stats counters.
//!
//! ## Design
//!
//! - **RuntimeContext**: process-scoped tables every reference resolves against
//! - **ExternalConstants**: double constants and lazily built math-exp tables
//! - **Redirector**: maps host functions to the address generated code calls

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod constants;
pub mod context;
pub mod counters;
pub mod error;
pub mod external_reference;
pub mod ieee;
pub mod redirect;

pub use constants::{DoubleConstant, ExternalConstants, MathExpTables};
pub use context::{
    AddressId, Builtin, BuiltinId, CFunction, CFunctionId, RuntimeContext, RuntimeContextBuilder,
    RuntimeData, RuntimeField, RuntimeFunction, RuntimeFunctionId,
};
pub use counters::StatsCounter;
pub use error::{ExternalReferenceError, Result};
pub use external_reference::ExternalReference;
pub use redirect::{CallType, NoRedirect, Redirector, TrampolineRedirector};

//! Error handling foundation for b2c-signin.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums and wraps lower-layer reports with `Report::context` when an error
//! crosses a layer boundary.

use rootcause::Report;

/// Result alias over a rootcause [`Report`].
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

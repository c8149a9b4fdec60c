//! External service integrations.

pub mod ad_unit_directory {
    pub use crate::ad_unit_directory::*;
}

pub mod circuit_breaker {
    pub use crate::circuit_breaker::*;
}

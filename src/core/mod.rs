// Forecast pipeline modules and shared errors/models
pub mod forecast_client {
    pub use crate::forecast_client::*;
}

pub mod forecast_models {
    pub use crate::forecast_models::*;
}

pub mod scheduler {
    pub use crate::scheduler::*;
}

pub mod credential_cache {
    pub use crate::credential_cache::*;
}

pub mod soap {
    pub use crate::soap_compiler::{compile, validate};
    pub use crate::soap_decoder::{decode, decode_fault, DecodedResponse};
}

pub mod errors {
    pub use crate::errors::*;
}

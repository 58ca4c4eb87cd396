// Domain-layer modules and shared errors/models
pub mod validator {
    pub use crate::validator::*;
}

pub mod rate_limiter {
    pub use crate::rate_limiter::*;
}

pub mod origin_guard {
    pub use crate::origin_guard::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}

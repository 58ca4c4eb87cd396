//! External service integrations.

pub mod email_transport {
    pub use crate::email_transport::*;
}

pub mod email_dispatcher {
    pub use crate::email_dispatcher::*;
}

pub mod email_templates {
    pub use crate::email_templates::*;
}

pub mod webhook_models {
    pub use crate::webhook_models::*;
}

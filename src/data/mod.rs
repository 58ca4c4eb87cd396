//! Data access layer.

pub mod db {
    pub use crate::db::*;
}

pub mod lead_store {
    pub use crate::lead_store::*;
}

pub mod application;
pub mod observability;
pub mod runtime;
pub mod scaling;

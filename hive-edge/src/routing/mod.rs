//! Route resolution and API version negotiation

pub mod matcher;
pub mod route;
pub mod version;

pub use matcher::{compile_glob, PathSet};
pub use route::{Route, RouteTable};
pub use version::{ApiVersion, Negotiated, VersionPolicy, VersionSource};

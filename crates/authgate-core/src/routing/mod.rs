//! Ordered route table with segment-based path templates

pub mod pattern;
pub mod table;

pub use pattern::{PathPattern, Segment};
pub use table::{Route, RouteTable};

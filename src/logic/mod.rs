pub mod coalescer;
pub mod fetch;

pub use coalescer::*;
pub use fetch::*;

pub mod class;
pub mod common;
pub mod filter;
pub mod instance;
pub mod schema;

pub use class::*;
pub use common::*;
pub use filter::*;
pub use instance::*;
pub use schema::*;

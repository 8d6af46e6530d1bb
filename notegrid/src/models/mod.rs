mod common;
mod output;
mod region;

pub use common::*;
pub use output::*;
pub use region::*;

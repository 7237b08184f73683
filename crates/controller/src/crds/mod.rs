pub mod buildrun;
pub mod taskrun;

pub use buildrun::*;
pub use taskrun::*;

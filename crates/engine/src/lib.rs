pub mod convert;
pub mod error;
pub mod fees;
pub mod notify;
pub mod resolve;

pub use convert::*;
pub use error::*;
pub use fees::*;
pub use notify::*;
pub use resolve::*;

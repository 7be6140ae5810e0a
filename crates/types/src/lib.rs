pub mod address_map;
pub mod coin;
pub mod conversion;
pub mod deposit;
pub mod pair;
pub mod tx;

pub use address_map::*;
pub use coin::*;
pub use conversion::*;
pub use deposit::*;
pub use pair::*;
pub use tx::*;

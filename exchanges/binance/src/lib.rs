pub mod decode;
pub mod driver;
pub mod symbols;
pub mod weights;

pub use driver::BinanceDriver;

pub mod ibeacon;
pub mod local;

pub use local::{LocalScanner, run};

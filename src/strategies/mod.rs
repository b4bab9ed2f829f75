pub mod dca;
pub mod traits;

pub mod apple;
pub mod crypto;
pub mod duration;
pub mod logging;

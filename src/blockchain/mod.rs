pub mod bridge;
pub mod traits;

pub mod position;
pub mod transfer;

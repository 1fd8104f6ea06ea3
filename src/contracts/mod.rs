//! Contract ABI definitions

pub mod mirror_bridge;

pub mod blocks;
pub mod rolling;

pub use blocks::{hash_blocks, BlockInfo, DEFAULT_BLOCK_SIZE};
pub use rolling::RollingChecksum;

//! stakeindex-testkit — scripted chains for StakeIndex tests.
//!
//! ```rust,ignore
//! use stakeindex_testkit::{fixtures::ops, BlockSpec, ChainBuilder};
//!
//! let mut chain = ChainBuilder::new().await?;
//! chain.bake(BlockSpec::new().op(ops::transaction(USERS[0], USERS[2], 1_000, 10))).await?;
//! let node = chain.node(); // serves every baked block
//! ```

pub mod chain;
pub mod fixtures;
pub mod node;

pub use chain::{BlockSpec, ChainBuilder};
pub use node::{mock_seed, MockNode};

//! Rows materialized by the replay engine.

pub mod account;
pub mod block;
pub mod cycle;
pub mod operation;
pub mod protocol;
pub mod rights;
pub mod state;
pub mod statistics;
pub mod voting;

pub use account::{Account, AccountKind};
pub use block::{Block, BlockEvents, OperationKinds};
pub use cycle::{BakerCycle, Cycle, SnapshotBalance};
pub use operation::{
    InternalTransfer, ManagerInfo, Operation, OperationBody, OperationKind, OperationStatus, Slashing,
};
pub use protocol::{Protocol, ProtocolConstants};
pub use rights::{BakingRight, RightKey, RightKind, RightStatus};
pub use state::{AppState, SyncStatus};
pub use statistics::{Statistics, SupplyTotals};
pub use voting::{PeriodKind, PeriodStatus, Vote, VoterStatus, VotingPeriod, VotingSnapshot};

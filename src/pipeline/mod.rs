//! The incremental pipeline: window selection, normalization, idempotent
//! loading, bounded fan-out, and the runners that tie them together.

pub mod batch; // bounded worker pool with partial-failure isolation
pub mod load; // merge-on-conflict writes behind unit transactions
pub mod normalize; // raw payloads -> canonical records
pub mod runner; // daily game ETL + market board sync
pub mod window; // watermark-driven date ranges

pub use batch::{BatchCoordinator, BatchReport};
pub use load::{GameUnit, LoadEngine, LoadOutcome};
pub use normalize::{PlayerBoxScore, RecordError, RecordNormalizer};
pub use runner::{hydrate_resolver, BoardSync, EtlRunReport, GameEtl, GAME_ETL_JOB};
pub use window::{WatermarkAdvance, WindowSelector};

//! Identity Module - Canonical Entity Resolution
//!
//! Every external source spells teams, players, and games its own way. This
//! module owns the mapping from source-scoped raw tokens onto the canonical
//! identity space:
//! 1. Exact source-scoped alias lookup
//! 2. Deterministic normalization (case-fold, punctuation, abbreviations)
//! 3. Fuzzy name matching, players only, with audited learning

pub mod resolver;
pub mod tokens;

pub use resolver::{IdentityResolver, LearnedAlias, ResolutionMethod, UnresolvedAlias};
pub use tokens::{canonical_team_abbrev, normalize_player_name, normalize_token, TEAM_REGISTRY};

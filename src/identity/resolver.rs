//! Source-scoped alias resolution onto the canonical identity space.
//!
//! Resolution order is exact alias → deterministic normalization → fuzzy
//! name match (players only). Non-exact successes become learned aliases:
//! they are recorded in the table, queued for persistence, and logged so
//! every heuristic decision has an audit trail.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity::tokens::{
    canonical_team_abbrev, normalize_player_name, normalize_token, TEAM_REGISTRY,
};
use crate::models::EntityKind;

/// Tokens shorter than this never enter the fuzzy scan; edit distance on
/// tiny strings matches nearly everything.
const MIN_FUZZY_LEN: usize = 4;

/// No mapping exists and no heuristic was confident. Recoverable: the caller
/// skips the record, never the batch.
#[derive(Debug, Clone, Error)]
#[error("no canonical {} mapping for token {token:?} from source {source:?}", kind.as_str())]
pub struct UnresolvedAlias {
    // Raw identifier opts out of thiserror's implicit source-field detection;
    // this is the data source name, not an error cause.
    pub r#source: String,
    pub kind: EntityKind,
    pub token: String,
}

/// How a mapping came to exist; persisted with the alias for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Carried in alongside a registered entity (seed data or primary feed).
    Import,
    /// Matched after case-folding, punctuation stripping, or the
    /// abbreviation table.
    Normalized,
    /// Matched by edit distance against known player names.
    Fuzzy,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ResolutionMethod::Import => "import",
            ResolutionMethod::Normalized => "normalized",
            ResolutionMethod::Fuzzy => "fuzzy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(ResolutionMethod::Import),
            "normalized" => Some(ResolutionMethod::Normalized),
            "fuzzy" => Some(ResolutionMethod::Fuzzy),
            _ => None,
        }
    }
}

/// An alias mapping created during this process's lifetime, queued until the
/// caller flushes it to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedAlias {
    pub source: String,
    pub kind: EntityKind,
    pub alias: String,
    pub canonical_id: String,
    pub method: ResolutionMethod,
    pub learned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct EntityEntry {
    display_name: String,
    normalized_name: String,
    team_id: Option<String>,
    last_seen: u64,
}

#[derive(Default)]
struct AliasTable {
    /// (source, kind, raw token) → canonical id. Exact and source-scoped.
    aliases: HashMap<(String, EntityKind, String), String>,
    entities: HashMap<(EntityKind, String), EntityEntry>,
    seen_counter: u64,
    pending: Vec<LearnedAlias>,
}

struct Candidate {
    canonical_id: String,
    distance: usize,
    team_match: bool,
    last_seen: u64,
}

/// Shared alias table. Reads take a shared lock; learning takes the write
/// lock and re-checks, so concurrent workers racing on the same novel token
/// converge on one mapping.
pub struct IdentityResolver {
    table: RwLock<AliasTable>,
    fuzzy_max_distance: usize,
}

impl IdentityResolver {
    pub fn new(fuzzy_max_distance: usize) -> Self {
        Self {
            table: RwLock::new(AliasTable::default()),
            fuzzy_max_distance,
        }
    }

    /// Resolver with the canonical club registry pre-registered.
    pub fn with_seeded_teams(fuzzy_max_distance: usize) -> Self {
        let resolver = Self::new(fuzzy_max_distance);
        for (abbrev, name) in TEAM_REGISTRY {
            resolver.register_entity(EntityKind::Team, abbrev, name, None, None);
        }
        resolver
    }

    /// Upsert a canonical entity, optionally importing the exact alias the
    /// sighting arrived under. Registration bumps the entity's recency,
    /// which is what fuzzy tie-breaking means by "most recently seen".
    pub fn register_entity(
        &self,
        kind: EntityKind,
        canonical_id: &str,
        display_name: &str,
        team_id: Option<&str>,
        source_alias: Option<(&str, &str)>,
    ) {
        let mut table = self.table.write();
        table.seen_counter += 1;
        let seen = table.seen_counter;

        let normalized_name = match kind {
            EntityKind::Player => normalize_player_name(display_name),
            _ => normalize_token(display_name),
        };
        let entry = table
            .entities
            .entry((kind, canonical_id.to_string()))
            .or_insert_with(|| EntityEntry {
                display_name: String::new(),
                normalized_name: String::new(),
                team_id: None,
                last_seen: 0,
            });
        entry.display_name = display_name.to_string();
        entry.normalized_name = normalized_name;
        if team_id.is_some() {
            entry.team_id = team_id.map(str::to_string);
        }
        entry.last_seen = seen;
        drop(table);

        if let Some((source, raw)) = source_alias {
            self.learn_locked(source, kind, raw.trim(), canonical_id, ResolutionMethod::Import, 0);
        }
    }

    /// Replay a persisted alias row into the table without re-queueing it
    /// for persistence. Used at startup hydration.
    pub fn import_alias(&self, source: &str, kind: EntityKind, alias: &str, canonical_id: &str) {
        let mut table = self.table.write();
        table.aliases.insert(
            (source.to_string(), kind, alias.trim().to_string()),
            canonical_id.to_string(),
        );
    }

    pub fn resolve(
        &self,
        source: &str,
        kind: EntityKind,
        raw_token: &str,
    ) -> Result<String, UnresolvedAlias> {
        self.resolve_with_context(source, kind, raw_token, None)
    }

    /// Player resolution with an optional canonical team id as tie-break
    /// context for ambiguous names.
    pub fn resolve_player(
        &self,
        source: &str,
        raw_token: &str,
        team_context: Option<&str>,
    ) -> Result<String, UnresolvedAlias> {
        self.resolve_with_context(source, EntityKind::Player, raw_token, team_context)
    }

    pub fn resolve_with_context(
        &self,
        source: &str,
        kind: EntityKind,
        raw_token: &str,
        team_context: Option<&str>,
    ) -> Result<String, UnresolvedAlias> {
        let token = raw_token.trim();
        if token.is_empty() {
            return Err(unresolved(source, kind, raw_token));
        }

        {
            let table = self.table.read();
            if let Some(id) =
                table
                    .aliases
                    .get(&(source.to_string(), kind, token.to_string()))
            {
                return Ok(id.clone());
            }
        }

        let candidates = match kind {
            EntityKind::Team => self.team_candidates(token),
            EntityKind::Player => self.player_candidates(token, team_context),
            EntityKind::Game => self.game_candidates(token),
        };

        let Some(best) = pick_best(candidates) else {
            return Err(unresolved(source, kind, token));
        };

        let method = if best.distance == 0 {
            ResolutionMethod::Normalized
        } else {
            ResolutionMethod::Fuzzy
        };
        Ok(self.learn_locked(source, kind, token, &best.canonical_id, method, best.distance))
    }

    /// Drain aliases learned since the last call, for persistence.
    pub fn drain_learned(&self) -> Vec<LearnedAlias> {
        std::mem::take(&mut self.table.write().pending)
    }

    pub fn alias_count(&self) -> usize {
        self.table.read().aliases.len()
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.table
            .read()
            .entities
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    fn team_candidates(&self, token: &str) -> Vec<Candidate> {
        let table = self.table.read();
        if let Some(abbrev) = canonical_team_abbrev(token) {
            if let Some(entry) = table.entities.get(&(EntityKind::Team, abbrev.to_string())) {
                return vec![Candidate {
                    canonical_id: abbrev.to_string(),
                    distance: 0,
                    team_match: false,
                    last_seen: entry.last_seen,
                }];
            }
        }
        let norm = normalize_token(token);
        if norm.is_empty() {
            return Vec::new();
        }
        exact_name_candidates(&table, EntityKind::Team, &norm)
    }

    fn game_candidates(&self, token: &str) -> Vec<Candidate> {
        let table = self.table.read();
        let norm = normalize_token(token);
        if norm.is_empty() {
            return Vec::new();
        }
        exact_name_candidates(&table, EntityKind::Game, &norm)
    }

    fn player_candidates(&self, token: &str, team_context: Option<&str>) -> Vec<Candidate> {
        let table = self.table.read();
        let norm = normalize_player_name(token);
        if norm.is_empty() {
            return Vec::new();
        }
        let allow_fuzzy = norm.chars().count() >= MIN_FUZZY_LEN;

        let mut out = Vec::new();
        for ((kind, id), entry) in &table.entities {
            if *kind != EntityKind::Player {
                continue;
            }
            let distance = strsim::levenshtein(&norm, &entry.normalized_name);
            if distance == 0 || (allow_fuzzy && distance <= self.fuzzy_max_distance) {
                out.push(Candidate {
                    canonical_id: id.clone(),
                    distance,
                    team_match: team_context.is_some()
                        && entry.team_id.as_deref() == team_context,
                    last_seen: entry.last_seen,
                });
            }
        }
        out
    }

    /// Record a mapping under the write lock, re-checking first so a racing
    /// worker's earlier decision wins and no divergent mapping is created.
    fn learn_locked(
        &self,
        source: &str,
        kind: EntityKind,
        token: &str,
        canonical_id: &str,
        method: ResolutionMethod,
        distance: usize,
    ) -> String {
        let mut table = self.table.write();
        let key = (source.to_string(), kind, token.to_string());
        if let Some(existing) = table.aliases.get(&key) {
            return existing.clone();
        }
        table.aliases.insert(key, canonical_id.to_string());
        table.pending.push(LearnedAlias {
            source: source.to_string(),
            kind,
            alias: token.to_string(),
            canonical_id: canonical_id.to_string(),
            method,
            learned_at: Utc::now(),
        });
        drop(table);

        match method {
            ResolutionMethod::Import => {
                debug!(source, kind = kind.as_str(), alias = token, canonical = canonical_id, "Imported alias");
            }
            ResolutionMethod::Normalized => {
                info!(source, kind = kind.as_str(), alias = token, canonical = canonical_id, "🔗 Learned alias via normalization");
            }
            ResolutionMethod::Fuzzy => {
                warn!(source, kind = kind.as_str(), alias = token, canonical = canonical_id, distance, "🔎 Learned alias via fuzzy name match");
            }
        }
        canonical_id.to_string()
    }
}

fn unresolved(source: &str, kind: EntityKind, token: &str) -> UnresolvedAlias {
    UnresolvedAlias {
        source: source.to_string(),
        kind,
        token: token.to_string(),
    }
}

/// Deterministic candidate order: closest first, then matching team context,
/// then most recently seen, then canonical id as the final total order.
fn pick_best(mut candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| b.team_match.cmp(&a.team_match))
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
    candidates.into_iter().next()
}

fn exact_name_candidates(table: &AliasTable, kind: EntityKind, norm: &str) -> Vec<Candidate> {
    table
        .entities
        .iter()
        .filter(|((k, _), _)| *k == kind)
        .filter(|((_, id), entry)| entry.normalized_name == norm || id.to_lowercase() == norm)
        .map(|((_, id), entry)| Candidate {
            canonical_id: id.clone(),
            distance: 0,
            team_match: false,
            last_seen: entry.last_seen,
        })
        .collect()
}

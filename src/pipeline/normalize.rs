//! Record Normalizer: raw provider payloads into canonical records.
//!
//! Normalization is pure given the resolver's current table: same payload,
//! same output. Anything malformed or out of range is rejected with a
//! record-level error so one bad row never poisons a batch; values are
//! never clamped into validity.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::identity::{normalize_token, IdentityResolver, UnresolvedAlias};
use crate::models::{
    BetSide, BetStatus, BoxScoreStat, EntityKind, GameRecord, GameStatus, MarketQuote, PitchEvent,
    PlayerRecord, PropBet,
};
use crate::providers::RawRecord;
use crate::settlement::metrics::canonical_metric_key;

/// No single-game counting stat plausibly reaches this.
const MAX_STAT_VALUE: f64 = 150.0;
const MIN_RELEASE_SPEED: f64 = 30.0;
const MAX_RELEASE_SPEED: f64 = 110.0;
const MAX_RELEASE_SPIN: f64 = 4000.0;
const MAX_LINE_VALUE: f64 = 100.0;

/// Why one record was dropped. Both variants are recoverable: the record
/// is skipped and counted, the batch continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Unresolved(#[from] UnresolvedAlias),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> RecordError {
    RecordError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// One player's normalized slice of a box score.
#[derive(Debug, Clone)]
pub struct PlayerBoxScore {
    pub player: PlayerRecord,
    pub stats: Vec<BoxScoreStat>,
}

#[derive(Clone)]
pub struct RecordNormalizer {
    resolver: Arc<IdentityResolver>,
}

impl RecordNormalizer {
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        Self { resolver }
    }

    pub fn normalize_game(&self, raw: &RawRecord) -> Result<GameRecord, RecordError> {
        let payload = &raw.payload;
        let game_id = req_token(payload, &["game_pk", "game_id"])?;
        let date = req_date(payload, &["official_date", "date", "game_date"])?;

        let status_token = req_token(payload, &["status", "status_detailed", "detailed_state"])?;
        let status = parse_feed_status(&status_token)
            .ok_or_else(|| invalid("status", format!("unrecognized status {status_token:?}")))?;

        let home = req_token(payload, &["home_team", "home"])?;
        let away = req_token(payload, &["away_team", "away"])?;
        let home_team = self.resolver.resolve(&raw.source, EntityKind::Team, &home)?;
        let away_team = self.resolver.resolve(&raw.source, EntityKind::Team, &away)?;
        if home_team == away_team {
            return Err(invalid("away_team", "home and away resolve to the same club"));
        }

        Ok(GameRecord {
            game_id,
            date,
            home_team,
            away_team,
            status,
            home_score: opt_int(payload, &["home_score"])?,
            away_score: opt_int(payload, &["away_score"])?,
            source: raw.source.clone(),
        })
    }

    /// Normalize one player's box-score entry. Batting stats sit in a flat
    /// `stats` object; an optional `pitching` object carries the pitching
    /// line, whose keys collide with batting names and are remapped
    /// (`hits` -> `hits_allowed`, `strikeouts` -> `pitcher_strikeouts`).
    pub fn normalize_box_score(
        &self,
        raw: &RawRecord,
        game: &GameRecord,
    ) -> Result<PlayerBoxScore, RecordError> {
        let payload = &raw.payload;
        let token = req_token(payload, &["player_id", "mlb_id", "id"])?;
        let display_name = req_token(payload, &["player_name", "name"])?;
        let player_id = canonical_player_id(&token);

        let team_id = match field(payload, &["team", "team_id"]).and_then(token_of) {
            Some(team_token) => {
                match self
                    .resolver
                    .resolve(&raw.source, EntityKind::Team, &team_token)
                {
                    Ok(team) => Some(team),
                    Err(err) => {
                        // Team affiliation is auxiliary metadata; the stat
                        // facts stand on the player id alone.
                        debug!(player = %display_name, error = %err, "Dropping unresolvable team tag");
                        None
                    }
                }
            }
            None => None,
        };

        let mut metrics: BTreeMap<String, f64> = BTreeMap::new();
        if let Some(stats) = payload.get("stats").and_then(Value::as_object) {
            for (key, value) in stats {
                collect_stat(&mut metrics, key, value, false)?;
            }
        }
        if let Some(pitching) = payload.get("pitching").and_then(Value::as_object) {
            for (key, value) in pitching {
                collect_stat(&mut metrics, key, value, true)?;
            }
        }

        let stats = metrics
            .into_iter()
            .map(|(metric, value)| BoxScoreStat {
                game_id: game.game_id.clone(),
                player_id: player_id.clone(),
                metric,
                value,
                carrier_status: game.status,
            })
            .collect();

        Ok(PlayerBoxScore {
            player: PlayerRecord {
                player_id,
                display_name,
                team_id,
            },
            stats,
        })
    }

    pub fn normalize_pitch(
        &self,
        raw: &RawRecord,
        game_id: &str,
    ) -> Result<PitchEvent, RecordError> {
        let payload = &raw.payload;

        let pitch_seq = if let Some(id) = field(payload, &["play_id", "pitch_id"]).and_then(token_of)
        {
            id
        } else {
            let at_bat = opt_int(payload, &["at_bat_index", "ab_index"])?;
            let number = opt_int(payload, &["pitch_number", "pitch_num"])?;
            match (at_bat, number) {
                (Some(at_bat), Some(number)) => format!("{at_bat:03}-{number:02}"),
                _ => return Err(invalid("play_id", "no pitch identifier present")),
            }
        };

        let release_speed = opt_num(payload, &["release_speed", "start_speed"])?
            .map(|v| check_range("release_speed", v, MIN_RELEASE_SPEED, MAX_RELEASE_SPEED))
            .transpose()?;
        let release_spin = opt_num(payload, &["release_spin", "spin_rate"])?
            .map(|v| check_range("release_spin", v, 0.0, MAX_RELEASE_SPIN))
            .transpose()?;

        Ok(PitchEvent {
            game_id: game_id.to_string(),
            pitch_seq,
            inning: opt_int(payload, &["inning"])?,
            pitcher_id: field(payload, &["pitcher_id", "pitcher"])
                .and_then(token_of)
                .map(|t| canonical_player_id(&t)),
            batter_id: field(payload, &["batter_id", "batter"])
                .and_then(token_of)
                .map(|t| canonical_player_id(&t)),
            pitch_type: field(payload, &["pitch_type"]).and_then(token_of),
            release_speed,
            release_spin,
            outcome: field(payload, &["outcome", "description", "result"]).and_then(token_of),
        })
    }

    /// Normalize a price observation. `observed_at` is the snapshot time
    /// used when the payload carries no timestamp of its own.
    pub fn normalize_quote(
        &self,
        raw: &RawRecord,
        observed_at: DateTime<Utc>,
    ) -> Result<MarketQuote, RecordError> {
        let payload = &raw.payload;
        let market_id = req_token(payload, &["market_id", "market"])?;

        let price = if let Some(p) = opt_num(payload, &["price", "implied_probability"])? {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid("price", format!("{p} is not a probability")));
            }
            p
        } else {
            let odds = req_num(payload, &["american_odds", "odds"])?;
            american_to_implied(odds)
                .ok_or_else(|| invalid("american_odds", format!("{odds} is not American odds")))?
        };

        // Runner identity: an explicit player field wins, then the
        // over/under literals, then a team token.
        let runner_id = if let Some(name) = field(payload, &["player_name", "player"]).and_then(token_of)
        {
            let team_context = match field(payload, &["team"]).and_then(token_of) {
                Some(t) => self.resolver.resolve(&raw.source, EntityKind::Team, &t).ok(),
                None => None,
            };
            self.resolver
                .resolve_player(&raw.source, &name, team_context.as_deref())?
        } else {
            let token = req_token(payload, &["runner", "selection"])?;
            let norm = normalize_token(&token);
            if norm == "over" || norm == "under" {
                norm
            } else {
                self.resolver.resolve(&raw.source, EntityKind::Team, &token)?
            }
        };

        let observed_at = match field(payload, &["observed_at", "timestamp"]).and_then(token_of) {
            Some(text) => parse_rfc3339(&text)
                .ok_or_else(|| invalid("observed_at", format!("{text:?} is not RFC 3339")))?,
            None => observed_at,
        };

        Ok(MarketQuote {
            source: raw.source.clone(),
            market_id,
            runner_id,
            line_value: opt_num(payload, &["line", "line_value", "handicap"])?,
            price,
            observed_at,
        })
    }

    /// Normalize a prop offer. Team is required: settlement locates the
    /// referenced game from (team, date), so an offer without a club
    /// affiliation cannot ever settle.
    pub fn normalize_prop(
        &self,
        raw: &RawRecord,
        opened_at: DateTime<Utc>,
    ) -> Result<PropBet, RecordError> {
        let payload = &raw.payload;
        let token = req_token(payload, &["prop_id", "projection_id", "bet_id"])?;
        let bet_id = format!("{}-{}", raw.source, token);

        let team_token = req_token(payload, &["team", "team_abbrev"])?;
        let team_id = self
            .resolver
            .resolve(&raw.source, EntityKind::Team, &team_token)?;

        let name = req_token(payload, &["player_name", "player"])?;
        let player_id = self.resolver.resolve_player(&raw.source, &name, Some(&team_id))?;

        let label = req_token(payload, &["stat_type", "metric"])?;
        let line_value = req_num(payload, &["line", "line_score", "current_line"])?;
        if !line_value.is_finite() || line_value <= 0.0 || line_value > MAX_LINE_VALUE {
            return Err(invalid("line", format!("{line_value} outside (0, {MAX_LINE_VALUE}]")));
        }

        let side_token = req_token(payload, &["side", "over_under"])?;
        let side = parse_side(&side_token)
            .ok_or_else(|| invalid("side", format!("{side_token:?} is neither over nor under")))?;

        let opened_at = match field(payload, &["opened_at", "created_at"]).and_then(token_of) {
            Some(text) => parse_rfc3339(&text)
                .ok_or_else(|| invalid("opened_at", format!("{text:?} is not RFC 3339")))?,
            None => opened_at,
        };

        Ok(PropBet {
            bet_id,
            source: raw.source.clone(),
            player_id,
            team_id,
            game_date: req_date(payload, &["game_date", "date"])?,
            metric: canonical_metric_key(&label),
            line_value,
            side,
            status: BetStatus::Open,
            opened_at,
        })
    }
}

/// American odds to implied probability: +150 -> 0.4, -120 -> 0.545...
/// Magnitudes below 100 are not a valid American quote.
pub fn american_to_implied(odds: f64) -> Option<f64> {
    if !odds.is_finite() {
        None
    } else if odds >= 100.0 {
        Some(100.0 / (odds + 100.0))
    } else if odds <= -100.0 {
        Some(-odds / (-odds + 100.0))
    } else {
        None
    }
}

/// Baseball innings notation to outs: the tenths digit counts outs into
/// the inning and can only be 0, 1 or 2. "6.2" is 20 outs, "5.4" is junk.
pub fn innings_to_outs(innings: f64) -> Option<f64> {
    if !innings.is_finite() || !(0.0..=30.0).contains(&innings) {
        return None;
    }
    let whole = innings.trunc();
    let tenths = ((innings - whole) * 10.0).round();
    if tenths > 2.0 {
        return None;
    }
    Some(whole * 3.0 + tenths)
}

fn parse_feed_status(raw: &str) -> Option<GameStatus> {
    let norm = normalize_token(raw);
    if let Some(status) = GameStatus::parse(&norm) {
        return Some(status);
    }
    if norm.contains("final") || norm.contains("game over") || norm.contains("completed") {
        Some(GameStatus::Final)
    } else if norm.contains("postponed") || norm.contains("cancelled") || norm.contains("canceled")
    {
        Some(GameStatus::Postponed)
    } else if norm.contains("progress")
        || norm.contains("live")
        || norm.contains("warmup")
        || norm.contains("delayed")
        || norm.contains("suspended")
    {
        Some(GameStatus::InProgress)
    } else if norm.contains("scheduled") || norm.contains("pre game") || norm.contains("preview") {
        Some(GameStatus::Scheduled)
    } else {
        None
    }
}

fn parse_side(raw: &str) -> Option<BetSide> {
    match normalize_token(raw).as_str() {
        "over" | "o" => Some(BetSide::Over),
        "under" | "u" => Some(BetSide::Under),
        _ => None,
    }
}

/// Primary-feed player tokens are bare MLB ids; canonical ids carry the
/// namespace prefix so ids from other systems can never collide.
fn canonical_player_id(token: &str) -> String {
    if token.starts_with("mlb-") {
        token.to_string()
    } else {
        format!("mlb-{token}")
    }
}

/// Pitching-line keys that shadow batting names, remapped after slugging.
const PITCHING_KEYS: &[(&str, &str)] = &[
    ("base_on_balls", "walks_allowed"),
    ("earned_runs", "earned_runs"),
    ("hits", "hits_allowed"),
    ("home_runs", "home_runs_allowed"),
    ("strike_outs", "pitcher_strikeouts"),
    ("strikeouts", "pitcher_strikeouts"),
    ("walks", "walks_allowed"),
];

const BATTING_SYNONYMS: &[(&str, &str)] = &[
    ("base_on_balls", "walks"),
    ("rbis", "rbi"),
    ("strike_outs", "strikeouts"),
];

fn collect_stat(
    metrics: &mut BTreeMap<String, f64>,
    key: &str,
    value: &Value,
    pitching: bool,
) -> Result<(), RecordError> {
    let slug = slug_stat_key(key);
    let value = num_of(value)
        .ok_or_else(|| invalid("stats", format!("{slug} is not numeric: {value}")))?;

    if slug == "innings_pitched" {
        let outs = innings_to_outs(value).ok_or_else(|| {
            invalid("stats", format!("innings_pitched {value} has an impossible fraction"))
        })?;
        metrics.insert("pitching_outs".to_string(), outs);
        return Ok(());
    }

    if !value.is_finite() || !(0.0..=MAX_STAT_VALUE).contains(&value) {
        return Err(invalid(
            "stats",
            format!("{slug}={value} outside [0, {MAX_STAT_VALUE}]"),
        ));
    }

    let metric = if pitching {
        PITCHING_KEYS
            .iter()
            .find(|(s, _)| *s == slug)
            .map(|(_, m)| (*m).to_string())
            .unwrap_or_else(|| format!("pitching_{slug}"))
    } else {
        BATTING_SYNONYMS
            .iter()
            .find(|(s, _)| *s == slug)
            .map(|(_, m)| (*m).to_string())
            .unwrap_or(slug)
    };
    metrics.insert(metric, value);
    Ok(())
}

/// Feed stat keys arrive in camelCase or snake_case; fold both to
/// snake_case ("homeRuns" -> "home_runs", "RBI" -> "rbi").
fn slug_stat_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_lower = true;
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

fn field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| payload.get(*name))
        .filter(|v| !v.is_null())
}

fn token_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn num_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn req_token(payload: &Value, names: &'static [&'static str]) -> Result<String, RecordError> {
    let value = field(payload, names).ok_or_else(|| invalid(names[0], "missing"))?;
    token_of(value).ok_or_else(|| invalid(names[0], "expected a non-empty string or number"))
}

fn req_num(payload: &Value, names: &'static [&'static str]) -> Result<f64, RecordError> {
    let value = field(payload, names).ok_or_else(|| invalid(names[0], "missing"))?;
    num_of(value).ok_or_else(|| invalid(names[0], format!("not numeric: {value}")))
}

fn opt_num(payload: &Value, names: &'static [&'static str]) -> Result<Option<f64>, RecordError> {
    match field(payload, names) {
        Some(value) => num_of(value)
            .map(Some)
            .ok_or_else(|| invalid(names[0], format!("not numeric: {value}"))),
        None => Ok(None),
    }
}

fn opt_int(payload: &Value, names: &'static [&'static str]) -> Result<Option<i64>, RecordError> {
    match opt_num(payload, names)? {
        Some(v) if v.fract() == 0.0 => Ok(Some(v as i64)),
        Some(v) => Err(invalid(names[0], format!("{v} is not an integer"))),
        None => Ok(None),
    }
}

fn req_date(payload: &Value, names: &'static [&'static str]) -> Result<NaiveDate, RecordError> {
    let text = req_token(payload, names)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|_| invalid(names[0], format!("{text:?} is not a YYYY-MM-DD date")))
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, RecordError> {
    if !value.is_finite() || !(min..=max).contains(&value) {
        return Err(invalid(field, format!("{value} outside [{min}, {max}]")));
    }
    Ok(value)
}

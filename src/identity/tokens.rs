//! Token normalization and the seeded club tables.
//!
//! Every book and feed spells teams and players its own way; everything here
//! is deterministic string cleanup so the resolver can compare like with
//! like before it ever reaches for fuzzy matching.

/// Canonical club abbreviations and display names, seeded at startup.
pub const TEAM_REGISTRY: &[(&str, &str)] = &[
    ("ATH", "Athletics"),
    ("ATL", "Atlanta Braves"),
    ("AZ", "Arizona Diamondbacks"),
    ("BAL", "Baltimore Orioles"),
    ("BOS", "Boston Red Sox"),
    ("CHC", "Chicago Cubs"),
    ("CIN", "Cincinnati Reds"),
    ("CLE", "Cleveland Guardians"),
    ("COL", "Colorado Rockies"),
    ("CWS", "Chicago White Sox"),
    ("DET", "Detroit Tigers"),
    ("HOU", "Houston Astros"),
    ("KC", "Kansas City Royals"),
    ("LAA", "Los Angeles Angels"),
    ("LAD", "Los Angeles Dodgers"),
    ("MIA", "Miami Marlins"),
    ("MIL", "Milwaukee Brewers"),
    ("MIN", "Minnesota Twins"),
    ("NYM", "New York Mets"),
    ("NYY", "New York Yankees"),
    ("PHI", "Philadelphia Phillies"),
    ("PIT", "Pittsburgh Pirates"),
    ("SD", "San Diego Padres"),
    ("SEA", "Seattle Mariners"),
    ("SF", "San Francisco Giants"),
    ("STL", "St. Louis Cardinals"),
    ("TB", "Tampa Bay Rays"),
    ("TEX", "Texas Rangers"),
    ("TOR", "Toronto Blue Jays"),
    ("WSH", "Washington Nationals"),
];

/// Abbreviation variants seen across books, mapped to the canonical code.
const TEAM_VARIANTS: &[(&str, &str)] = &[
    ("ANA", "LAA"),
    ("ARI", "AZ"),
    ("CHW", "CWS"),
    ("FLA", "MIA"),
    ("KCR", "KC"),
    ("OAK", "ATH"),
    ("SDP", "SD"),
    ("SFG", "SF"),
    ("TBR", "TB"),
    ("WAS", "WSH"),
    ("WSN", "WSH"),
];

/// Case-fold, drop punctuation, collapse whitespace runs to single spaces.
pub fn normalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = true;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Player-name cleanup: normalize, then strip generational suffixes so
/// "Bobby Witt Jr." and "Bobby Witt" compare equal.
pub fn normalize_player_name(raw: &str) -> String {
    let mut name = normalize_token(raw);
    for suffix in [" jr", " sr", " iv", " iii", " ii"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.trim_end().to_string();
            break;
        }
    }
    name
}

/// Map a raw team token to its canonical abbreviation, if the token is an
/// abbreviation at all (full names go through normalized-name matching).
pub fn canonical_team_abbrev(raw: &str) -> Option<&'static str> {
    let token = raw.trim().to_ascii_uppercase();
    if let Some((abbrev, _)) = TEAM_REGISTRY.iter().find(|(a, _)| *a == token) {
        return Some(abbrev);
    }
    TEAM_VARIANTS
        .iter()
        .find(|(variant, _)| *variant == token)
        .map(|(_, canonical)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_token_collapses_punctuation() {
        assert_eq!(normalize_token("St. Louis  Cardinals"), "st louis cardinals");
        assert_eq!(normalize_token("  J.D. Martinez "), "j d martinez");
        assert_eq!(normalize_token("CWS"), "cws");
    }

    #[test]
    fn test_normalize_player_name_strips_suffixes() {
        assert_eq!(normalize_player_name("Bobby Witt Jr."), "bobby witt");
        assert_eq!(normalize_player_name("Luis Garcia Sr."), "luis garcia");
        assert_eq!(normalize_player_name("Charlie Blackmon III"), "charlie blackmon");
        assert_eq!(normalize_player_name("Shohei Ohtani"), "shohei ohtani");
    }

    #[test]
    fn test_variant_abbreviations_map_to_canonical() {
        assert_eq!(canonical_team_abbrev("CHW"), Some("CWS"));
        assert_eq!(canonical_team_abbrev("chw"), Some("CWS"));
        assert_eq!(canonical_team_abbrev("CWS"), Some("CWS"));
        assert_eq!(canonical_team_abbrev("OAK"), Some("ATH"));
        assert_eq!(canonical_team_abbrev("Chicago White Sox"), None);
        assert_eq!(canonical_team_abbrev("ZZZ"), None);
    }
}

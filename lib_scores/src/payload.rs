//! Typed data model for the feeds served over both channels.
//!
//! Every value that crosses the wire is one of the `FeedPayload` variants, so
//! JSON encoding is total and schema-checked at compile time instead of an
//! open-ended dictionary. Pull responses and push frames share the same
//! `FeedResponse` envelope: `{ "data": <payload>, "source": "cache"|"origin" }`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Source;

/// Identifies one cacheable feed. Doubles as the cache key via `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKey {
    /// The headline feed, refreshed on every broadcast tick.
    LiveScores,
    /// Per-player statistics, keyed by player id.
    PlayerStats(String),
    /// League table.
    TeamRankings,
}

impl FeedKey {
    /// Parses the wire form (`live_scores`, `player_stats:{id}`,
    /// `team_rankings`). Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "live_scores" => Some(Self::LiveScores),
            "team_rankings" => Some(Self::TeamRankings),
            _ => match raw.split_once(':') {
                Some(("player_stats", id)) if !id.is_empty() => {
                    Some(Self::PlayerStats(id.to_owned()))
                }
                _ => None,
            },
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LiveScores => f.write_str("live_scores"),
            Self::PlayerStats(id) => write!(f, "player_stats:{id}"),
            Self::TeamRankings => f.write_str("team_rankings"),
        }
    }
}

/// One game on the live scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameScore {
    pub home: String,
    pub away: String,
    pub home_score: u32,
    pub away_score: u32,
    /// Minute of play, 1-based.
    pub minute: u32,
}

/// Statistics for a single player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatLine {
    pub player_id: String,
    pub name: String,
    pub points: u32,
    pub assists: u32,
    pub rebounds: u32,
}

/// One row of the league table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRank {
    pub team: String,
    pub rank: u32,
    pub wins: u32,
    pub losses: u32,
}

/// The payload stored in the cache and pushed to stream clients. Tagged with
/// `kind` so consumers can dispatch without guessing at the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedPayload {
    LiveScores {
        as_of: DateTime<Utc>,
        games: Vec<GameScore>,
    },
    PlayerStats {
        as_of: DateTime<Utc>,
        player: PlayerStatLine,
    },
    TeamRankings {
        as_of: DateTime<Utc>,
        teams: Vec<TeamRank>,
    },
}

/// Response envelope shared by pull responses and push frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResponse {
    pub data: FeedPayload,
    pub source: Source,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parse_known_forms() {
        assert_eq!(FeedKey::parse("live_scores"), Some(FeedKey::LiveScores));
        assert_eq!(FeedKey::parse("team_rankings"), Some(FeedKey::TeamRankings));
        assert_eq!(
            FeedKey::parse("player_stats:23"),
            Some(FeedKey::PlayerStats("23".to_owned()))
        );
    }

    #[test]
    fn key_parse_rejects_garbage() {
        assert_eq!(FeedKey::parse(""), None);
        assert_eq!(FeedKey::parse("player_stats:"), None);
        assert_eq!(FeedKey::parse("live-scores"), None);
        assert_eq!(FeedKey::parse("weather:athens"), None);
    }

    #[test]
    fn key_display_round_trips() {
        for key in [
            FeedKey::LiveScores,
            FeedKey::PlayerStats("lebron".to_owned()),
            FeedKey::TeamRankings,
        ] {
            assert_eq!(FeedKey::parse(&key.to_string()), Some(key));
        }
    }

    #[test]
    fn response_envelope_shape() {
        let response = FeedResponse {
            data: FeedPayload::LiveScores {
                as_of: Utc::now(),
                games: vec![GameScore {
                    home: "PAO".to_owned(),
                    away: "OSFP".to_owned(),
                    home_score: 2,
                    away_score: 1,
                    minute: 74,
                }],
            },
            source: Source::Cache,
        };

        let encoded = serde_json::to_value(&response).expect("payload encoding is total");
        assert_eq!(encoded["source"], "cache");
        assert_eq!(encoded["data"]["kind"], "live_scores");
        assert_eq!(encoded["data"]["games"][0]["home_score"], 2);
    }
}

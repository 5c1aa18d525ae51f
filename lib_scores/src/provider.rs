//! The seam to the upstream data source.
//!
//! The cache and the broadcast driver only ever see `DataProvider`, so the
//! real upstream (a REST API, a database, a partner feed) can be swapped in
//! without touching the runtime machinery. The shipped implementation is
//! `MockScoresProvider`, mirroring the mocked external API this service was
//! built against: it synthesizes plausible, slowly-evolving payloads and can
//! simulate upstream latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use rand::Rng;
use thiserror::Error;

use crate::payload::{FeedKey, FeedPayload, GameScore, PlayerStatLine, TeamRank};

/// Errors surfaced by a fetch. Cloneable so a single in-flight failure can be
/// handed to every waiter of the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The upstream source reported or caused a failure.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
    /// The computation went away before publishing a result.
    #[error("fetch aborted before completing")]
    Aborted,
}

/// Produces a fresh payload for a feed key. May fail; the core imposes no
/// retry or backoff contract, callers decide.
pub trait DataProvider: Send + Sync {
    fn fetch(&self, key: FeedKey) -> BoxFuture<'static, Result<FeedPayload, FetchError>>;
}

const MATCHUPS: [(&str, &str); 4] = [
    ("Hawks", "Wolves"),
    ("Comets", "Harbor"),
    ("Rangers", "Summit"),
    ("Vikings", "Phoenix"),
];

/// Mock upstream. Each fetch advances an internal tick so repeated fetches of
/// the same key return visibly different data, the way a real live feed would.
pub struct MockScoresProvider {
    latency: Duration,
    ticks: Arc<AtomicU64>,
}

impl MockScoresProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    fn live_scores(tick: u64) -> FeedPayload {
        let mut rng = rand::rng();
        let games = MATCHUPS
            .iter()
            .enumerate()
            .map(|(i, (home, away))| {
                let minute = (((tick + 1) * 2 + i as u64 * 11) % 90) as u32 + 1;
                GameScore {
                    home: (*home).to_owned(),
                    away: (*away).to_owned(),
                    home_score: minute / 25 + rng.random_range(0..2),
                    away_score: minute / 30,
                    minute,
                }
            })
            .collect();
        FeedPayload::LiveScores {
            as_of: Utc::now(),
            games,
        }
    }

    fn player_stats(player_id: &str) -> FeedPayload {
        let mut rng = rand::rng();
        FeedPayload::PlayerStats {
            as_of: Utc::now(),
            player: PlayerStatLine {
                player_id: player_id.to_owned(),
                name: format!("Player {player_id}"),
                points: rng.random_range(0..40),
                assists: rng.random_range(0..12),
                rebounds: rng.random_range(0..15),
            },
        }
    }

    fn team_rankings(tick: u64) -> FeedPayload {
        let teams = MATCHUPS
            .iter()
            .flat_map(|(home, away)| [*home, *away])
            .enumerate()
            .map(|(i, team)| {
                let wins = 20 + ((tick + i as u64 * 3) % 10) as u32;
                TeamRank {
                    team: team.to_owned(),
                    rank: i as u32 + 1,
                    wins,
                    losses: 40 - wins,
                }
            })
            .collect();
        FeedPayload::TeamRankings {
            as_of: Utc::now(),
            teams,
        }
    }
}

impl DataProvider for MockScoresProvider {
    fn fetch(&self, key: FeedKey) -> BoxFuture<'static, Result<FeedPayload, FetchError>> {
        let latency = self.latency;
        let ticks = Arc::clone(&self.ticks);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let tick = ticks.fetch_add(1, Ordering::Relaxed);
            Ok(match key {
                FeedKey::LiveScores => Self::live_scores(tick),
                FeedKey::PlayerStats(id) => Self::player_stats(&id),
                FeedKey::TeamRankings => Self::team_rankings(tick),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serves_every_key_namespace() {
        let provider = MockScoresProvider::new(Duration::ZERO);

        match provider.fetch(FeedKey::LiveScores).await.unwrap() {
            FeedPayload::LiveScores { games, .. } => assert_eq!(games.len(), MATCHUPS.len()),
            other => panic!("expected live scores, got {other:?}"),
        }

        match provider
            .fetch(FeedKey::PlayerStats("23".to_owned()))
            .await
            .unwrap()
        {
            FeedPayload::PlayerStats { player, .. } => assert_eq!(player.player_id, "23"),
            other => panic!("expected player stats, got {other:?}"),
        }

        match provider.fetch(FeedKey::TeamRankings).await.unwrap() {
            FeedPayload::TeamRankings { teams, .. } => assert_eq!(teams.len(), 8),
            other => panic!("expected team rankings, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scoreboard_moves_between_fetches() {
        let provider = MockScoresProvider::new(Duration::ZERO);

        let first = provider.fetch(FeedKey::LiveScores).await.unwrap();
        let second = provider.fetch(FeedKey::LiveScores).await.unwrap();

        let minutes = |payload: &FeedPayload| match payload {
            FeedPayload::LiveScores { games, .. } => {
                games.iter().map(|g| g.minute).collect::<Vec<_>>()
            }
            other => panic!("expected live scores, got {other:?}"),
        };
        assert_ne!(minutes(&first), minutes(&second));
    }
}

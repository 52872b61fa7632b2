// In-process league event bus.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::league::{GameId, GameStatus, PickId, PickResult, Scope, SeasonId, TeamId, UserId, Week};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeagueEvent {
    PickSubmitted {
        pick_id: PickId,
        user_id: UserId,
        game_id: GameId,
        week: Week,
        scope: Scope,
        team_id: TeamId,
        by_admin: bool,
    },
    ScoreUpdated {
        game_id: GameId,
        status: GameStatus,
        home_score: Option<i32>,
        away_score: Option<i32>,
    },
    GameFinal {
        game_id: GameId,
        week: Week,
        home_score: Option<i32>,
        away_score: Option<i32>,
    },
    PickScored {
        pick_id: PickId,
        user_id: UserId,
        game_id: GameId,
        scope: Scope,
        result: PickResult,
    },
    SeasonCompleted {
        season_id: SeasonId,
    },
}

/// Broadcast bus. Publishing never blocks; subscribers that fall behind
/// see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LeagueEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: LeagueEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeagueEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(LeagueEvent::SeasonCompleted { season_id: 1 }), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(LeagueEvent::SeasonCompleted { season_id: 2 }), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            LeagueEvent::SeasonCompleted { season_id: 2 }
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(LeagueEvent::GameFinal {
            game_id: 3,
            week: 1,
            home_score: Some(24),
            away_score: Some(17),
        })
        .unwrap();
        assert_eq!(json["type"], "game_final");
        assert_eq!(json["home_score"], 24);
    }
}

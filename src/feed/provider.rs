use async_trait::async_trait;
use chrono::NaiveDate;

use super::FetchError;
use crate::db::models::{FixtureResult, OddsQuote};

/// Per-fixture match statistics beyond the score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureStatistics {
    pub corners: Option<(i32, i32)>,
    pub cards: Option<(i32, i32)>,
    pub fouls: Option<(i32, i32)>,
    pub offsides: Option<(i32, i32)>,
}

impl FixtureStatistics {
    pub fn is_empty(&self) -> bool {
        self == &FixtureStatistics::default()
    }

    /// Copy every known pair onto a result, leaving unknown ones untouched.
    pub fn apply(&self, r: &mut FixtureResult) {
        if let Some((h, a)) = self.corners {
            r.corners_home = Some(h);
            r.corners_away = Some(a);
        }
        if let Some((h, a)) = self.cards {
            r.cards_home = Some(h);
            r.cards_away = Some(a);
        }
        if let Some((h, a)) = self.fouls {
            r.fouls_home = Some(h);
            r.fouls_away = Some(a);
        }
        if let Some((h, a)) = self.offsides {
            r.offsides_home = Some(h);
            r.offsides_away = Some(a);
        }
    }
}

/// Third-party source of fixtures, statistics and odds.
#[async_trait]
pub trait ResultsProvider: Send + Sync {
    /// Every fixture of a league on one calendar day, any status.
    async fn fixtures(
        &self,
        league_id: i64,
        season: i32,
        date: NaiveDate,
    ) -> Result<Vec<FixtureResult>, FetchError>;

    async fn statistics(
        &self,
        fixture_id: i64,
        home_team_id: i64,
    ) -> Result<FixtureStatistics, FetchError>;

    async fn odds(&self, fixture_id: i64) -> Result<Vec<OddsQuote>, FetchError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

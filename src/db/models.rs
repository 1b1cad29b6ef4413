use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::markets::{Metric, Selection};

/// Text-backed status enums stored as lowercase strings.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse().map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(LegStatus {
    Pending => "pending",
    Won => "won",
    Lost => "lost",
    Pushed => "pushed",
    Voided => "voided",
});

text_enum!(TicketStatus {
    Pending => "pending",
    Partial => "partial",
    Won => "won",
    Lost => "lost",
    Void => "void",
});

text_enum!(MarketStatus {
    Open => "open",
    Closed => "closed",
    Resolved => "resolved",
});

text_enum!(PositionStatus {
    Pending => "pending",
    Won => "won",
    Lost => "lost",
    Void => "void",
});

impl LegStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, LegStatus::Pending)
    }
}

/// Coarse lifecycle of a fixture derived from the provider status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Scheduled,
    InPlay,
    Finished,
    Cancelled,
}

impl FixtureState {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "FT" | "AET" | "PEN" => FixtureState::Finished,
            "CANC" | "ABD" | "AWD" | "WO" => FixtureState::Cancelled,
            "NS" | "TBD" | "PST" => FixtureState::Scheduled,
            _ => FixtureState::InPlay,
        }
    }
}

/// One match as stored in the result store. Every stat is independently optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureResult {
    pub fixture_id: i64,
    pub league_id: i64,
    pub season: Option<i32>,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff_at: DateTime<Utc>,
    /// Provider status code: FT / AET / PEN / CANC / ...
    pub status: String,
    pub goals_home: Option<i32>,
    pub goals_away: Option<i32>,
    pub corners_home: Option<i32>,
    pub corners_away: Option<i32>,
    pub cards_home: Option<i32>,
    pub cards_away: Option<i32>,
    pub fouls_home: Option<i32>,
    pub fouls_away: Option<i32>,
    pub offsides_home: Option<i32>,
    pub offsides_away: Option<i32>,
}

impl FixtureResult {
    pub fn state(&self) -> FixtureState {
        FixtureState::from_code(&self.status)
    }

    pub fn is_finished(&self) -> bool {
        self.state() == FixtureState::Finished
    }

    /// `(home, away)` values of a metric, only when both sides are present.
    pub fn pair(&self, metric: Metric) -> Option<(i32, i32)> {
        let (h, a) = match metric {
            Metric::Goals => (self.goals_home, self.goals_away),
            Metric::Corners => (self.corners_home, self.corners_away),
            Metric::Cards => (self.cards_home, self.cards_away),
            Metric::Fouls => (self.fouls_home, self.fouls_away),
            Metric::Offsides => (self.offsides_home, self.offsides_away),
        };
        Some((h?, a?))
    }

    pub fn total(&self, metric: Metric) -> Option<i32> {
        self.pair(metric).map(|(h, a)| h + a)
    }

    pub fn involves(&self, team_id: i64) -> bool {
        self.home_team_id == team_id || self.away_team_id == team_id
    }
}

/// Fixture that has not kicked off yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingFixture {
    pub fixture_id: i64,
    pub league_id: i64,
    pub season: Option<i32>,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff_at: DateTime<Utc>,
}

/// Bookmaker price for one selection on one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub fixture_id: i64,
    pub selection: Selection,
    /// Decimal odds
    pub odds: f64,
    pub bookmaker: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Option<i64>,
    pub status: TicketStatus,
    /// Sorted canonical hash of the leg set
    pub content_hash: String,
    pub seed: u64,
    pub total_odds: f64,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub legs: Vec<TicketLeg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketLeg {
    pub id: Option<i64>,
    pub ticket_id: Option<i64>,
    /// Order of the leg within its ticket
    pub position: i32,
    pub fixture_id: i64,
    pub league_id: i64,
    /// Stored market/side text; parsed at settlement so unknown values stay pending
    pub market: String,
    pub side: String,
    pub line: f64,
    pub odds: f64,
    pub model_probability: f64,
    pub status: LegStatus,
    pub actual_value: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// A settled leg joined with what the calibrator needs.
#[derive(Debug, Clone)]
pub struct SettledLeg {
    pub league_id: i64,
    pub market: String,
    pub side: String,
    pub line: f64,
    pub odds: f64,
    pub status: LegStatus,
}

/// Binary yes/no market, optionally tied to a typed selection on a fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMarket {
    pub id: i64,
    pub question: String,
    pub status: MarketStatus,
    pub closes_at: DateTime<Utc>,
    /// `None` once resolved means the market was voided
    pub winning_outcome: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub yes_pool: f64,
    pub no_pool: f64,
    pub fixture_id: Option<i64>,
    pub market: Option<String>,
    pub side: Option<String>,
    pub line: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPosition {
    pub id: i64,
    pub market_id: i64,
    pub user_id: String,
    /// "yes" | "no"
    pub outcome: String,
    pub stake: f64,
    pub fee: f64,
    pub potential_payout: f64,
    pub status: PositionStatus,
    pub payout: Option<f64>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Calibration record for one `(market, side, line[, league])` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWeight {
    pub market: String,
    pub side: String,
    pub line: f64,
    /// `None` for the global row
    pub league_id: Option<i64>,
    pub wins: u32,
    pub losses: u32,
    pub pushes: u32,
    /// Decided legs: wins + losses
    pub sample_size: u32,
    pub win_rate: f64,
    pub roi: f64,
    pub bayes_rate: f64,
    pub weight: f64,
    pub computed_at: DateTime<Utc>,
}

/// Audit row appended by every job invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Option<i64>,
    pub job: String,
    pub status: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub scanned: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub error_text: Option<String>,
    pub cursor: Option<String>,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
}

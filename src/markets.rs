//! Typed market vocabulary.
//!
//! A selection is resolved into `(MarketKind, Side, line)` once, when the
//! candidate is generated. Settlement reads the same typed fields back and
//! never looks at free-text titles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-match counting statistic tracked by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Goals,
    Corners,
    Cards,
    Fouls,
    Offsides,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Goals,
        Metric::Corners,
        Metric::Cards,
        Metric::Fouls,
        Metric::Offsides,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Goals => "goals",
            Metric::Corners => "corners",
            Metric::Cards => "cards",
            Metric::Fouls => "fouls",
            Metric::Offsides => "offsides",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    TotalGoals,
    BothTeamsScore,
    TotalCorners,
    TotalCards,
    TotalFouls,
    MatchResult,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::TotalGoals => "goals",
            MarketKind::BothTeamsScore => "btts",
            MarketKind::TotalCorners => "corners",
            MarketKind::TotalCards => "cards",
            MarketKind::TotalFouls => "fouls",
            MarketKind::MatchResult => "1x2",
        }
    }

    /// The statistic a leg on this market is settled against.
    pub fn metric(&self) -> Metric {
        match self {
            MarketKind::TotalGoals | MarketKind::BothTeamsScore | MarketKind::MatchResult => {
                Metric::Goals
            }
            MarketKind::TotalCorners => Metric::Corners,
            MarketKind::TotalCards => Metric::Cards,
            MarketKind::TotalFouls => Metric::Fouls,
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(
            self,
            MarketKind::TotalGoals
                | MarketKind::TotalCorners
                | MarketKind::TotalCards
                | MarketKind::TotalFouls
        )
    }

    /// Whether `side` is a meaningful side for this market.
    pub fn accepts(&self, side: Side) -> bool {
        match self {
            k if k.is_total() => matches!(side, Side::Over | Side::Under),
            MarketKind::BothTeamsScore => matches!(side, Side::Yes | Side::No),
            MarketKind::MatchResult => matches!(side, Side::Home | Side::Draw | Side::Away),
            _ => false,
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "goals" | "total_goals" => Ok(MarketKind::TotalGoals),
            "btts" | "both_teams_score" => Ok(MarketKind::BothTeamsScore),
            "corners" | "total_corners" => Ok(MarketKind::TotalCorners),
            "cards" | "total_cards" => Ok(MarketKind::TotalCards),
            "fouls" | "total_fouls" => Ok(MarketKind::TotalFouls),
            "1x2" | "match_result" => Ok(MarketKind::MatchResult),
            other => Err(format!("unknown market '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Over,
    Under,
    Yes,
    No,
    Home,
    Draw,
    Away,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Over => "over",
            Side::Under => "under",
            Side::Yes => "yes",
            Side::No => "no",
            Side::Home => "home",
            Side::Draw => "draw",
            Side::Away => "away",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            "yes" => Ok(Side::Yes),
            "no" => Ok(Side::No),
            "home" | "1" => Ok(Side::Home),
            "draw" | "x" => Ok(Side::Draw),
            "away" | "2" => Ok(Side::Away),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// One bettable proposition on a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub market: MarketKind,
    pub side: Side,
    /// Threshold for totals; 0.0 for markets without a line.
    pub line: f64,
}

/// Highest totals line a selection may carry.
pub const MAX_LINE: f64 = 200.0;

impl Selection {
    pub fn new(market: MarketKind, side: Side, line: f64) -> Result<Self, String> {
        if !market.accepts(side) {
            return Err(format!("side '{}' is not valid for market '{}'", side, market));
        }
        if market.is_total() && !(line.is_finite() && (0.0..=MAX_LINE).contains(&line)) {
            return Err(format!("invalid line {} for market '{}'", line, market));
        }
        let line = if market.is_total() { line } else { 0.0 };
        Ok(Selection { market, side, line })
    }

    /// Parse the stored string triple of a leg or market row.
    pub fn parse(market: &str, side: &str, line: f64) -> Result<Self, String> {
        let market: MarketKind = market.parse()?;
        let side: Side = side.parse()?;
        Selection::new(market, side, line)
    }

    /// Canonical `market:side:line` token used in ticket hashes and weight keys.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{:.2}", self.market, self.side, self.line)
    }

    /// Line in hundredths, for use as an exact map key.
    pub fn line_key(&self) -> i64 {
        (self.line * 100.0).round() as i64
    }
}

/// Outcome of a binary prediction market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOutcome {
    Yes,
    No,
}

impl BinaryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOutcome::Yes => "yes",
            BinaryOutcome::No => "no",
        }
    }
}

impl FromStr for BinaryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" => Ok(BinaryOutcome::Yes),
            "no" => Ok(BinaryOutcome::No),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

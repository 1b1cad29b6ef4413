pub mod aggregate;
pub mod profile;

pub use aggregate::{
    aggregate_league, aggregate_team, aggregate_teams, is_stale, window_start, AggregationConfig,
    ResultSource,
};
pub use profile::{LeagueStatProfile, TeamStatProfile};

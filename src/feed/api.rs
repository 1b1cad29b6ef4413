use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::provider::{FixtureStatistics, ResultsProvider};
use super::FetchError;
use crate::db::models::{FixtureResult, OddsQuote};
use crate::markets::{MarketKind, Selection, Side};

/// Provider backed by an API-Football style v3 REST API.
pub struct ApiFootball {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl ApiFootball {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        let mut base_url = Url::parse(base_url).context("Invalid sports API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(ApiFootball {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| FetchError::Permanent(format!("bad endpoint {}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .header("x-apisports-key", &self.api_key)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), &body));
        }
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("malformed response: {}", e)))?;
        check_api_errors(&raw)?;
        Ok(raw)
    }
}

#[async_trait]
impl ResultsProvider for ApiFootball {
    fn name(&self) -> &str {
        "api-football"
    }

    async fn fixtures(
        &self,
        league_id: i64,
        season: i32,
        date: NaiveDate,
    ) -> Result<Vec<FixtureResult>, FetchError> {
        let url = self.endpoint(
            "fixtures",
            &[
                ("league", league_id.to_string()),
                ("season", season.to_string()),
                ("date", date.format("%Y-%m-%d").to_string()),
            ],
        )?;
        let raw = self.get_json(url).await?;
        Ok(parse_fixtures(&raw))
    }

    async fn statistics(
        &self,
        fixture_id: i64,
        home_team_id: i64,
    ) -> Result<FixtureStatistics, FetchError> {
        let url = self.endpoint("fixtures/statistics", &[("fixture", fixture_id.to_string())])?;
        let raw = self.get_json(url).await?;
        Ok(parse_statistics(&raw, home_team_id))
    }

    async fn odds(&self, fixture_id: i64) -> Result<Vec<OddsQuote>, FetchError> {
        let url = self.endpoint("odds", &[("fixture", fixture_id.to_string())])?;
        let raw = self.get_json(url).await?;
        Ok(parse_odds(&raw, fixture_id, Utc::now()))
    }
}

/// The API reports quota and validation problems inside a 200 body.
fn check_api_errors(raw: &Value) -> Result<(), FetchError> {
    let errors = &raw["errors"];
    let empty = match errors {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(());
    }
    let text = errors.to_string();
    let lower = text.to_lowercase();
    if lower.contains("ratelimit") || lower.contains("too many requests") {
        Err(FetchError::Transient(text))
    } else {
        Err(FetchError::Permanent(text))
    }
}

/// Football seasons are labelled by the year they start in (July onward).
pub fn season_for(date: NaiveDate) -> i32 {
    if date.month() >= 7 {
        date.year()
    } else {
        date.year() - 1
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_i32(v: &Value) -> Option<i32> {
    as_i64(v).map(|n| n as i32)
}

pub fn parse_fixtures(raw: &Value) -> Vec<FixtureResult> {
    let Some(items) = raw["response"].as_array() else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let fixture = &item["fixture"];
            let kickoff_at = fixture["date"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))?;
            Some(FixtureResult {
                fixture_id: as_i64(&fixture["id"])?,
                league_id: as_i64(&item["league"]["id"])?,
                season: as_i32(&item["league"]["season"]),
                home_team_id: as_i64(&item["teams"]["home"]["id"])?,
                away_team_id: as_i64(&item["teams"]["away"]["id"])?,
                kickoff_at,
                status: fixture["status"]["short"].as_str().unwrap_or("NS").to_string(),
                goals_home: as_i32(&item["goals"]["home"]),
                goals_away: as_i32(&item["goals"]["away"]),
                corners_home: None,
                corners_away: None,
                cards_home: None,
                cards_away: None,
                fouls_home: None,
                fouls_away: None,
                offsides_home: None,
                offsides_away: None,
            })
        })
        .collect()
}

#[derive(Default)]
struct TeamStats {
    corners: Option<i32>,
    yellow: Option<i32>,
    red: Option<i32>,
    fouls: Option<i32>,
    offsides: Option<i32>,
}

fn parse_team_stats(block: &Value) -> TeamStats {
    let mut out = TeamStats::default();
    let Some(stats) = block["statistics"].as_array() else {
        return out;
    };
    for s in stats {
        // A listed stat with a null value means none happened
        let value = Some(as_i32(&s["value"]).unwrap_or(0));
        match s["type"].as_str().unwrap_or_default() {
            "Corner Kicks" => out.corners = value,
            "Yellow Cards" => out.yellow = value,
            "Red Cards" => out.red = value,
            "Fouls" => out.fouls = value,
            "Offsides" => out.offsides = value,
            _ => {}
        }
    }
    out
}

pub fn parse_statistics(raw: &Value, home_team_id: i64) -> FixtureStatistics {
    let Some(teams) = raw["response"].as_array() else {
        return FixtureStatistics::default();
    };
    let mut home = None;
    let mut away = None;
    for block in teams {
        let stats = parse_team_stats(block);
        if as_i64(&block["team"]["id"]) == Some(home_team_id) {
            home = Some(stats);
        } else {
            away = Some(stats);
        }
    }
    let (Some(h), Some(a)) = (home, away) else {
        return FixtureStatistics::default();
    };
    let cards = |t: &TeamStats| match (t.yellow, t.red) {
        (None, None) => None,
        (y, r) => Some(y.unwrap_or(0) + r.unwrap_or(0)),
    };
    let pair = |x: Option<i32>, y: Option<i32>| Some((x?, y?));
    FixtureStatistics {
        corners: pair(h.corners, a.corners),
        cards: pair(cards(&h), cards(&a)),
        fouls: pair(h.fouls, a.fouls),
        offsides: pair(h.offsides, a.offsides),
    }
}

fn bet_market(name: &str) -> Option<MarketKind> {
    match name {
        "Goals Over/Under" => Some(MarketKind::TotalGoals),
        "Both Teams Score" => Some(MarketKind::BothTeamsScore),
        "Match Winner" => Some(MarketKind::MatchResult),
        "Corners Over Under" | "Corners Over/Under" => Some(MarketKind::TotalCorners),
        "Cards Over/Under" => Some(MarketKind::TotalCards),
        "Fouls Over/Under" => Some(MarketKind::TotalFouls),
        _ => None,
    }
}

/// "Over 2.5" → (Over, 2.5); "Home" / "Yes" → (side, 0.0)
fn parse_value_label(label: &str) -> Option<(Side, f64)> {
    let mut parts = label.split_whitespace();
    let side: Side = parts.next()?.parse().ok()?;
    let line = match parts.next() {
        Some(l) => l.parse().ok()?,
        None => 0.0,
    };
    Some((side, line))
}

pub fn parse_odds(raw: &Value, fixture_id: i64, fetched_at: DateTime<Utc>) -> Vec<OddsQuote> {
    let mut quotes = Vec::new();
    let Some(items) = raw["response"].as_array() else {
        return quotes;
    };
    for item in items {
        for book in item["bookmakers"].as_array().into_iter().flatten() {
            let bookmaker = book["name"].as_str().unwrap_or("unknown").to_string();
            for bet in book["bets"].as_array().into_iter().flatten() {
                let Some(market) = bet["name"].as_str().and_then(bet_market) else {
                    continue;
                };
                for v in bet["values"].as_array().into_iter().flatten() {
                    let Some((side, line)) = v["value"].as_str().and_then(parse_value_label) else {
                        continue;
                    };
                    let odds = v["odd"]
                        .as_str()
                        .and_then(|s| s.parse::<f64>().ok())
                        .or_else(|| v["odd"].as_f64());
                    let (Some(odds), Ok(selection)) = (odds, Selection::new(market, side, line))
                    else {
                        continue;
                    };
                    if odds > 1.0 {
                        quotes.push(OddsQuote {
                            fixture_id,
                            selection,
                            odds,
                            bookmaker: bookmaker.clone(),
                            fetched_at,
                        });
                    }
                }
            }
        }
    }
    quotes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fixture_list() {
        let raw = json!({
            "errors": [],
            "response": [
                {
                    "fixture": {"id": 9001, "date": "2026-02-28T15:00:00+00:00", "status": {"short": "FT"}},
                    "league": {"id": 39, "season": 2025},
                    "teams": {"home": {"id": 1}, "away": {"id": 2}},
                    "goals": {"home": 2, "away": 1}
                },
                {
                    "fixture": {"id": 9002, "date": "2026-03-02T19:45:00+00:00", "status": {"short": "NS"}},
                    "league": {"id": 39, "season": 2025},
                    "teams": {"home": {"id": 3}, "away": {"id": 4}},
                    "goals": {"home": null, "away": null}
                },
                { "fixture": {"id": "broken"} }
            ]
        });
        let fixtures = parse_fixtures(&raw);
        assert_eq!(fixtures.len(), 2);
        assert!(fixtures[0].is_finished());
        assert_eq!(fixtures[0].total(crate::markets::Metric::Goals), Some(3));
        assert_eq!(fixtures[1].goals_home, None);
        assert_eq!(fixtures[1].status, "NS");
    }

    #[test]
    fn parses_statistics_by_team() {
        let raw = json!({
            "response": [
                {"team": {"id": 2}, "statistics": [
                    {"type": "Corner Kicks", "value": 3},
                    {"type": "Fouls", "value": "12"},
                    {"type": "Yellow Cards", "value": 2},
                    {"type": "Red Cards", "value": null}
                ]},
                {"team": {"id": 1}, "statistics": [
                    {"type": "Corner Kicks", "value": 7},
                    {"type": "Fouls", "value": 9},
                    {"type": "Yellow Cards", "value": 1},
                    {"type": "Red Cards", "value": 1}
                ]}
            ]
        });
        let stats = parse_statistics(&raw, 1);
        assert_eq!(stats.corners, Some((7, 3)));
        assert_eq!(stats.fouls, Some((9, 12)));
        assert_eq!(stats.cards, Some((2, 2)));
        assert_eq!(stats.offsides, None);
        assert!(parse_statistics(&json!({"response": []}), 1).is_empty());
    }

    #[test]
    fn parses_supported_odds_only() {
        let raw = json!({
            "response": [{
                "bookmakers": [{
                    "name": "Bet365",
                    "bets": [
                        {"name": "Goals Over/Under", "values": [
                            {"value": "Over 2.5", "odd": "1.95"},
                            {"value": "Under 2.5", "odd": "1.85"}
                        ]},
                        {"name": "Both Teams Score", "values": [{"value": "Yes", "odd": "1.70"}]},
                        {"name": "Match Winner", "values": [{"value": "Draw", "odd": "3.40"}]},
                        {"name": "Asian Handicap", "values": [{"value": "Home -1", "odd": "2.10"}]}
                    ]
                }]
            }]
        });
        let quotes = parse_odds(&raw, 77, Utc::now());
        assert_eq!(quotes.len(), 4);
        assert!(quotes.iter().all(|q| q.fixture_id == 77 && q.bookmaker == "Bet365"));
        let over = quotes
            .iter()
            .find(|q| q.selection.canonical() == "goals:over:2.50")
            .unwrap();
        assert_eq!(over.odds, 1.95);
    }

    #[test]
    fn api_errors_in_body() {
        assert!(check_api_errors(&json!({"errors": []})).is_ok());
        let limited = check_api_errors(&json!({"errors": {"rateLimit": "Too many requests"}}));
        assert!(limited.unwrap_err().is_transient());
        let bad_key = check_api_errors(&json!({"errors": {"token": "Invalid key"}}));
        assert!(!bad_key.unwrap_err().is_transient());
    }

    #[test]
    fn season_starts_in_july() {
        assert_eq!(season_for(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()), 2025);
        assert_eq!(season_for(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()), 2026);
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let api = ApiFootball::new("https://v3.football.api-sports.io/v3", "k").unwrap();
        let url = api.endpoint("fixtures", &[("league", "39".into())]).unwrap();
        assert_eq!(url.as_str(), "https://v3.football.api-sports.io/v3/fixtures?league=39");
    }
}

//! One-line day summaries built from ranked score results.

use std::collections::HashMap;

use crate::{ScoreResult, ScoreStatus};

const TOP_EVENTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct SummaryGenerator {
    display_names: HashMap<String, String>,
}

impl SummaryGenerator {
    pub fn new(display_names: HashMap<String, String>) -> Self {
        Self { display_names }
    }

    fn display_name<'a>(&'a self, event_type: &'a str) -> &'a str {
        self.display_names
            .get(event_type)
            .map(String::as_str)
            .unwrap_or(event_type)
    }

    /// `events` need not be sorted.
    pub fn generate(&self, events: &[ScoreResult]) -> String {
        let mut ranked: Vec<&ScoreResult> = events.iter().collect();
        ranked.sort_by(|a, b| b.total_score.cmp(&a.total_score));

        let Some(best) = ranked.iter().map(|e| e.status).max() else {
            return "Not recommended — poor conditions".to_string();
        };
        let names = ranked
            .iter()
            .take(TOP_EVENTS)
            .map(|e| self.display_name(&e.event_type))
            .collect::<Vec<_>>()
            .join("+");

        match best {
            ScoreStatus::Perfect => format!("Perfect day — {names}"),
            ScoreStatus::Recommended => format!("Recommended — {names}"),
            ScoreStatus::Possible => format!("Possible — {names}"),
            ScoreStatus::NotRecommended => "Not recommended — poor conditions".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SummaryGenerator {
        SummaryGenerator::new(HashMap::from([
            ("cloud_sea".to_string(), "Cloud Sea".to_string()),
            ("frost".to_string(), "Rime Ice".to_string()),
        ]))
    }

    #[test]
    fn empty_day_is_not_recommended() {
        assert_eq!(generator().generate(&[]), "Not recommended — poor conditions");
    }

    #[test]
    fn best_status_picks_prefix_and_names_are_ranked() {
        let events = vec![
            ScoreResult::new("frost", 60),
            ScoreResult::new("cloud_sea", 96),
            ScoreResult::new("stargazing", 20),
            ScoreResult::new("clear_sky", 10),
        ];
        assert_eq!(
            generator().generate(&events),
            "Perfect day — Cloud Sea+Rime Ice+stargazing"
        );
    }

    #[test]
    fn only_poor_results_are_not_recommended() {
        let events = vec![ScoreResult::new("frost", 30)];
        assert_eq!(generator().generate(&events), "Not recommended — poor conditions");
        let events = vec![ScoreResult::new("frost", 55)];
        assert_eq!(generator().generate(&events), "Possible — Rime Ice");
    }
}

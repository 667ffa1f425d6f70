//! Tally Engine
//!
//! Pure computation of per-option counts and per-voter choices.

use super::model::{OptionTally, Poll, PollResults, Vote};
use std::collections::HashMap;

/// Compute results for `poll` from its current votes.
///
/// Every option is reported, including ones nobody picked. Votes whose
/// index falls outside the option list are skipped.
pub fn tally(poll: &Poll, votes: &[Vote]) -> PollResults {
    let mut tallies: Vec<OptionTally> = poll
        .options
        .iter()
        .map(|label| OptionTally {
            label: label.clone(),
            votes: 0,
        })
        .collect();
    let mut voters = HashMap::new();

    for vote in votes {
        if vote.poll_id != poll.id {
            continue;
        }
        let Some(entry) = tallies.get_mut(vote.option_index) else {
            tracing::warn!(
                poll_id = %poll.id,
                user_id = %vote.user_id,
                option_index = vote.option_index,
                "Skipping vote with out-of-range option"
            );
            continue;
        };
        entry.votes += 1;
        voters.insert(vote.user_id.clone(), entry.label.clone());
    }

    PollResults {
        poll: poll.clone(),
        tallies,
        voters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(options: &[&str]) -> Poll {
        Poll::new(
            "Lunch",
            options.iter().map(|o| o.to_string()).collect(),
            "creator",
            "chan",
        )
        .with_id("p1")
    }

    #[test]
    fn test_untouched_options_are_reported() {
        let poll = poll(&["Pizza", "Sushi", "Tacos"]);
        let results = tally(&poll, &[Vote::new("p1", "alice", 1)]);

        assert_eq!(results.tallies.len(), 3);
        assert_eq!(results.count_of("Pizza"), Some(0));
        assert_eq!(results.count_of("Sushi"), Some(1));
        assert_eq!(results.count_of("Tacos"), Some(0));
        assert_eq!(results.choice_of("alice"), Some("Sushi"));
    }

    #[test]
    fn test_out_of_range_votes_are_skipped() {
        let poll = poll(&["Pizza", "Sushi"]);
        let votes = vec![Vote::new("p1", "alice", 0), Vote::new("p1", "bob", 7)];
        let results = tally(&poll, &votes);

        assert_eq!(results.total_votes(), 1);
        assert!(results.choice_of("bob").is_none());
    }

    #[test]
    fn test_votes_for_other_polls_are_ignored() {
        let poll = poll(&["Pizza", "Sushi"]);
        let results = tally(&poll, &[Vote::new("other", "alice", 0)]);
        assert_eq!(results.total_votes(), 0);
    }

    #[test]
    fn test_total_matches_distinct_voters() {
        let poll = poll(&["A", "B", "C"]);
        let votes: Vec<Vote> = (0..10)
            .map(|i| Vote::new("p1", format!("user{}", i), i % 3))
            .collect();
        let results = tally(&poll, &votes);

        assert_eq!(results.total_votes() as usize, results.voters.len());
        assert_eq!(results.count_of("A"), Some(4));
        assert_eq!(results.count_of("B"), Some(3));
        assert_eq!(results.count_of("C"), Some(3));
    }

    #[test]
    fn test_duplicate_labels_are_counted_by_position() {
        let poll = poll(&["Same", "Same"]);
        let votes = vec![Vote::new("p1", "alice", 1)];
        let results = tally(&poll, &votes);

        assert_eq!(results.tallies[0].votes, 0);
        assert_eq!(results.tallies[1].votes, 1);
    }

    #[test]
    fn test_percentages() {
        let poll = poll(&["Pizza", "Sushi"]);
        let empty = tally(&poll, &[]);
        assert_eq!(empty.percentage(0), 0.0);
        assert_eq!(empty.percentage(1), 0.0);

        let votes = vec![
            Vote::new("p1", "a", 0),
            Vote::new("p1", "b", 1),
            Vote::new("p1", "c", 1),
            Vote::new("p1", "d", 1),
        ];
        let results = tally(&poll, &votes);
        assert_eq!(results.percentage(0), 25.0);
        assert_eq!(results.percentage(1), 75.0);
    }
}

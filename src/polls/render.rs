//! Message Rendering
//!
//! Markdown text posted back to the chat for each poll outcome.

use super::model::{Poll, PollResults};
use std::fmt::Write;

/// Timestamp format used in finished-poll status lines
const FINISHED_AT_FORMAT: &str = "%d.%m.%Y %H:%M:%S UTC";

/// Command summary
pub const HELP_TEXT: &str = "### Poll commands:
- **create \"Title\" \"Option 1\" \"Option 2\" ...** - Create a new poll
- **vote [poll ID] [option number]** - Vote for an option
- **results [poll ID]** - Show poll results
- **finish [poll ID]** - Finish a poll (creator only)
- **delete [poll ID]** - Delete a poll (creator only)
- **help** - Show this help";

/// Announcement posted when a poll is created
pub fn announcement(poll: &Poll) -> String {
    let mut message = format!("### {}\n", poll.title);
    let _ = writeln!(message, "**Poll ID**: `{}`\n", poll.id);

    for (i, option) in poll.options.iter().enumerate() {
        let _ = writeln!(message, "{}. {}", i + 1, option);
    }

    let _ = write!(
        message,
        "\nTo vote, send: `vote {} [option number]`",
        poll.id
    );
    message
}

/// Confirmation sent after a successful create
pub fn created(poll: &Poll) -> String {
    format!("Poll created! ID: `{}`", poll.id)
}

/// Confirmation sent after a vote.
///
/// `voter` is the display name, or `None` when it could not be looked up.
pub fn vote_recorded(poll: &Poll, position: u32, voter: Option<&str>) -> String {
    let label = poll
        .option_index(position)
        .and_then(|i| poll.option_label(i))
        .unwrap_or_default();

    match voter {
        Some(name) => format!(
            "@{} voted for option {} ({}) in poll `{}`",
            name, position, label, poll.id
        ),
        None => format!(
            "Your vote for option {} ({}) in poll `{}` has been recorded.",
            position, label, poll.id
        ),
    }
}

/// Tally with counts, percentages, total and status
pub fn results(results: &PollResults) -> String {
    let poll = &results.poll;
    let total = results.total_votes();

    let mut message = format!("### Poll results: {}\n", poll.title);
    let _ = writeln!(message, "**Poll ID**: `{}`\n", poll.id);

    for (i, tally) in results.tallies.iter().enumerate() {
        let _ = writeln!(
            message,
            "{}. **{}**: {} {} ({:.1}%)",
            i + 1,
            tally.label,
            tally.votes,
            votes_word(tally.votes),
            results.percentage(i)
        );
    }

    let _ = write!(message, "\n**Total votes**: {}", total);
    let _ = write!(message, "\n**Status**: {}", poll.status().label());
    if let Some(finished_at) = poll.finished_at {
        let _ = write!(message, " ({})", finished_at.format(FINISHED_AT_FORMAT));
    }
    message
}

/// Final tally posted by `finish`
pub fn finished(results_view: &PollResults, already_finished: bool) -> String {
    let header = if already_finished {
        "### Poll was already finished."
    } else {
        "### Poll finished!"
    };
    format!("{}\n{}", header, results(results_view))
}

/// Confirmation sent after a delete
pub fn deleted(poll_id: &str) -> String {
    format!("Poll with ID `{}` has been deleted.", poll_id)
}

fn votes_word(count: u32) -> &'static str {
    if count == 1 {
        "vote"
    } else {
        "votes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::model::Vote;
    use crate::polls::tally::tally;
    use chrono::TimeZone;

    fn lunch() -> Poll {
        Poll::new("Lunch", vec!["Pizza".into(), "Sushi".into()], "creator", "chan").with_id("p1")
    }

    #[test]
    fn test_announcement_lists_options() {
        let text = announcement(&lunch());
        assert!(text.starts_with("### Lunch\n"));
        assert!(text.contains("`p1`"));
        assert!(text.contains("1. Pizza\n"));
        assert!(text.contains("2. Sushi\n"));
        assert!(text.contains("vote p1 [option number]"));
    }

    #[test]
    fn test_results_of_empty_poll() {
        let text = results(&tally(&lunch(), &[]));
        assert!(text.contains("1. **Pizza**: 0 votes (0.0%)"));
        assert!(text.contains("2. **Sushi**: 0 votes (0.0%)"));
        assert!(text.contains("**Total votes**: 0"));
        assert!(text.ends_with("**Status**: Active"));
    }

    #[test]
    fn test_results_percentages_one_decimal() {
        let votes = vec![
            Vote::new("p1", "a", 0),
            Vote::new("p1", "b", 1),
            Vote::new("p1", "c", 1),
        ];
        let text = results(&tally(&lunch(), &votes));
        assert!(text.contains("1. **Pizza**: 1 vote (33.3%)"));
        assert!(text.contains("2. **Sushi**: 2 votes (66.7%)"));
        assert!(text.contains("**Total votes**: 3"));
    }

    #[test]
    fn test_finished_status_shows_time() {
        let mut poll = lunch();
        poll.finish(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        let text = finished(&tally(&poll, &[]), false);
        assert!(text.starts_with("### Poll finished!\n"));
        assert!(text.ends_with("**Status**: Finished (01.03.2024 12:30:00 UTC)"));
    }

    #[test]
    fn test_vote_confirmation_fallback() {
        let poll = lunch();
        assert_eq!(
            vote_recorded(&poll, 2, Some("alice")),
            "@alice voted for option 2 (Sushi) in poll `p1`"
        );
        assert!(vote_recorded(&poll, 1, None).starts_with("Your vote for option 1 (Pizza)"));
    }
}

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use roadpulse_core::model::{LeaderboardEntry, Payload, RecordId};
use roadpulse_core::rank::{Augmentation, Leaderboard, build_leaderboard};
use roadpulse_core::source::{Collection, Direction, QueryDescriptor};
use tracing::warn;

use super::Context;
use crate::output::{pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct LeaderboardArgs {
    /// Rows to show (default: karma.leaderboard_limit).
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Execute `rp leaderboard`: one ranked snapshot, no subscription.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or queried.
pub fn run_leaderboard(args: &LeaderboardArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let limit = args.limit.unwrap_or(ctx.config.project.karma.leaderboard_limit);
    let query = QueryDescriptor::collection(Collection::Leaderboard)
        .order_by("karmaPoints", Direction::Desc)
        .limit(limit);
    query.validate()?;

    let ranked: Vec<(RecordId, LeaderboardEntry)> = store
        .query(&query)?
        .into_iter()
        .map(|(id, doc)| {
            let entry = LeaderboardEntry::decode(&doc).unwrap_or_else(|e| {
                warn!(id = %id, error = %e, "leaderboard entry unreadable, keeping its rank");
                LeaderboardEntry::default()
            });
            (id, entry)
        })
        .collect();
    let board = build_leaderboard(&ranked, ctx.session.current(), &store);

    render_mode(ctx.output, &board, write_board_text, write_board_pretty)
}

pub fn write_board_text(board: &Leaderboard, w: &mut dyn Write) -> io::Result<()> {
    for row in &board.rows {
        let rank = row.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        writeln!(
            w,
            "{rank}\t{}\t{}\t{}\t{}{}",
            row.user_id,
            row.name,
            row.karma_points,
            row.total_reports,
            if row.highlighted { "\t*" } else { "" }
        )?;
    }
    Ok(())
}

pub fn write_board_pretty(board: &Leaderboard, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Leaderboard")?;
    if board.rows.is_empty() {
        writeln!(w, "(no entries yet)")?;
    }
    for row in &board.rows {
        let rank = row.rank.map_or_else(String::new, |r| format!("#{r}"));
        let accuracy = row
            .accuracy
            .map_or_else(String::new, |a| format!("{a}% accurate"));
        writeln!(
            w,
            "{} {:>4} [{}] {:<20} {:>6} pts {:>4} reports  {}{}",
            row.medal,
            rank,
            row.initial,
            row.name,
            row.karma_points,
            row.total_reports,
            accuracy,
            if row.highlighted { "  <- you" } else { "" }
        )?;
    }
    if let Augmentation::LookupFailed { error } = &board.augmentation {
        writeln!(w, "(could not look up your karma: {error})")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadpulse_core::rank::LeaderboardRow;

    fn row(rank: Option<usize>, name: &str, highlighted: bool) -> LeaderboardRow {
        LeaderboardRow {
            rank,
            medal: roadpulse_core::rank::medal(rank.unwrap_or(0)),
            user_id: RecordId::from(name),
            name: name.to_string(),
            initial: 'X',
            karma_points: 10,
            total_reports: 1,
            accuracy: None,
            badge: None,
            highlighted,
            synthetic: rank.is_none(),
        }
    }

    #[test]
    fn text_marks_synthetic_and_highlighted_rows() {
        let board = Leaderboard {
            rows: vec![row(Some(1), "a", false), row(None, "me", true)],
            augmentation: Augmentation::Appended,
        };
        let mut buf = Vec::new();
        write_board_text(&board, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1\ta"));
        assert!(lines[1].starts_with("-\tme"));
        assert!(lines[1].ends_with('*'));
    }

    #[test]
    fn pretty_reports_lookup_failures() {
        let board = Leaderboard {
            rows: Vec::new(),
            augmentation: Augmentation::LookupFailed {
                error: "offline".into(),
            },
        };
        let mut buf = Vec::new();
        write_board_pretty(&board, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("no entries yet"));
        assert!(text.contains("offline"));
    }
}

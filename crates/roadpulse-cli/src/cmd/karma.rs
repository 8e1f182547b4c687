use std::io::{self, Write};

use anyhow::{Result, anyhow};
use clap::Args;
use roadpulse_core::error::ErrorCode;
use roadpulse_core::rank::Leaderboard;
use roadpulse_core::views::ViewStats;
use roadpulse_core::views::karma::{KarmaPanel, KarmaSink, KarmaView};
use serde::Serialize;

use super::Context;
use super::leaderboard::{write_board_pretty, write_board_text};
use crate::output::{CommandError, pretty_kv, pretty_section, render_mode};

const PROGRESS_WIDTH: usize = 30;

#[derive(Args, Debug)]
pub struct KarmaArgs {
    /// Leave the leaderboard out.
    #[arg(long)]
    pub no_leaderboard: bool,
}

/// The command reads the view's final state, so the sink only counts.
#[derive(Debug, Default)]
struct Redraws(usize);

impl KarmaSink for Redraws {
    fn show_login_prompt(&mut self) -> Result<()> {
        Ok(())
    }

    fn show_panel(&mut self, _panel: &KarmaPanel) -> Result<()> {
        self.0 += 1;
        Ok(())
    }

    fn show_leaderboard(&mut self, _board: &Leaderboard) -> Result<()> {
        self.0 += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct KarmaOutput {
    panel: KarmaPanel,
    #[serde(skip_serializing_if = "Option::is_none")]
    leaderboard: Option<Leaderboard>,
    redraws: usize,
    stats: ViewStats,
}

/// Execute `rp karma`.
///
/// # Errors
///
/// Fails with [`ErrorCode::NotSignedIn`] when no actor is set, or if the
/// store cannot be opened or subscribed to.
pub fn run_karma(args: &KarmaArgs, ctx: &Context) -> Result<()> {
    if !ctx.session.is_signed_in() {
        return Err(CommandError::new(
            ErrorCode::NotSignedIn,
            "karma is tracked per user; no one is signed in",
        )
        .into());
    }
    let store = ctx.open_store()?;
    let view = KarmaView::open(
        store.clone(),
        Redraws::default(),
        ctx.config.project.karma.clone(),
        &ctx.session,
        ctx.now_us,
    )?;
    let panel = view
        .panel()
        .ok_or_else(|| anyhow!("karma document could not be created or read"))?;
    let leaderboard = if args.no_leaderboard {
        None
    } else {
        view.leaderboard()
    };
    let out = KarmaOutput {
        panel,
        leaderboard,
        redraws: view.with_sink(|sink| sink.0),
        stats: view.close(),
    };
    render_mode(ctx.output, &out, write_text, write_pretty)
}

fn write_text(out: &KarmaOutput, w: &mut dyn Write) -> io::Result<()> {
    let p = &out.panel;
    writeln!(
        w,
        "karma user={} points={} reports={} next={}",
        p.user_name, p.karma_points, p.total_reports, p.next_milestone
    )?;
    for badge in &p.achievements {
        writeln!(
            w,
            "achievement {} {}",
            badge.achievement,
            if badge.achieved { "yes" } else { "no" }
        )?;
    }
    if let Some(board) = &out.leaderboard {
        write_board_text(board, w)?;
    }
    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn progress_bar(progress: f64) -> String {
    let filled = (progress.clamp(0.0, 1.0) * PROGRESS_WIDTH as f64).round() as usize;
    format!(
        "[{}{}]",
        "=".repeat(filled),
        " ".repeat(PROGRESS_WIDTH - filled)
    )
}

fn write_pretty(out: &KarmaOutput, w: &mut dyn Write) -> io::Result<()> {
    let p = &out.panel;
    pretty_section(w, &format!("({}) {}", p.initial, p.user_name))?;
    pretty_kv(w, "Karma", p.karma_points.to_string())?;
    pretty_kv(w, "Reports", p.total_reports.to_string())?;
    pretty_kv(
        w,
        "Next",
        format!("{} {}", progress_bar(p.progress), p.next_milestone),
    )?;
    writeln!(w)?;
    pretty_section(w, "Achievements")?;
    for badge in &p.achievements {
        writeln!(
            w,
            "{} {} {:<18} {}",
            if badge.achieved { "✓" } else { " " },
            badge.emoji,
            badge.title,
            badge.description
        )?;
    }
    if let Some(board) = &out.leaderboard {
        writeln!(w)?;
        write_board_pretty(board, w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_is_fixed_width() {
        assert_eq!(progress_bar(0.0).len(), PROGRESS_WIDTH + 2);
        assert_eq!(progress_bar(0.5), format!("[{}{}]", "=".repeat(15), " ".repeat(15)));
        assert_eq!(progress_bar(3.0).matches('=').count(), PROGRESS_WIDTH);
    }
}

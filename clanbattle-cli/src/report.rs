use anyhow::Result;
use clanbattle_core::{
    AttackOutcome, AttackRecord, BossView, CarryOverCredit, ClanState, GroupId, RemainingSummary,
    ReservationRecord, RolloverReport, UndoOutcome,
};
use colored::Colorize;
use serde::Serialize;
use std::io::Write;

/// Print `value` as pretty JSON, or through `console` otherwise.
pub fn emit<T: Serialize + ?Sized>(
    out: &mut dyn Write,
    json: bool,
    value: &T,
    console: impl FnOnce(&mut dyn Write, &T) -> Result<()>,
) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)?;
        Ok(())
    } else {
        console(out, value)
    }
}

fn boss_label(lap: u32, slot: usize) -> String {
    format!("lap {lap} boss {}", slot + 1)
}

pub fn record(out: &mut dyn Write, record: &AttackRecord) -> Result<()> {
    let state = if record.completed {
        "done".green()
    } else {
        "pending".yellow()
    };
    write!(
        out,
        "{} user {} {} {} dmg [{state}]",
        record.id, record.user_id, record.kind, record.damage
    )?;
    if !record.note.is_empty() {
        write!(out, " {}", record.note.dimmed())?;
    }
    writeln!(out)?;
    Ok(())
}

pub fn reservation(out: &mut dyn Write, reservation: &ReservationRecord) -> Result<()> {
    writeln!(
        out,
        "{} user {} boss {}: {}",
        reservation.id,
        reservation.user_id,
        reservation.slot + 1,
        reservation.label()
    )?;
    Ok(())
}

pub fn credit(out: &mut dyn Write, credit: &CarryOverCredit) -> Result<()> {
    writeln!(
        out,
        "credit {}: {} ({}s usable)",
        credit.id,
        credit.label(),
        credit.resolved_seconds()
    )?;
    Ok(())
}

pub fn outcome(out: &mut dyn Write, outcome: &AttackOutcome) -> Result<()> {
    let label = boss_label(outcome.lap, outcome.slot);
    if outcome.defeated {
        writeln!(out, "{} {}", "⚔️  defeated".bright_red().bold(), label.bold())?;
    } else {
        writeln!(out, "{} {}", "⚔️  attacked".bright_yellow(), label.bold())?;
    }
    record(out, &outcome.record)?;
    if let Some(consumed) = &outcome.consumed {
        writeln!(
            out,
            "   used {} for {}s",
            consumed.credit.label(),
            consumed.seconds
        )?;
    }
    if let Some(issued) = &outcome.issued {
        write!(out, "   earned ")?;
        credit(out, issued)?;
    }
    if outcome.credit_dropped {
        writeln!(out, "   {}", "credit dropped: already holding three".red())?;
    }
    if outcome.next_lap_created {
        writeln!(out, "   lap {} is open", outcome.lap + 1)?;
    }
    for removed in &outcome.reservations_removed {
        write!(out, "   released ")?;
        reservation(out, removed)?;
    }
    Ok(())
}

pub fn undo(out: &mut dyn Write, outcome: &UndoOutcome) -> Result<()> {
    match outcome {
        UndoOutcome::NothingToUndo => writeln!(out, "nothing to undo")?,
        UndoOutcome::Stale { entry } => writeln!(
            out,
            "{} {} on {} no longer exists",
            "stale:".yellow(),
            entry.describe(),
            boss_label(entry.lap(), entry.slot())
        )?,
        UndoOutcome::Reverted { entry } => writeln!(
            out,
            "{} {} on {}",
            "↩️  undone".green(),
            entry.describe(),
            boss_label(entry.lap(), entry.slot())
        )?,
    }
    Ok(())
}

pub fn rollover(out: &mut dyn Write, report: &RolloverReport) -> Result<()> {
    writeln!(
        out,
        "{} lap {}{}",
        "🔁 rolled over:".bright_cyan(),
        report.lap,
        if report.lap_created { " (new)" } else { "" }
    )?;
    writeln!(
        out,
        "   {} players reset, {} reservations cleared, pruned laps {:?}",
        report.players_reset, report.reservations_cleared, report.pruned_laps
    )?;
    Ok(())
}

#[derive(Serialize)]
pub struct Status<'a> {
    pub group_id: GroupId,
    pub label: &'a str,
    pub day: Option<String>,
    pub board: Vec<BossView>,
    pub remaining: RemainingSummary,
}

impl<'a> Status<'a> {
    pub fn new(clan: &'a ClanState, board: Vec<BossView>) -> Self {
        Self {
            group_id: clan.group_id,
            label: &clan.config.label,
            day: clan.day.map(|day| day.to_string()),
            board,
            remaining: RemainingSummary::of(clan),
        }
    }
}

pub fn status(out: &mut dyn Write, status: &Status<'_>) -> Result<()> {
    writeln!(
        out,
        "{}",
        format!("🛡️  Clan {} ({})", status.group_id, status.label)
            .bright_cyan()
            .bold()
    )?;
    writeln!(out, "{}", "=".repeat(30).cyan())?;
    if let Some(day) = &status.day {
        writeln!(out, "Battle day: {day}")?;
    }
    for boss in &status.board {
        let hp = if boss.defeated {
            "defeated".red().to_string()
        } else {
            format!("{}/{}", boss.remaining_hp, boss.max_hp)
        };
        writeln!(
            out,
            "{} {}: {hp}",
            boss_label(boss.lap, boss.slot).bold(),
            boss.name
        )?;
        for entry in boss.completed.iter().chain(&boss.pending) {
            write!(out, "   ")?;
            record(out, entry)?;
        }
        for entry in &boss.reservations {
            write!(out, "   reserved ")?;
            reservation(out, entry)?;
        }
    }
    let remaining = &status.remaining;
    writeln!(out)?;
    writeln!(
        out,
        "Remaining attacks: {}/{}  carry-overs: {}",
        remaining.remaining_attacks.to_string().green(),
        remaining.total_attacks,
        remaining.carry_overs
    )?;
    for player in &remaining.players {
        let mut line = format!(
            "   user {}: {} left, {} credits",
            player.user_id, player.remaining_attacks, player.carry_overs
        );
        if player.task_kill {
            line.push_str(", task kill");
        }
        if let Some(limit) = &player.limit_time_text {
            line.push_str(", ");
            line.push_str(limit);
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clanbattle_core::{AttackKind, ClanConfig, HpTable, Player, RecordId};

    fn render(f: impl FnOnce(&mut dyn Write) -> Result<()>) -> String {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn records_show_state_and_note() {
        let entry = AttackRecord {
            id: RecordId(4),
            user_id: 9,
            kind: AttackKind::Magic,
            damage: 650,
            note: "60s".into(),
            declared_at: Utc::now(),
            completed: true,
        };
        let text = render(|out| record(out, &entry));
        assert_eq!(text, "#4 user 9 magic 650 dmg [done] 60s\n");
    }

    #[test]
    fn status_lists_every_slot_and_player() {
        let table = HpTable::default();
        let mut clan = ClanState::new(3, ClanConfig::labelled("night"));
        clan.ensure_lap(1, &table);
        clan.players.insert(1, Player::new(1));
        let board = BossView::board(&clan, &table);
        let text = render(|out| status(out, &Status::new(&clan, board)));
        assert!(text.contains("Clan 3 (night)"));
        assert!(text.contains("lap 1 boss 5"));
        assert!(text.contains("Remaining attacks: 3/3"));
    }

    #[test]
    fn json_mode_bypasses_console_rendering() {
        let mut buf = Vec::new();
        emit(&mut buf, true, &vec![1, 2], |_, _| {
            panic!("console renderer used in json mode")
        })
        .unwrap();
        let parsed: Vec<u32> = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed, vec![1, 2]);
    }
}

mod prompt;
mod report;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clanbattle_core::constants::BOSS_SLOTS;
use clanbattle_core::{
    AttackKind, CatalogHandle, ClanConfig, ClanRegistry, EngineConfig, GroupId, HpTable,
    JsonFileStore, ReservationUpdate, UserId, carry_over_seconds, parse_damage_report,
    parse_hp_expression,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};

use report::{Status, emit};

type Registry = ClanRegistry<JsonFileStore>;

#[derive(Debug, Parser)]
#[command(name = "clanbattle", version)]
#[command(about = "Coordinate clan battle attacks, reservations and carry-over credits")]
struct Args {
    /// JSON database file
    #[arg(long, global = true, default_value = "clanbattle.json")]
    db: PathBuf,

    /// Engine configuration overrides (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Boss hp catalog (JSON)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Group to operate on
    #[arg(short, long, global = true)]
    group: Option<GroupId>,

    /// Answer a selection prompt up front (1-based)
    #[arg(long, global = true)]
    pick: Option<usize>,

    /// Clock override for replaying commands (RFC 3339)
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Emit JSON instead of console output
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start managing a group
    Provision {
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Stop managing a group and delete its data
    Deprovision,
    /// Register members
    Add {
        #[arg(required = true)]
        users: Vec<UserId>,
    },
    /// Remove a member with their records, reservations and credits
    Remove { user: UserId },
    /// Declare an attack on a boss
    Declare {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(long, value_parser = parse_kind, default_value = "physical")]
        kind: AttackKind,
        #[arg(long)]
        lap: Option<u32>,
    },
    /// Report expected damage on a declaration, e.g. `600 60s討伐`
    Damage {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(required = true)]
        report: Vec<String>,
        #[arg(long)]
        lap: Option<u32>,
    },
    /// Complete a declared attack
    Attack {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(long)]
        lap: Option<u32>,
        /// Damage dealt, if different from the reported damage
        #[arg(long)]
        damage: Option<u64>,
    },
    /// Complete a declared attack that defeated the boss
    Defeat {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(long)]
        lap: Option<u32>,
    },
    /// Revert the member's most recent declaration or attack
    Undo { user: UserId },
    /// Book an intended attack
    Reserve {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(long, value_parser = parse_kind, default_value = "physical")]
        kind: AttackKind,
    },
    /// Cancel a reservation
    Cancel {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
    },
    /// Update a reservation's expectations
    Configure {
        user: UserId,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        #[arg(long)]
        damage: Option<u64>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        carry_over: Option<bool>,
    },
    /// Move the clan to a new lap
    Lap { lap: u32 },
    /// Start a new battle day now
    Day,
    /// Mark a member as having used their task kill
    TaskKill {
        user: UserId,
        #[arg(long)]
        off: bool,
    },
    /// Set how many seconds one of the member's credits is worth
    SetCot { user: UserId, seconds: u32 },
    /// Set or clear the member's availability note
    LimitTime { user: UserId, text: Option<String> },
    /// Carry-over seconds for finishing a boss, e.g. `calc-cot 1000-500 700`
    CalcCot { hp: String, damage: u64 },
    /// Override a boss's hp in the catalog file
    SetHp {
        /// 1-based tier in the catalog
        tier: usize,
        #[arg(value_parser = parse_boss)]
        boss: usize,
        hp: u64,
    },
    /// Show the board and remaining attacks
    Status,
    /// List managed groups
    Groups,
}

impl Command {
    /// Commands that act on today's counters roll the battle day first.
    const fn rolls_day(&self) -> bool {
        !matches!(
            self,
            Self::Provision { .. }
                | Self::Deprovision
                | Self::Day
                | Self::Lap { .. }
                | Self::CalcCot { .. }
                | Self::SetHp { .. }
                | Self::Groups
        )
    }
}

fn parse_boss(text: &str) -> Result<usize, String> {
    let boss: usize = text
        .parse()
        .map_err(|_| format!("{text:?} is not a boss number"))?;
    if (1..=BOSS_SLOTS).contains(&boss) {
        Ok(boss - 1)
    } else {
        Err(format!("boss must be between 1 and {BOSS_SLOTS}"))
    }
}

fn parse_kind(text: &str) -> Result<AttackKind, String> {
    text.parse()
        .map_err(|()| format!("unknown attack kind {text:?} (physical, magic, carry-over)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut out = BufWriter::new(stdout());
    run(&args, &mut out).await?;
    out.flush()?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config = EngineConfig::from_json(&text)
        .with_context(|| format!("invalid engine config in {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("rejected engine config in {}", path.display()))?;
    Ok(config)
}

fn load_catalog(path: Option<&Path>) -> Result<HpTable> {
    match path {
        Some(path) if path.exists() => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            HpTable::from_json(&text)
                .with_context(|| format!("invalid boss catalog in {}", path.display()))
        }
        _ => Ok(HpTable::default()),
    }
}

fn open_registry(args: &Args) -> Result<Registry> {
    let config = load_config(args.config.as_deref())?;
    let catalog = CatalogHandle::new(load_catalog(args.catalog.as_deref())?);
    let store = JsonFileStore::open(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;
    let registry = ClanRegistry::load(store, catalog, config).context("failed to load clans")?;
    Ok(registry)
}

async fn run(args: &Args, out: &mut dyn Write) -> Result<()> {
    match &args.command {
        Command::CalcCot { hp, damage } => calc_cot(args, out, hp, *damage),
        Command::SetHp { tier, boss, hp } => set_hp(args, out, *tier, *boss, *hp),
        Command::Groups => {
            let registry = open_registry(args)?;
            emit(out, args.json, &registry.groups(), |out, groups| {
                if groups.is_empty() {
                    writeln!(out, "No groups provisioned.")?;
                }
                for group_id in groups {
                    writeln!(out, "{group_id}")?;
                }
                Ok(())
            })
        }
        command => {
            let registry = open_registry(args)?;
            let group_id = args
                .group
                .context("--group is required for this command")?;
            group_command(&registry, group_id, command, args, out).await
        }
    }
}

#[derive(Serialize)]
struct CarryOverEstimate {
    remaining_hp: u64,
    damage: u64,
    seconds: Option<u32>,
}

fn calc_cot(args: &Args, out: &mut dyn Write, hp: &str, damage: u64) -> Result<()> {
    let remaining = parse_hp_expression(hp)
        .with_context(|| format!("could not evaluate hp expression {hp:?}"))?;
    let Ok(remaining_hp) = u64::try_from(remaining) else {
        bail!("the boss is already defeated ({remaining} hp)");
    };
    let estimate = CarryOverEstimate {
        remaining_hp,
        damage,
        seconds: carry_over_seconds(remaining_hp, damage),
    };
    emit(out, args.json, &estimate, |out, estimate| {
        match estimate.seconds {
            Some(seconds) => writeln!(out, "⏱️  {} carry-over", format!("{seconds}s").green())?,
            None => writeln!(
                out,
                "{} {} hp would remain",
                "not a finishing blow:".yellow(),
                estimate.remaining_hp - estimate.damage
            )?,
        }
        Ok(())
    })
}

fn set_hp(args: &Args, out: &mut dyn Write, tier: usize, boss: usize, hp: u64) -> Result<()> {
    let path = args
        .catalog
        .as_deref()
        .context("--catalog <path> is required to override hp")?;
    let tier = tier.checked_sub(1).context("tiers are numbered from 1")?;
    let mut table = load_catalog(Some(path))?;
    table.set_hp(tier, boss, hp)?;
    let text = serde_json::to_string_pretty(&table)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("catalog {}: tier {tier} boss {boss} set to {hp}", path.display());
    emit(out, args.json, &table, |out, _| {
        writeln!(
            out,
            "{} tier {} boss {} hp is now {hp}",
            "✅".green(),
            tier + 1,
            boss + 1
        )?;
        Ok(())
    })
}

/// Lap an attack command refers to: explicit, else the member's pending
/// declaration, else the lap the boss is currently on.
fn attack_lap(
    registry: &Registry,
    group_id: GroupId,
    user_id: UserId,
    slot: usize,
    lap: Option<u32>,
) -> Result<u32> {
    if let Some(lap) = lap {
        return Ok(lap);
    }
    let clan = registry.snapshot(group_id)?;
    Ok(clan
        .pending_lap(user_id, slot)
        .unwrap_or_else(|| clan.current_lap(slot)))
}

#[allow(clippy::too_many_lines)]
async fn group_command(
    registry: &Registry,
    group_id: GroupId,
    command: &Command,
    args: &Args,
    out: &mut dyn Write,
) -> Result<()> {
    let json = args.json;
    let now = args.now.unwrap_or_else(Utc::now);
    let preset = args
        .pick
        .map(|pick| pick.checked_sub(1).context("--pick is numbered from 1"))
        .transpose()?;
    let wait = registry.config().selection_timeout();

    if command.rolls_day()
        && let Some(rolled) = registry.check_day(group_id, now)?
        && !json
    {
        report::rollover(out, &rolled)?;
    }

    match command {
        Command::Provision { label } => {
            let clan = registry.provision(group_id, ClanConfig::labelled(label.as_str()))?;
            emit(out, json, &clan, |out, clan| {
                writeln!(out, "{} group {}", "✅ provisioned".green(), clan.group_id)?;
                Ok(())
            })
        }
        Command::Deprovision => {
            let clan = registry.deprovision(group_id)?;
            emit(out, json, &clan, |out, clan| {
                writeln!(
                    out,
                    "🗑️  deprovisioned group {} ({} members)",
                    clan.group_id,
                    clan.players.len()
                )?;
                Ok(())
            })
        }
        Command::Add { users } => {
            let added = registry.add_players(group_id, users)?;
            emit(out, json, &added, |out, added| {
                writeln!(out, "added {} new members {added:?}", added.len())?;
                Ok(())
            })
        }
        Command::Remove { user } => {
            let player = registry.remove_player(group_id, *user)?;
            emit(out, json, &player, |out, player| {
                writeln!(out, "removed user {}", player.user_id)?;
                Ok(())
            })
        }
        Command::Declare {
            user,
            boss,
            kind,
            lap,
        } => {
            let lap = match lap {
                Some(lap) => *lap,
                None => registry.snapshot(group_id)?.current_lap(*boss),
            };
            let record = registry.declare(group_id, *user, lap, *boss, *kind, now)?;
            emit(out, json, &record, |out, record| {
                write!(out, "📣 lap {lap} boss {}: ", boss + 1)?;
                report::record(out, record)
            })
        }
        Command::Damage {
            user,
            boss,
            report: text,
            lap,
        } => {
            let text = text.join(" ");
            let (damage, note) = parse_damage_report(&text)
                .with_context(|| format!("could not read a damage report from {text:?}"))?;
            let note = Some(note.as_str()).filter(|note| !note.is_empty());
            let record = registry.record_damage(group_id, *user, *lap, *boss, damage, note)?;
            emit(out, json, &record, report::record)
        }
        Command::Attack {
            user,
            boss,
            lap,
            damage,
        } => {
            let lap = attack_lap(registry, group_id, *user, *boss, *lap)?;
            let outcome = prompt::with_prompt(preset, wait, |selection| {
                registry.complete_attack(group_id, *user, lap, *boss, *damage, selection, now)
            })
            .await?;
            emit(out, json, &outcome, report::outcome)
        }
        Command::Defeat { user, boss, lap } => {
            let lap = attack_lap(registry, group_id, *user, *boss, *lap)?;
            let outcome = prompt::with_prompt(preset, wait, |selection| {
                registry.finish_boss(group_id, *user, lap, *boss, selection, now)
            })
            .await?;
            emit(out, json, &outcome, report::outcome)
        }
        Command::Undo { user } => {
            let outcome = registry.undo_last(group_id, *user)?;
            emit(out, json, &outcome, report::undo)
        }
        Command::Reserve { user, boss, kind } => {
            let reservation = registry.reserve(group_id, *user, *boss, *kind, now)?;
            emit(out, json, &reservation, |out, reservation| {
                write!(out, "📌 reserved ")?;
                report::reservation(out, reservation)
            })
        }
        Command::Cancel { user, boss } => {
            let reservation = prompt::with_prompt(preset, wait, |selection| {
                registry.cancel_reservation(group_id, *user, *boss, selection)
            })
            .await?;
            emit(out, json, &reservation, |out, reservation| {
                write!(out, "cancelled ")?;
                report::reservation(out, reservation)
            })
        }
        Command::Configure {
            user,
            boss,
            damage,
            note,
            carry_over,
        } => {
            let update = ReservationUpdate {
                damage: *damage,
                note: note.clone(),
                carry_over: *carry_over,
            };
            let reservation = prompt::with_prompt(preset, wait, |selection| {
                registry.configure_reservation(group_id, *user, *boss, selection, update.clone())
            })
            .await?;
            emit(out, json, &reservation, |out, reservation| {
                write!(out, "updated ")?;
                report::reservation(out, reservation)
            })
        }
        Command::Lap { lap } => {
            let rolled = registry.rollover_lap(group_id, *lap)?;
            emit(out, json, &rolled, report::rollover)
        }
        Command::Day => {
            let rolled = registry.rollover_day(group_id)?;
            emit(out, json, &rolled, report::rollover)
        }
        Command::TaskKill { user, off } => {
            registry.set_task_kill(group_id, *user, !off)?;
            let value = serde_json::json!({ "user_id": user, "task_kill": !off });
            emit(out, json, &value, |out, _| {
                let state = if *off { "cleared" } else { "set" };
                writeln!(out, "task kill {state} for user {user}")?;
                Ok(())
            })
        }
        Command::SetCot { user, seconds } => {
            let credit = prompt::with_prompt(preset, wait, |selection| {
                registry.set_carry_over_seconds(group_id, *user, *seconds, selection)
            })
            .await?;
            emit(out, json, &credit, report::credit)
        }
        Command::LimitTime { user, text } => {
            registry.set_limit_time(group_id, *user, text.clone())?;
            let value = serde_json::json!({ "user_id": user, "limit_time_text": text });
            emit(out, json, &value, |out, _| {
                match text {
                    Some(text) => writeln!(out, "user {user} available {text}")?,
                    None => writeln!(out, "cleared availability for user {user}")?,
                }
                Ok(())
            })
        }
        Command::Status => {
            let clan = registry.snapshot(group_id)?;
            let status = Status::new(&clan, registry.board(group_id)?);
            emit(out, json, &status, report::status)
        }
        Command::CalcCot { .. } | Command::SetHp { .. } | Command::Groups => {
            bail!("this command does not operate on a group")
        }
    }
}

use std::io::Write;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, instrument};

use crate::binning::{EventIndex, ScheduleGrid};
use crate::calendar::{MonthGrid, week_of};
use crate::cli::{Command, DateArgs, FileAction, MonthArgs, PictureAction, ScheduleAction, SubjectAction};
use crate::datefmt::{DateFormat, parse_any};
use crate::datetime::{parse_date_expr, parse_datetime_expr};
use crate::pager::WeekPager;
use crate::record::{EventRecord, RecordSource, ScheduleEntry};
use crate::render::{Renderer, short_date};
use crate::store::{DocumentStore, UserDocument};

/// Who the command runs for and what "today" is.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub today: NaiveDate,
    pub weeks_before: u32,
    pub weeks_after: u32,
}

#[instrument(skip(out, store, renderer, session, command), fields(user = %session.user))]
pub fn dispatch<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, today = %session.today, "dispatching command");

    match command {
        Command::Month(args) => cmd_month(out, store, renderer, session, args),
        Command::Weeks(args) => cmd_weeks(out, store, renderer, session, args),
        Command::Week(args) => cmd_week(out, store, renderer, session, args),
        Command::Day(args) => cmd_day(out, store, renderer, session, args),
        Command::Schedule(action) => cmd_schedule(out, store, renderer, session, action),
        Command::Subject(action) => cmd_subject(out, store, renderer, session, action),
        Command::File(action) => cmd_file(out, store, session, action),
        Command::Picture(action) => cmd_picture(out, store, session, action),
        Command::Import { path } => {
            let doc = store
                .import(&session.user, &path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            writeln!(
                out,
                "Imported {} courses, {} classes, {} schedule items, {} subjects.",
                doc.courses.len(),
                doc.weekly_classes.len(),
                doc.schedule.len(),
                doc.subjects.len()
            )?;
            Ok(())
        }
    }
}

fn resolve_date(expr: Option<&str>, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    match expr {
        Some(raw) => parse_date_expr(raw, today),
        None => Ok(today),
    }
}

fn collect_records(doc: &UserDocument, source: Option<RecordSource>) -> Vec<EventRecord> {
    match source {
        Some(source) => doc.records(source),
        None => [
            RecordSource::Courses,
            RecordSource::Classes,
            RecordSource::Schedule,
        ]
        .into_iter()
        .flat_map(|source| doc.records(source))
        .collect(),
    }
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_month<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    args: MonthArgs,
) -> anyhow::Result<()> {
    let year = args.year.unwrap_or(session.today.year());
    let month = args.month.unwrap_or(session.today.month());
    let grid = MonthGrid::generate(year, month.saturating_sub(1))
        .with_context(|| format!("cannot lay out {year}-{month:02}"))?;

    let doc = store.load(&session.user)?;
    let records = doc.records(args.source.unwrap_or(RecordSource::Courses));
    let index = EventIndex::build(&records);

    renderer.month(&mut *out, &grid, &index, session.today)?;
    info!(rows = grid.weeks().len(), records = records.len(), "month rendered");
    Ok(())
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_weeks<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    args: DateArgs,
) -> anyhow::Result<()> {
    let target = resolve_date(args.date.as_deref(), session.today)?;
    let mut pager = WeekPager::new(session.today, session.weeks_before, session.weeks_after);
    match pager.windows().position_of(target) {
        Some((week, day)) => {
            pager.select(week, day);
        }
        None => {
            debug!(%target, "date outside the current windows; recentering");
            pager.reset_to(target);
        }
    }

    let doc = store.load(&session.user)?;
    let records = doc.records(args.source.unwrap_or(RecordSource::Classes));
    let index = EventIndex::build(&records);

    renderer.weeks(&mut *out, &pager, &index, session.today)?;
    if let Some(selected) = pager.selected_date() {
        writeln!(out)?;
        renderer.records(&mut *out, selected, &index.on_date(selected))?;
    }
    Ok(())
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_week<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    args: DateArgs,
) -> anyhow::Result<()> {
    let target = resolve_date(args.date.as_deref(), session.today)?;
    let doc = store.load(&session.user)?;
    let records = doc.records(args.source.unwrap_or(RecordSource::Schedule));
    let days = week_of(target)
        .with_context(|| format!("the week of {target} is outside the supported calendar range"))?;
    let grid = ScheduleGrid::build(days, &records);
    renderer.week(&mut *out, &grid, session.today)
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_day<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    args: DateArgs,
) -> anyhow::Result<()> {
    let target = resolve_date(args.date.as_deref(), session.today)?;
    let doc = store.load(&session.user)?;
    let records = collect_records(&doc, args.source);
    let index = EventIndex::build(&records);
    renderer.records(&mut *out, target, &index.on_date(target))
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_schedule<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    action: ScheduleAction,
) -> anyhow::Result<()> {
    match action {
        ScheduleAction::Add { at, content } => {
            let at = parse_datetime_expr(&at, session.today)?;
            let entry = store.add_schedule(&session.user, at, &content.join(" "))?;
            writeln!(
                out,
                "Added \"{}\" on {} at {}.",
                entry.name,
                short_date(at.date()),
                entry.timestart
            )?;
        }
        ScheduleAction::Remove { date, name, color } => {
            let day = parse_date_expr(&date, session.today)?;
            let target = ScheduleEntry {
                daystart: DateFormat::Iso.format(day),
                name,
                timestart: String::new(),
                color,
            };
            let removed = store.remove_schedule(&session.user, &target)?;
            writeln!(out, "Removed {removed} schedule item(s).")?;
        }
        ScheduleAction::List { date } => {
            let day = date
                .as_deref()
                .map(|raw| parse_date_expr(raw, session.today))
                .transpose()?;
            let mut entries = store
                .load(&session.user)?
                .schedule
                .into_iter()
                .filter(|entry| day.is_none() || parse_any(&entry.daystart) == day)
                .collect::<Vec<_>>();
            entries.sort_by(|a, b| {
                parse_any(&a.daystart)
                    .cmp(&parse_any(&b.daystart))
                    .then_with(|| a.timestart.cmp(&b.timestart))
            });
            renderer.schedule_list(&mut *out, &entries)?;
        }
    }
    Ok(())
}

#[instrument(skip(out, store, renderer, session))]
fn cmd_subject<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    renderer: &Renderer,
    session: &Session,
    action: SubjectAction,
) -> anyhow::Result<()> {
    match action {
        SubjectAction::Add { name } => {
            let subjects = store.add_subject(&session.user, &name)?;
            writeln!(out, "Added subject {name} ({} total).", subjects.len())?;
        }
        SubjectAction::Remove { name } => {
            let subjects = store.remove_subject(&session.user, &name)?;
            writeln!(out, "Removed subject {name} ({} left).", subjects.len())?;
        }
        SubjectAction::List => {
            let doc = store.load(&session.user)?;
            renderer.subjects(&mut *out, &doc.subjects)?;
        }
    }
    Ok(())
}

#[instrument(skip(out, store, session))]
fn cmd_file<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    session: &Session,
    action: FileAction,
) -> anyhow::Result<()> {
    match action {
        FileAction::Add { subject, uri, name } => {
            let file = store.add_file(&session.user, &subject, &name, &uri)?;
            writeln!(out, "Saved {} to {subject}.", file.name)?;
        }
        FileAction::Remove { subject, uri } => {
            store.remove_file(&session.user, &subject, &uri)?;
            writeln!(out, "Removed {uri} from {subject}.")?;
        }
        FileAction::Restore { subject, uri, base } => {
            let restored = store.restore_file(&session.user, &subject, &uri, &base)?;
            writeln!(out, "Restored {restored} in {subject}.")?;
        }
    }
    Ok(())
}

#[instrument(skip(out, store, session))]
fn cmd_picture<W: Write>(
    out: &mut W,
    store: &DocumentStore,
    session: &Session,
    action: PictureAction,
) -> anyhow::Result<()> {
    match action {
        PictureAction::Add { subject, uri } => {
            store.add_picture(&session.user, &subject, &uri)?;
            writeln!(out, "Saved picture to {subject}.")?;
        }
        PictureAction::Remove { subject, uri } => {
            store.remove_picture(&session.user, &subject, &uri)?;
            writeln!(out, "Removed {uri} from {subject}.")?;
        }
        PictureAction::Restore { subject, uri, base } => {
            let restored = store.restore_picture(&session.user, &subject, &uri, &base)?;
            writeln!(out, "Restored {restored} in {subject}.")?;
        }
    }
    Ok(())
}

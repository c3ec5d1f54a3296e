use std::io::{self, IsTerminal, Write};

use chrono::{NaiveDate, Timelike};
use unicode_width::UnicodeWidthStr;

use crate::binning::{EventIndex, ScheduleGrid, TimeBlock};
use crate::calendar::{DAYS_PER_WEEK, MonthGrid};
use crate::config::Config;
use crate::datefmt::DateFormat;
use crate::pager::WeekPager;
use crate::record::{Category, EventRecord, ScheduleEntry};
use crate::store::SubjectFolder;

const WEEKDAY_HEADERS: [&str; DAYS_PER_WEEK] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
const MONTH_CELL_WIDTH: usize = 6;
const WEEKS_BADGE_WIDTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: color_enabled(cfg) && io::stdout().is_terminal(),
        }
    }

    /// Renderer that never emits escape codes.
    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Month grid; each day shows its badge count in brackets.
    #[tracing::instrument(skip_all, fields(year = grid.year(), month = grid.month()))]
    pub fn month<W: Write>(
        &self,
        mut out: W,
        grid: &MonthGrid,
        index: &EventIndex<'_>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let title = grid.first_day().format("%B %Y").to_string();
        let total_width = MONTH_CELL_WIDTH * DAYS_PER_WEEK + DAYS_PER_WEEK - 1;
        writeln!(out, "{title:^total_width$}")?;

        let header = WEEKDAY_HEADERS
            .iter()
            .map(|name| format!("{name:<MONTH_CELL_WIDTH$}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{}", header.trim_end())?;

        let badges = index.month_badges(grid);
        for (row, week) in grid.weeks().iter().enumerate() {
            let mut cells = Vec::with_capacity(DAYS_PER_WEEK);
            for (col, cell) in week.iter().enumerate() {
                let Some(day) = cell.day else {
                    cells.push(" ".repeat(MONTH_CELL_WIDTH));
                    continue;
                };
                let number = format!("{day:>2}");
                let number = if grid.date_at(row, col) == Some(today) {
                    self.paint(&number, "7")
                } else {
                    number
                };
                let badge = badges[row][col]
                    .map(|count| format!("[{count}]"))
                    .unwrap_or_default();
                let padding = MONTH_CELL_WIDTH.saturating_sub(2 + badge.width());
                cells.push(format!(
                    "{number}{}{}",
                    self.paint(&badge, "33"),
                    " ".repeat(padding)
                ));
            }
            writeln!(out, "{}", cells.join(" ").trim_end())?;
        }

        Ok(())
    }

    /// The paged week windows, one line per window, with the pager's
    /// selection marked.
    #[tracing::instrument(skip_all)]
    pub fn weeks<W: Write>(
        &self,
        mut out: W,
        pager: &WeekPager,
        index: &EventIndex<'_>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let (selected_week, selected_day) = pager.selected();
        let formatted = pager.windows().formatted();

        for (week, window) in pager.windows().windows().iter().enumerate() {
            let marker = if week == pager.windows().center_index() {
                ">"
            } else {
                " "
            };
            let badges = index.window_badges(window);

            let mut cells = Vec::with_capacity(DAYS_PER_WEEK);
            for (col, day) in window.iter().enumerate() {
                let label = &formatted[week][col];
                let label = if (week, col) == (selected_week, selected_day) {
                    self.paint(&format!("*{label}"), "7")
                } else if *day == today {
                    self.paint(&format!(" {label}"), "1")
                } else {
                    format!(" {label}")
                };
                let badge = badges[col]
                    .map(|count| format!("({count})"))
                    .unwrap_or_default();
                let padding = WEEKS_BADGE_WIDTH.saturating_sub(badge.width());
                cells.push(format!(
                    "{label}{}{}",
                    self.paint(&badge, "33"),
                    " ".repeat(padding)
                ));
            }
            writeln!(out, "{marker}{}", cells.join(" ").trim_end())?;
        }

        Ok(())
    }

    /// One week as a block-by-day table. Stacked records are joined in
    /// start order.
    #[tracing::instrument(skip_all, fields(placed = grid.placed()))]
    pub fn week<W: Write>(
        &self,
        mut out: W,
        grid: &ScheduleGrid<'_>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut headers = vec!["Time".to_string()];
        headers.extend(grid.days().iter().map(|day| {
            let label = day.format("%a %d/%m").to_string();
            if *day == today {
                self.paint(&label, "1")
            } else {
                label
            }
        }));

        let rows = TimeBlock::ALL
            .iter()
            .map(|block| {
                let mut row = vec![block.label().to_string()];
                row.extend((0..DAYS_PER_WEEK).map(|col| {
                    grid.cell(col, *block)
                        .iter()
                        .map(|record| self.record_cell(record))
                        .collect::<Vec<_>>()
                        .join("; ")
                }));
                row
            })
            .collect::<Vec<_>>();

        write_table(&mut out, headers, rows)?;
        if grid.untimed() > 0 {
            writeln!(out, "{} item(s) without a start time", grid.untimed())?;
        }
        Ok(())
    }

    /// Records of one day, as the selected-day list shows them.
    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub fn records<W: Write>(
        &self,
        mut out: W,
        date: NaiveDate,
        records: &[&EventRecord],
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", date.format("%A %d/%m/%Y"))?;
        if records.is_empty() {
            writeln!(out, "No events.")?;
            return Ok(());
        }

        let headers = ["Time", "Kind", "Name", "Detail"]
            .map(str::to_string)
            .to_vec();
        let rows = records
            .iter()
            .map(|record| {
                let time = record
                    .start
                    .map(|start| start.format("%H:%M").to_string())
                    .unwrap_or_else(|| "--:--".to_string());
                let detail = record
                    .detail
                    .clone()
                    .or_else(|| record.url.clone())
                    .unwrap_or_default();
                vec![time, self.kind_label(&record.category), record.name.clone(), detail]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(entries = entries.len()))]
    pub fn schedule_list<W: Write>(
        &self,
        mut out: W,
        entries: &[ScheduleEntry],
    ) -> anyhow::Result<()> {
        let headers = ["Day", "Time", "Name", "Color"]
            .map(str::to_string)
            .to_vec();
        let rows = entries
            .iter()
            .map(|entry| {
                vec![
                    entry.daystart.clone(),
                    entry.timestart.clone(),
                    entry.name.clone(),
                    entry.color.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(subjects = folders.len()))]
    pub fn subjects<W: Write>(&self, mut out: W, folders: &[SubjectFolder]) -> anyhow::Result<()> {
        for folder in folders {
            writeln!(
                out,
                "{} ({} files, {} pictures)",
                self.paint(&folder.name, "1"),
                folder.files.len(),
                folder.pictures.len()
            )?;
            for file in &folder.files {
                writeln!(out, "  file    {}  {}", file.name, file.uri)?;
            }
            for picture in &folder.pictures {
                writeln!(out, "  picture {}", picture.uri)?;
            }
        }
        Ok(())
    }

    fn record_cell(&self, record: &EventRecord) -> String {
        let time = record
            .start
            .map(|start| format!("{:02}:{:02} ", start.hour(), start.minute()))
            .unwrap_or_default();
        let text = format!("{time}{}", record.name);
        match &record.category {
            Category::Deadline => self.paint(&text, "31"),
            Category::Class { suspended: true } => self.paint(&text, "9"),
            _ => text,
        }
    }

    fn kind_label(&self, category: &Category) -> String {
        match category {
            Category::Opening => "opens".to_string(),
            Category::Deadline => self.paint("due", "31"),
            Category::Class { suspended: false } => "class".to_string(),
            Category::Class { suspended: true } => self.paint("class (suspended)", "2"),
            Category::Personal { .. } => "personal".to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// `color` key, on unless the rc file turns it off.
fn color_enabled(cfg: &Config) -> bool {
    cfg.get_bool("color").unwrap_or(true)
}

/// `DD/MM/YY` label used in confirmations.
pub fn short_date(date: NaiveDate) -> String {
    DateFormat::DayMonthShortYear.format(date)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        let padding = widths[idx].saturating_sub(UnicodeWidthStr::width(strip_ansi(header).as_str()));
        write!(writer, "{}{} ", header, " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

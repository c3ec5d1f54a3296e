//! Event-to-cell binning for calendar badges, the selected-day list
//! and the weekly schedule grid.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{
  Datelike,
  NaiveDate,
  Timelike
};
use serde::Serialize;
use tracing::debug;

use crate::calendar::{
  DAYS_PER_WEEK,
  MonthGrid
};
use crate::record::EventRecord;

/// Day-of-month and month of a calendar cell. Matching never compares
/// years: records are assumed to belong to the displayed span.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
)]
pub struct DayKey {
  pub day:   u32,
  pub month: u32
}

impl DayKey {
  #[must_use]
  pub const fn new(
    day: u32,
    month: u32
  ) -> Self {
    Self { day, month }
  }
}

impl From<NaiveDate> for DayKey {
  fn from(date: NaiveDate) -> Self {
    Self::new(date.day(), date.month())
  }
}

/// Whether `record` falls on the cell `key`.
#[must_use]
pub fn matches(
  record: &EventRecord,
  key: DayKey
) -> bool {
  DayKey::from(record.date) == key
}

/// Like [`matches`], and a weekly class also needs its weekday to agree
/// with the cell's.
#[must_use]
pub fn matches_date(
  record: &EventRecord,
  cell: NaiveDate
) -> bool {
  matches(record, cell.into())
    && record.weekday.is_none_or(
      |weekday| weekday == cell.weekday()
    )
}

/// Records grouped by cell once per render pass.
#[derive(Debug, Clone)]
pub struct EventIndex<'a> {
  records: &'a [EventRecord],
  by_day:  BTreeMap<DayKey, Vec<usize>>
}

impl<'a> EventIndex<'a> {
  #[tracing::instrument(skip_all, fields(records = records.len()))]
  pub fn build(
    records: &'a [EventRecord]
  ) -> Self {
    let mut by_day: BTreeMap<
      DayKey,
      Vec<usize>
    > = BTreeMap::new();
    for (index, record) in
      records.iter().enumerate()
    {
      by_day
        .entry(record.date.into())
        .or_default()
        .push(index);
    }

    debug!(
      cells = by_day.len(),
      "event index built"
    );
    Self { records, by_day }
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn count(
    &self,
    key: DayKey
  ) -> usize {
    self
      .by_day
      .get(&key)
      .map_or(0, Vec::len)
  }

  /// Badge value for a cell; `None` when nothing falls on it.
  pub fn badge(
    &self,
    key: DayKey
  ) -> Option<usize> {
    Some(self.count(key))
      .filter(|count| *count > 0)
  }

  /// Records of the selected day, in input order.
  pub fn on_day(
    &self,
    key: DayKey
  ) -> Vec<&'a EventRecord> {
    self
      .by_day
      .get(&key)
      .into_iter()
      .flatten()
      .map(|index| &self.records[*index])
      .collect()
  }

  pub fn on_date(
    &self,
    cell: NaiveDate
  ) -> Vec<&'a EventRecord> {
    self
      .on_day(cell.into())
      .into_iter()
      .filter(|record| {
        matches_date(record, cell)
      })
      .collect()
  }

  pub fn badge_on(
    &self,
    cell: NaiveDate
  ) -> Option<usize> {
    Some(self.on_date(cell).len())
      .filter(|count| *count > 0)
  }

  /// Badges laid out like the rows of `grid`.
  pub fn month_badges(
    &self,
    grid: &MonthGrid
  ) -> Vec<[Option<usize>; DAYS_PER_WEEK]>
  {
    let mut rows = vec![
      [None; DAYS_PER_WEEK];
      grid.weeks().len()
    ];
    for (row, col, date) in
      grid.cells_with_dates()
    {
      rows[row][col] = date
        .and_then(|day| self.badge_on(day));
    }
    rows
  }

  pub fn window_badges(
    &self,
    window: &[NaiveDate; DAYS_PER_WEEK]
  ) -> [Option<usize>; DAYS_PER_WEEK] {
    window.map(|day| self.badge_on(day))
  }
}

/// Six-hour slice of a day in the weekly schedule grid.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
)]
pub enum TimeBlock {
  Night,
  Morning,
  Afternoon,
  Evening
}

impl TimeBlock {
  pub const ALL: [TimeBlock; TIME_BLOCKS] = [
    TimeBlock::Night,
    TimeBlock::Morning,
    TimeBlock::Afternoon,
    TimeBlock::Evening
  ];

  /// `hour / 6`, floored.
  pub fn from_hour(
    hour: u32
  ) -> Option<Self> {
    Self::ALL
      .get((hour / 6) as usize)
      .copied()
  }

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn hours(self) -> Range<u32> {
    let start = self.index() as u32 * 6;
    start..start + 6
  }

  pub fn label(self) -> &'static str {
    match self {
      | TimeBlock::Night => "00-06",
      | TimeBlock::Morning => "06-12",
      | TimeBlock::Afternoon => "12-18",
      | TimeBlock::Evening => "18-24"
    }
  }
}

pub const TIME_BLOCKS: usize = 4;

type BlockColumn<'a> =
  [Vec<&'a EventRecord>; TIME_BLOCKS];

/// A Monday-first week of day columns, each split into four time
/// blocks. Records sharing a block are stacked in start order; nothing
/// is re-flowed when they overlap.
#[derive(Debug, Clone)]
pub struct ScheduleGrid<'a> {
  days:    [NaiveDate; DAYS_PER_WEEK],
  columns: [BlockColumn<'a>; DAYS_PER_WEEK],
  untimed: usize
}

impl<'a> ScheduleGrid<'a> {
  #[tracing::instrument(skip(records), fields(records = records.len()))]
  pub fn build(
    days: [NaiveDate; DAYS_PER_WEEK],
    records: &'a [EventRecord]
  ) -> Self {
    let index = EventIndex::build(records);
    let mut columns: [BlockColumn<'a>;
      DAYS_PER_WEEK] =
      std::array::from_fn(|_| {
        std::array::from_fn(|_| Vec::new())
      });
    let mut untimed = 0;

    for (col, day) in
      days.iter().enumerate()
    {
      for record in index.on_date(*day) {
        let Some(block) =
          record.start.and_then(|start| {
            TimeBlock::from_hour(
              start.hour()
            )
          })
        else {
          untimed += 1;
          continue;
        };
        columns[col][block.index()]
          .push(record);
      }
      for cell in &mut columns[col] {
        cell.sort_by(|a, b| {
          a.start
            .cmp(&b.start)
            .then_with(|| a.name.cmp(&b.name))
        });
      }
    }

    debug!(
      untimed,
      "schedule grid built"
    );
    Self {
      days,
      columns,
      untimed
    }
  }

  pub fn days(
    &self
  ) -> &[NaiveDate; DAYS_PER_WEEK] {
    &self.days
  }

  pub fn cell(
    &self,
    col: usize,
    block: TimeBlock
  ) -> &[&'a EventRecord] {
    self
      .columns
      .get(col)
      .map(|column| {
        column[block.index()].as_slice()
      })
      .unwrap_or(&[])
  }

  /// Records of the week that have no usable start time and are left
  /// out of the grid.
  pub fn untimed(&self) -> usize {
    self.untimed
  }

  pub fn placed(&self) -> usize {
    self
      .columns
      .iter()
      .flatten()
      .map(Vec::len)
      .sum()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    NaiveTime,
    Weekday
  };

  use super::*;
  use crate::calendar::week_of;
  use crate::record::{
    Category,
    CourseEntry,
    ScheduleEntry,
    StoredEntry
  };

  fn date(
    year: i32,
    month: u32,
    day: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(
      year, month, day
    )
    .expect("valid date")
  }

  fn personal(
    on: NaiveDate,
    start: Option<(u32, u32)>,
    name: &str
  ) -> EventRecord {
    EventRecord {
      date: on,
      start: start.and_then(|(h, m)| {
        NaiveTime::from_hms_opt(h, m, 0)
      }),
      name: name.to_string(),
      category: Category::Personal {
        color: "rgba(220, 220, 220)"
          .to_string()
      },
      weekday: None,
      url: None,
      detail: None
    }
  }

  #[test]
  fn course_matches_on_day_and_month_only(
  ) {
    let record = CourseEntry {
      daystart: "12/03/2025".to_string(),
      timestart: "1700000000".to_string(),
      ..CourseEntry::default()
    }
    .to_record()
    .expect("readable course");

    assert!(matches(
      &record,
      DayKey::new(12, 3)
    ));
    assert!(!matches(
      &record,
      DayKey::new(12, 4)
    ));
    assert!(matches_date(
      &record,
      date(2026, 3, 12)
    ));
  }

  #[test]
  fn counts_and_badges() {
    let day = date(2025, 11, 12);
    let records = vec![
      personal(day, None, "a"),
      personal(day, None, "b"),
      personal(
        date(2025, 11, 13),
        None,
        "c"
      ),
    ];
    let index = EventIndex::build(&records);

    assert_eq!(
      index.count(day.into()),
      2
    );
    assert_eq!(
      index.badge(day.into()),
      Some(2)
    );
    assert_eq!(
      index.badge(DayKey::new(14, 11)),
      None
    );
    assert_eq!(
      index
        .on_day(day.into())
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>(),
      vec!["a", "b"]
    );
  }

  #[test]
  fn empty_records_bin_to_nothing() {
    let index = EventIndex::build(&[]);
    assert!(index.is_empty());
    let grid = MonthGrid::generate(2025, 10)
      .expect("valid month");
    assert!(
      index
        .month_badges(&grid)
        .iter()
        .flatten()
        .all(Option::is_none)
    );
  }

  #[test]
  fn binning_ignores_record_order() {
    let records = (1..=20)
      .map(|n| {
        personal(
          date(2025, 11, (n % 7) + 1),
          Some((n % 24, 0)),
          &format!("item {n}")
        )
      })
      .collect::<Vec<_>>();
    let mut shuffled = records.clone();
    shuffled.reverse();
    shuffled.rotate_left(7);

    let forward = EventIndex::build(&records);
    let backward =
      EventIndex::build(&shuffled);
    for day in 1..=31 {
      let key = DayKey::new(day, 11);
      assert_eq!(
        forward.count(key),
        backward.count(key)
      );
      let mut a = forward
        .on_day(key)
        .iter()
        .map(|r| r.name.clone())
        .collect::<Vec<_>>();
      let mut b = backward
        .on_day(key)
        .iter()
        .map(|r| r.name.clone())
        .collect::<Vec<_>>();
      a.sort();
      b.sort();
      assert_eq!(a, b);
    }

    let week = week_of(date(2025, 11, 5))
      .expect("inner week");
    let grid_a =
      ScheduleGrid::build(week, &records);
    let grid_b =
      ScheduleGrid::build(week, &shuffled);
    for col in 0..DAYS_PER_WEEK {
      for block in TimeBlock::ALL {
        assert_eq!(
          grid_a.cell(col, block),
          grid_b.cell(col, block)
        );
      }
    }
  }

  #[test]
  fn weekly_class_needs_matching_weekday() {
    let mut record = personal(
      date(2025, 11, 12),
      None,
      "Discrete Mathematics"
    );
    record.category =
      Category::Class { suspended: false };
    record.weekday = Some(Weekday::Wed);
    let records = vec![record];
    let index = EventIndex::build(&records);

    assert_eq!(
      index.badge_on(date(2025, 11, 12)),
      Some(1)
    );
    assert_eq!(
      index.badge_on(date(2026, 11, 12)),
      None
    );
    assert_eq!(
      index.count(DayKey::new(12, 11)),
      1
    );
  }

  #[test]
  fn month_badges_follow_grid_layout() {
    let records = vec![
      personal(
        date(2024, 2, 1),
        None,
        "first"
      ),
      personal(
        date(2024, 2, 29),
        None,
        "leap"
      ),
    ];
    let index = EventIndex::build(&records);
    let grid = MonthGrid::generate(2024, 1)
      .expect("valid month");
    let badges = index.month_badges(&grid);

    assert_eq!(badges[0][3], Some(1));
    assert_eq!(badges[4][3], Some(1));
    assert_eq!(
      badges
        .iter()
        .flatten()
        .flatten()
        .sum::<usize>(),
      2
    );
  }

  #[test]
  fn hours_floor_into_six_hour_blocks() {
    let cases = [
      (0, TimeBlock::Night),
      (5, TimeBlock::Night),
      (6, TimeBlock::Morning),
      (11, TimeBlock::Morning),
      (12, TimeBlock::Afternoon),
      (17, TimeBlock::Afternoon),
      (18, TimeBlock::Evening),
      (23, TimeBlock::Evening)
    ];
    for (hour, block) in cases {
      assert_eq!(
        TimeBlock::from_hour(hour),
        Some(block),
        "{hour}"
      );
      assert!(block.hours().contains(&hour));
    }
    assert_eq!(
      TimeBlock::from_hour(24),
      None
    );
  }

  #[test]
  fn schedule_grid_stacks_same_block() {
    let wednesday = date(2025, 11, 12);
    let entries = vec![
      ScheduleEntry {
        daystart: "2025-11-12".to_string(),
        name: "Gym".to_string(),
        timestart: "13:30".to_string(),
        color: String::new()
      },
      ScheduleEntry {
        daystart: "2025-11-12".to_string(),
        name: "Lab report".to_string(),
        timestart: "13:00".to_string(),
        color: String::new()
      },
      ScheduleEntry {
        daystart: "2025-11-12".to_string(),
        name: "Someday".to_string(),
        timestart: String::new(),
        color: String::new()
      },
      ScheduleEntry {
        daystart: "2025-11-20".to_string(),
        name: "Next week".to_string(),
        timestart: "08:00".to_string(),
        color: String::new()
      },
    ];
    let records =
      crate::record::ingest(&entries);
    let grid = ScheduleGrid::build(
      week_of(wednesday)
        .expect("inner week"),
      &records
    );

    let stacked =
      grid.cell(2, TimeBlock::Afternoon);
    assert_eq!(
      stacked
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>(),
      vec!["Lab report", "Gym"]
    );
    assert_eq!(grid.placed(), 2);
    assert_eq!(grid.untimed(), 1);
    assert!(
      grid
        .cell(9, TimeBlock::Night)
        .is_empty()
    );
  }
}

//! Calendar date arithmetic: month grids, sliding week windows and
//! Monday-first weekday alignment.
//!
//! Every column index in this crate follows one convention: Monday is
//! column 0 and Sunday is column 6.

use chrono::{
  Datelike,
  Duration,
  NaiveDate
};
use serde::Serialize;
use tracing::debug;

use crate::datefmt::DateFormat;
use crate::error::{
  CalendarError,
  CalendarResult
};

pub const DAYS_PER_WEEK: usize = 7;
pub const DEFAULT_WEEKS_BEFORE: u32 = 2;
pub const DEFAULT_WEEKS_AFTER: u32 = 6;
/// Largest configurable `before` / `after` week count (ten years).
pub const MAX_WEEKS_SPAN: u32 = 520;

/// One slot of a month grid. `day` is `None` for the blank cells that
/// pad the first and last rows.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct CalendarCell {
  pub day: Option<u32>
}

impl CalendarCell {
  pub const BLANK: CalendarCell =
    CalendarCell { day: None };

  #[must_use]
  pub const fn day(
    day: u32
  ) -> CalendarCell {
    CalendarCell { day: Some(day) }
  }

  #[must_use]
  pub const fn is_blank(
    &self
  ) -> bool {
    self.day.is_none()
  }
}

pub type WeekGrid =
  [CalendarCell; DAYS_PER_WEEK];

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct MonthGrid {
  year:  i32,
  month: u32,
  weeks: Vec<WeekGrid>
}

impl MonthGrid {
  /// Lays out `month0` (zero-based, 0 = January) of `year` as
  /// Monday-first rows of seven cells.
  #[tracing::instrument]
  pub fn generate(
    year: i32,
    month0: u32
  ) -> CalendarResult<Self> {
    if month0 > 11 {
      return Err(
        CalendarError::InvalidArgument(
          format!(
            "month must be within \
             0..=11, got {month0}"
          )
        )
      );
    }

    let first = NaiveDate::from_ymd_opt(
      year,
      month0 + 1,
      1
    )
    .ok_or_else(|| {
      CalendarError::InvalidArgument(
        format!(
          "year {year} is outside the \
           supported calendar range"
        )
      )
    })?;

    Ok(Self::layout(first))
  }

  /// Grid of the month containing `date`.
  #[must_use]
  pub fn for_date(
    date: NaiveDate
  ) -> Self {
    Self::layout(first_day_of_month(
      date
    ))
  }

  fn layout(first: NaiveDate) -> Self {
    let days_in_month = days_in_month(
      first.year(),
      first.month()
    ) as i64;
    let offset =
      i64::from(monday_index(first));

    let mut weeks = Vec::with_capacity(6);
    let mut current = 1 - offset;
    while current <= days_in_month {
      let mut week =
        [CalendarCell::BLANK; DAYS_PER_WEEK];
      for cell in &mut week {
        if (1..=days_in_month)
          .contains(&current)
        {
          *cell = CalendarCell::day(
            current as u32
          );
        }
        current += 1;
      }
      weeks.push(week);
    }

    debug!(
      year = first.year(),
      month = first.month(),
      offset,
      rows = weeks.len(),
      "month grid generated"
    );

    Self {
      year: first.year(),
      month: first.month(),
      weeks
    }
  }

  pub fn year(&self) -> i32 {
    self.year
  }

  /// One-based month number.
  pub fn month(&self) -> u32 {
    self.month
  }

  pub fn weeks(&self) -> &[WeekGrid] {
    &self.weeks
  }

  pub fn first_day(
    &self
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(
      self.year, self.month, 1
    )
    .unwrap_or(NaiveDate::MIN)
  }

  pub fn day_count(&self) -> usize {
    self
      .weeks
      .iter()
      .flatten()
      .filter(|cell| !cell.is_blank())
      .count()
  }

  pub fn date_at(
    &self,
    row: usize,
    col: usize
  ) -> Option<NaiveDate> {
    let day = self
      .weeks
      .get(row)?
      .get(col)?
      .day?;
    NaiveDate::from_ymd_opt(
      self.year, self.month, day
    )
  }

  /// Every cell with its row, column and resolved date.
  pub fn cells_with_dates(
    &self
  ) -> impl Iterator<
    Item = (usize, usize, Option<NaiveDate>)
  > + '_ {
    self.weeks.iter().enumerate().flat_map(
      move |(row, week)| {
        week.iter().enumerate().map(
          move |(col, cell)| {
            let date =
              cell.day.and_then(|day| {
                NaiveDate::from_ymd_opt(
                  self.year, self.month,
                  day
                )
              });
            (row, col, date)
          }
        )
      }
    )
  }
}

/// Column of `date` in a Monday-first week. Equivalent to
/// `(sunday_based + 6) % 7`.
#[must_use]
pub fn monday_index(
  date: NaiveDate
) -> u32 {
  date.weekday().num_days_from_monday()
}

/// Monday of the week holding `date`; `None` when that Monday falls
/// before the supported calendar range.
#[must_use]
pub fn monday_of(
  date: NaiveDate
) -> Option<NaiveDate> {
  add_days(
    date,
    -i64::from(monday_index(date))
  )
}

/// `date` shifted by `days`; `None` past either end of the calendar.
#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  date.checked_add_signed(
    Duration::try_days(days)?
  )
}

#[must_use]
pub fn first_day_of_month(
  date: NaiveDate
) -> NaiveDate {
  date.with_day(1).unwrap_or(date)
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  (28..=31)
    .rev()
    .find(|day| {
      NaiveDate::from_ymd_opt(
        year, month, *day
      )
      .is_some()
    })
    .unwrap_or(0)
}

/// Monday through Sunday of the week containing `reference`. `None`
/// for the partial weeks at the very ends of the calendar.
#[must_use]
pub fn week_of(
  reference: NaiveDate
) -> Option<[NaiveDate; DAYS_PER_WEEK]> {
  week_starting(monday_of(reference)?)
}

fn week_starting(
  monday: NaiveDate
) -> Option<[NaiveDate; DAYS_PER_WEEK]> {
  add_days(
    monday,
    DAYS_PER_WEEK as i64 - 1
  )?;
  Some(std::array::from_fn(|offset| {
    monday + Duration::days(offset as i64)
  }))
}

/// [`week_of`] rendered as `YYYY-MM-DD` keys; empty at the ends of the
/// calendar.
#[must_use]
pub fn week_day_strings(
  reference: NaiveDate
) -> Vec<String> {
  week_of(reference)
    .into_iter()
    .flatten()
    .map(|day| {
      DateFormat::Iso.format(day)
    })
    .collect()
}

/// A run of consecutive Monday-first weeks around a reference date,
/// backing the horizontally paged week selector.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct WeekWindows {
  reference: NaiveDate,
  center:    usize,
  windows:   Vec<[NaiveDate; DAYS_PER_WEEK]>
}

impl WeekWindows {
  /// `before` weeks back through `after` weeks ahead of the week holding
  /// `reference`. Windows stop at the ends of the calendar instead of
  /// repeating dates, so fewer may be produced there.
  #[tracing::instrument]
  pub fn around(
    reference: NaiveDate,
    before: u32,
    after: u32
  ) -> Self {
    let mut windows = Vec::new();
    let mut center = 0;

    if let Some(monday) = monday_of(reference) {
      let week_at = |week: i64| {
        add_days(monday, week * 7)
          .and_then(week_starting)
      };
      let earlier = (1..=i64::from(before))
        .map_while(|back| week_at(-back))
        .collect::<Vec<_>>();
      center = earlier.len();
      windows.extend(earlier.into_iter().rev());
      windows.extend(
        (0..=i64::from(after))
          .map_while(week_at)
      );
    }

    debug!(
      %reference,
      center,
      count = windows.len(),
      "week windows generated"
    );

    Self {
      reference,
      center,
      windows
    }
  }

  /// Two weeks back through six weeks ahead.
  pub fn default_around(
    reference: NaiveDate
  ) -> Self {
    Self::around(
      reference,
      DEFAULT_WEEKS_BEFORE,
      DEFAULT_WEEKS_AFTER
    )
  }

  pub fn reference(&self) -> NaiveDate {
    self.reference
  }

  pub fn len(&self) -> usize {
    self.windows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.windows.is_empty()
  }

  pub fn windows(
    &self
  ) -> &[[NaiveDate; DAYS_PER_WEEK]] {
    &self.windows
  }

  pub fn window(
    &self,
    index: usize
  ) -> Option<&[NaiveDate; DAYS_PER_WEEK]>
  {
    self.windows.get(index)
  }

  /// Index of the window holding the reference date; the pager's
  /// default scroll position.
  pub fn center_index(&self) -> usize {
    self.center
  }

  pub fn center(
    &self
  ) -> Option<&[NaiveDate; DAYS_PER_WEEK]>
  {
    self.window(self.center_index())
  }

  /// `(window, column)` of `date`, if it is covered.
  pub fn position_of(
    &self,
    date: NaiveDate
  ) -> Option<(usize, usize)> {
    self.windows.iter().enumerate().find_map(
      |(index, window)| {
        window
          .iter()
          .position(|day| *day == date)
          .map(|col| (index, col))
      }
    )
  }

  /// Windows rendered as `DD/MM/YY` keys.
  pub fn formatted(
    &self
  ) -> Vec<Vec<String>> {
    self
      .windows
      .iter()
      .map(|window| {
        window
          .iter()
          .map(|day| {
            DateFormat::DayMonthShortYear
              .format(*day)
          })
          .collect()
      })
      .collect()
  }
}

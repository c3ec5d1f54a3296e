use chrono::NaiveDate;
use tracing::debug;

use crate::calendar::{
  DAYS_PER_WEEK,
  WeekWindows,
  monday_index
};

/// Selection state of the horizontally paged week selector: which
/// window is scrolled into view and which column is highlighted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekPager {
  windows: WeekWindows,
  week:    usize,
  day:     usize
}

impl WeekPager {
  pub fn new(
    today: NaiveDate,
    before: u32,
    after: u32
  ) -> Self {
    let windows = WeekWindows::around(
      today, before, after
    );
    let week = windows.center_index();
    Self {
      windows,
      week,
      day: monday_index(today) as usize
    }
  }

  pub fn windows(&self) -> &WeekWindows {
    &self.windows
  }

  /// `(window, column)` of the highlighted cell.
  pub fn selected(&self) -> (usize, usize) {
    (self.week, self.day)
  }

  pub fn selected_date(
    &self
  ) -> Option<NaiveDate> {
    self
      .windows
      .window(self.week)
      .map(|window| window[self.day])
  }

  /// Highlights a cell. Out-of-range positions leave the selection
  /// untouched.
  pub fn select(
    &mut self,
    week: usize,
    day: usize
  ) -> Option<NaiveDate> {
    if week >= self.windows.len()
      || day >= DAYS_PER_WEEK
    {
      debug!(
        week,
        day,
        "ignoring out-of-range selection"
      );
      return None;
    }
    self.week = week;
    self.day = day;
    self.selected_date()
  }

  /// Pages by `delta` windows, keeping the highlighted column and
  /// clamping at either end.
  pub fn page(
    &mut self,
    delta: i64
  ) -> Option<NaiveDate> {
    let last =
      self.windows.len().saturating_sub(1)
        as i64;
    let target = (self.week as i64 + delta)
      .clamp(0, last);
    self.week = target as usize;
    self.selected_date()
  }

  /// Jumps back to today in the center window, regenerating the
  /// windows when today has moved outside them.
  pub fn reset_to(
    &mut self,
    today: NaiveDate
  ) -> Option<NaiveDate> {
    let center = self.windows.center_index();
    let in_center = self
      .windows
      .center()
      .is_some_and(|window| {
        window.contains(&today)
      });
    if !in_center {
      let after = self
        .windows
        .len()
        .saturating_sub(center + 1)
        as u32;
      self.windows = WeekWindows::around(
        today,
        center as u32,
        after
      );
    }
    self.week = center;
    self.day = monday_index(today) as usize;
    self.selected_date()
  }
}

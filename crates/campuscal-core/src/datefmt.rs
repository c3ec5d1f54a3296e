use chrono::NaiveDate;

/// Text shapes a date takes at the edges of the core. Everything
/// inside works on `NaiveDate`; these are only used to format for
/// display and to parse stored fields once at ingestion.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DateFormat {
  /// `DD/MM/YY`, used by the week pager.
  DayMonthShortYear,
  /// `DD/MM/YYYY`, used by stored course and class entries.
  DayMonthYear,
  /// `YYYY-MM-DD`, used by weekday alignment and schedule entries.
  Iso
}

impl DateFormat {
  pub const fn pattern(
    self
  ) -> &'static str {
    match self {
      | DateFormat::DayMonthShortYear => {
        "%d/%m/%y"
      }
      | DateFormat::DayMonthYear => {
        "%d/%m/%Y"
      }
      | DateFormat::Iso => "%Y-%m-%d"
    }
  }

  #[must_use]
  pub fn format(
    self,
    date: NaiveDate
  ) -> String {
    date
      .format(self.pattern())
      .to_string()
  }

  pub fn parse(
    self,
    raw: &str
  ) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return None;
    }
    NaiveDate::parse_from_str(
      trimmed,
      self.pattern()
    )
    .ok()
  }
}

/// Picks the shape from the separators and the width of the year
/// group. chrono's `%Y` also accepts two digits, so `DD/MM/YY` must
/// be routed by width, not by trying patterns in turn.
pub fn detect(
  raw: &str
) -> Option<DateFormat> {
  let trimmed = raw.trim();
  if trimmed.contains('-') {
    return Some(DateFormat::Iso);
  }
  let year = trimmed.rsplit('/').next()?;
  if !trimmed.contains('/') {
    return None;
  }
  match year.len() {
    | 2 => {
      Some(DateFormat::DayMonthShortYear)
    }
    | 4 => Some(DateFormat::DayMonthYear),
    | _ => None
  }
}

/// Parses a date written in any of the supported shapes.
pub fn parse_any(
  raw: &str
) -> Option<NaiveDate> {
  detect(raw)?.parse(raw)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    DateFormat,
    parse_any
  };

  #[test]
  fn formats_each_shape() {
    let date =
      NaiveDate::from_ymd_opt(2025, 3, 7)
        .expect("valid date");
    assert_eq!(
      DateFormat::DayMonthShortYear
        .format(date),
      "07/03/25"
    );
    assert_eq!(
      DateFormat::DayMonthYear
        .format(date),
      "07/03/2025"
    );
    assert_eq!(
      DateFormat::Iso.format(date),
      "2025-03-07"
    );
  }

  #[test]
  fn parse_any_routes_by_year_width()
  {
    let expected =
      NaiveDate::from_ymd_opt(
        2025, 3, 12
      )
      .expect("valid date");
    assert_eq!(
      parse_any("12/03/2025"),
      Some(expected)
    );
    assert_eq!(
      parse_any("2025-03-12"),
      Some(expected)
    );
    assert_eq!(
      parse_any(" 12/03/25 "),
      Some(expected)
    );
  }

  #[test]
  fn rejects_garbage() {
    assert_eq!(parse_any(""), None);
    assert_eq!(
      parse_any("32/01/2025"),
      None
    );
    assert_eq!(
      DateFormat::Iso
        .parse("12/03/2025"),
      None
    );
  }
}

use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::calendar::{
  DEFAULT_WEEKS_AFTER,
  DEFAULT_WEEKS_BEFORE,
  MAX_WEEKS_SPAN
};

pub const DEFAULT_USER: &str = "default";

const RC_ENV: &str = "CAMPUSCALRC";
const RC_FILE_NAME: &str =
  ".campuscalrc";
const DATA_DIR_NAME: &str =
  ".campuscal";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      format!("~/{DATA_DIR_NAME}")
    );
    map.insert(
      "user".to_string(),
      DEFAULT_USER.to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    map.insert(
      "weeks.before".to_string(),
      DEFAULT_WEEKS_BEFORE.to_string()
    );
    map.insert(
      "weeks.after".to_string(),
      DEFAULT_WEEKS_AFTER.to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Numeric key. A value that does not parse is an error.
  pub fn get_u32(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u32>> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<u32>().with_context(
          || {
            format!(
              "config key {key} \
               expects a number, got \
               {raw:?}"
            )
          }
        )
      })
      .transpose()
  }

  pub fn user(&self) -> String {
    self
      .get("user")
      .map(|u| u.trim().to_string())
      .filter(|u| !u.is_empty())
      .unwrap_or_else(|| {
        DEFAULT_USER.to_string()
      })
  }

  /// `(before, after)` week windows around the reference week, each at
  /// most [`MAX_WEEKS_SPAN`].
  pub fn week_span(
    &self
  ) -> anyhow::Result<(u32, u32)> {
    let before = self.weeks(
      "weeks.before",
      DEFAULT_WEEKS_BEFORE
    )?;
    let after = self.weeks(
      "weeks.after",
      DEFAULT_WEEKS_AFTER
    )?;
    Ok((before, after))
  }

  fn weeks(
    &self,
    key: &str,
    default: u32
  ) -> anyhow::Result<u32> {
    let weeks = self
      .get_u32(key)?
      .unwrap_or(default);
    if weeks > MAX_WEEKS_SPAN {
      return Err(anyhow!(
        "{weeks} weeks is more than \
         {MAX_WEEKS_SPAN}"
      ))
      .with_context(|| {
        format!(
          "config key {key} is out of \
           range"
        )
      });
    }
    Ok(weeks)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    let seen = fs::canonicalize(&path)
      .unwrap_or_else(|_| path.clone());
    if self.loaded_files.contains(&seen)
    {
      warn!(file = %path.display(), "rc file already loaded; skipping include cycle");
      return Ok(());
    }
    self.loaded_files.push(seen);

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = match raw_line
        .split_once('#')
      {
        | Some((before, _)) => {
          before.trim()
        }
        | None => raw_line.trim()
      };
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    debug!(
      "no home directory; skipping \
       default rc file"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DATA_DIR_NAME))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;

  #[test]
  fn defaults_cover_every_key() {
    let cfg = Config::default();
    assert_eq!(cfg.user(), "default");
    assert_eq!(
      cfg.get_bool("color"),
      Some(true)
    );
    assert_eq!(
      cfg.week_span().expect("span"),
      (2, 6)
    );
  }

  #[test]
  fn rc_file_includes_and_overrides() {
    let temp =
      tempdir().expect("tempdir");
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "weeks.after = 3\ncolor = off\n"
    )
    .expect("write include");
    let main = temp.path().join("main.rc");
    fs::write(
      &main,
      "# campus settings\nuser = \
       student-42  # me\ninclude \
       extra.rc\ninclude missing.rc\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(main.as_path()))
      .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(cfg.user(), "student-42");
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(
      cfg.week_span().expect("span"),
      (2, 3)
    );

    cfg.apply_overrides([(
      "rc.weeks.before".to_string(),
      "1".to_string()
    )]);
    assert_eq!(
      cfg.week_span().expect("span"),
      (1, 3)
    );
  }

  #[test]
  fn bad_lines_and_numbers_are_errors() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    assert!(Config::load(Some(rc.as_path())).is_err());

    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "weeks.before".to_string(),
      "two".to_string()
    )]);
    assert!(cfg.week_span().is_err());
  }

  #[test]
  fn week_span_is_capped() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "weeks.after".to_string(),
      "4000000000".to_string()
    )]);
    let err = cfg
      .week_span()
      .expect_err("span too wide");
    assert!(
      format!("{err:#}")
        .contains("weeks.after")
    );

    cfg.apply_overrides([(
      "weeks.after".to_string(),
      "520".to_string()
    )]);
    assert_eq!(
      cfg.week_span().expect("span"),
      (2, 520)
    );
  }

  #[test]
  fn include_cycles_through_parent_dirs_stop() {
    let temp =
      tempdir().expect("tempdir");
    let sub = temp.path().join("sub");
    fs::create_dir(&sub)
      .expect("create sub");
    let rc = sub.join("a.rc");
    fs::write(
      &rc,
      "user = looper
include        ../sub/a.rc
"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 1);
    assert_eq!(cfg.user(), "looper");
  }
}

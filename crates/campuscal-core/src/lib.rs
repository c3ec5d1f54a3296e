pub mod binning;
pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datefmt;
pub mod datetime;
pub mod error;
pub mod pager;
pub mod record;
pub mod reload;
pub mod render;
pub mod store;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting campuscal"
  );

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );
  if let Some(user) = cli.user {
    cfg.apply_overrides([(
      "user".to_string(),
      user
    )]);
  }

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let reload =
    Arc::new(reload::ReloadSignal::new());
  reload.subscribe(|at| {
    debug!(%at, "user document refreshed");
  });

  let store =
    store::DocumentStore::open(
      &data_dir,
      Arc::clone(&reload)
    )
    .with_context(|| {
      format!(
        "failed to open document store \
         at {}",
        data_dir.display()
      )
    })?;

  let (weeks_before, weeks_after) =
    cfg.week_span()?;
  let session = commands::Session {
    user: cfg.user(),
    today: datetime::today(),
    weeks_before,
    weeks_after
  };

  let renderer =
    render::Renderer::new(&cfg);
  let command =
    cli.command.unwrap_or_else(|| {
      cli::Command::Month(
        cli::MonthArgs::default()
      )
    });

  let mut out = io::stdout().lock();
  commands::dispatch(
    &mut out,
    &store,
    &renderer,
    &session,
    command
  )?;

  info!(
    writes = reload.generation(),
    "done"
  );
  Ok(())
}

//! Implementation of the `keel module` command: the built-in computation
//! modules, configured only through the store environment contract.

use anyhow::Result;
use clap::{Args, ValueEnum};

use serde::Serialize;

use crate::modules::{self, avg_measure, connect_store, top_producers, ConnectPolicy, ModuleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinModule {
    /// Average measure_a per category
    AvgMeasure,
    /// Top 10 producers by record count
    TopProducers,
}

#[derive(Args, Debug)]
pub struct ModuleArgs {
    /// Module to run
    #[arg(value_enum)]
    pub name: BuiltinModule,

    /// Seconds to keep retrying the initial store connection
    #[arg(long, default_value_t = 30)]
    pub connect_timeout: u64,
}

pub async fn execute(args: &ModuleArgs, json_mode: bool) -> Result<i32> {
    let location = modules::location_from_env()?;
    let policy = ConnectPolicy {
        max_elapsed: std::time::Duration::from_secs(args.connect_timeout),
        ..ConnectPolicy::default()
    };
    let pool = connect_store(&location, policy).await?;

    let rendered = match (args.name, json_mode) {
        (BuiltinModule::AvgMeasure, false) => avg_measure::run(&pool).await?,
        (BuiltinModule::TopProducers, false) => top_producers::run(&pool).await?,
        (BuiltinModule::AvgMeasure, true) => to_json(avg_measure::query(&pool).await?)?,
        (BuiltinModule::TopProducers, true) => to_json(top_producers::query(&pool).await?)?,
    };
    pool.close().await;

    println!("{rendered}");
    Ok(0)
}

fn to_json<T: Serialize>(rows: Vec<T>) -> Result<String> {
    if rows.is_empty() {
        return Err(ModuleError::Empty.into());
    }
    Ok(serde_json::to_string_pretty(&rows)?)
}

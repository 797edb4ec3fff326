//! Implementation of the `keel store` commands.

use anyhow::Result;
use clap::Subcommand;

use crate::modules;

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Exit 0 iff the store named by the environment contract answers
    Ping,
}

pub async fn execute(command: &StoreCommands, json_mode: bool) -> Result<i32> {
    match command {
        StoreCommands::Ping => {
            let location = modules::location_from_env()?;
            modules::ping(&location).await?;
            if json_mode {
                println!("{}", serde_json::json!({ "reachable": true }));
            }
            Ok(0)
        }
    }
}

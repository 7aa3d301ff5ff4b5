/*
 *        Copyright (c) 2022-2023 Dinu Blanovschi
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        https://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

mod config;
mod gonzalo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use figment::providers::{Format, Yaml};
use figment::Figment;
use log::info;

use crate::config::ProcessConfig;
use crate::gonzalo::Gonzalo;

/// Deploy-orchestration server core: materializes a project snapshot and
/// drives a deploy recipe against a remote target over a rotated SSH
/// channel. Execution of the recipe itself is left to an external deploy
/// driver -- this binary only resolves what that driver needs.
#[derive(Parser, Debug)]
#[command(name = "gonzalo")]
struct Cli {
    #[arg(long, default_value = "gonzalo.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a project's deploy recipe at a commitish and print the named
    /// environment.
    Config {
        provider: String,
        vendor: String,
        project: String,
        commitish: String,
        env: String,
    },
    /// Run a single command over a rotated SSH connection to a target host.
    Exec {
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        user: String,
        command: String,
    },
}

type GonzaloResult<T> = anyhow::Result<T>;

#[tokio::main]
async fn main() -> GonzaloResult<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let process_config: ProcessConfig = Figment::new().merge(Yaml::file(&cli.config)).extract()?;
    let gonzalo = Gonzalo::bootstrap(&process_config)?;

    match cli.command {
        Command::Config {
            provider,
            vendor,
            project,
            commitish,
            env,
        } => {
            info!("resolving {provider}/{vendor}/{project}@{commitish} env {env}");
            let prj = gonzalo.project(&provider, &vendor, &project)?;
            let resolved = prj.config_env(&commitish, &env)?;
            println!("{resolved:#?}");
        }
        Command::Exec { host, port, user, command } => {
            info!("connecting to {user}@{host}:{port}");
            let conn = gonzalo.ssh_client(&host, port, &user).await?;
            let (stdout, stderr) = conn.output(&command, None).await?;
            print!("{}", String::from_utf8_lossy(&stdout));
            eprint!("{}", String::from_utf8_lossy(&stderr));
        }
    }

    Ok(())
}

// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sshdeck::{
    cli::{Cli, Commands},
    command::{ReadOptions, StartOptions},
    config::{FileConfig, Newline, ResolvedConnection},
    jump::JumpHost,
    security::SudoPassword,
    ssh::{get_check_method, StrictHostKeyChecking},
    transfer::{GetOptions, PutOptions, ScpMode},
    utils::{enable_ssh_logging, format_bytes, format_transfer_units, init_logging},
    ConnectOptions, Credentials, Session,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Some(path) = &cli.ssh_log {
        if !enable_ssh_logging(path)
            .with_context(|| format!("Failed to open SSH log {}", path.display()))?
        {
            tracing::warn!("SSH log not enabled: another logger is active");
        }
    }

    let config_path = cli.config.clone().or_else(FileConfig::default_path);
    let file_config = match &config_path {
        Some(path) => FileConfig::load(path).await?,
        None => FileConfig::default(),
    };

    let resolved = file_config
        .resolve(&cli.host)
        .with_context(|| format!("Invalid settings for '{}'", cli.host))?;

    if let Commands::Banner = cli.command {
        let port = cli.port.unwrap_or(resolved.config.port);
        let banner = Session::pre_login_banner(&resolved.config.host, port)
            .await
            .with_context(|| {
                format!("Unable to connect to port {port} on {}", resolved.config.host)
            })?;
        if let Some(banner) = banner {
            print!("{banner}");
        }
        return Ok(());
    }

    let (mut session, mut jump) = connect(&cli, resolved).await?;

    let outcome = run(&cli.command, &mut session).await;
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close session cleanly: {}", e);
    }
    if let Some(jump) = jump.as_mut() {
        if let Err(e) = jump.close().await {
            tracing::warn!("Failed to close jump host session cleanly: {}", e);
        }
    }

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => Err(e),
    }
}

/// Connects to the target, through the jump host when one is given.
///
/// Returns the target session and the jump host session it depends on.
async fn connect(cli: &Cli, resolved: ResolvedConnection) -> Result<(Session, Option<Session>)> {
    let ResolvedConnection {
        mut config,
        user,
        identity,
    } = resolved;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout =
            Duration::try_from_secs_f64(timeout).context("Invalid --timeout value")?;
    }
    if let Some(prompt) = &cli.prompt {
        config.prompt = Some(prompt.parse()?);
    }

    let user = cli
        .user
        .clone()
        .or(user)
        .context("No user name given; use --user")?;
    let identity = cli.identity.clone().or(identity);
    let credentials = determine_credentials(cli, identity.as_deref())?;

    let strict_mode: StrictHostKeyChecking = cli.strict_host_key_checking.parse()?;
    let server_check = get_check_method(strict_mode, cli.known_hosts.as_deref());

    let mut options = ConnectOptions::new(user, credentials).with_server_check(server_check);
    if let Some(secs) = cli.keep_alive {
        options = options.with_keep_alive_interval(Duration::from_secs(secs));
    }

    let Some(spec) = &cli.jump_host else {
        let session = Session::connect(config.clone(), options)
            .await
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;
        return Ok((session, None));
    };

    let jump_host: JumpHost = spec.parse()?;
    let mut jump_config = config.clone();
    jump_config.host = jump_host.host.clone();
    jump_config.port = jump_host.effective_port();
    jump_config.alias = None;
    let mut jump_options = options.clone();
    if let Some(user) = &jump_host.user {
        jump_options.user = user.clone();
    }
    let jump = Session::connect(jump_config, jump_options)
        .await
        .with_context(|| format!("Failed to connect to jump host {jump_host}"))?;

    let session = Session::connect_via(config.clone(), options, Arc::clone(jump.transport()))
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {}:{} through {jump_host}",
                config.host, config.port
            )
        })?;
    Ok((session, Some(jump)))
}

/// Agent, password, explicit key, then the usual default keys.
fn determine_credentials(cli: &Cli, identity: Option<&Path>) -> Result<Credentials> {
    #[cfg(not(target_os = "windows"))]
    if cli.use_agent {
        return Ok(Credentials::with_agent());
    }

    if let Some(var) = &cli.password_env {
        let password = std::env::var(var)
            .with_context(|| format!("Environment variable {var} is not set"))?;
        return Ok(Credentials::with_password(&password));
    }

    if let Some(path) = identity {
        return Ok(Credentials::with_key_file(path, None));
    }

    #[cfg(not(target_os = "windows"))]
    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        tracing::debug!("SSH_AUTH_SOCK is set, using SSH agent");
        return Ok(Credentials::with_agent());
    }

    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    for name in ["id_ed25519", "id_ecdsa", "id_rsa"] {
        let candidate = home.join(".ssh").join(name);
        if candidate.exists() {
            tracing::debug!("Using default key {:?}", candidate);
            return Ok(Credentials::with_key_file(candidate, None));
        }
    }

    bail!("No authentication method available; use --identity, --use-agent or --password-env")
}

fn parse_timeout(seconds: Option<f64>) -> Result<Option<Duration>> {
    seconds
        .map(|s| Duration::try_from_secs_f64(s).context("Invalid timeout value"))
        .transpose()
}

/// Runs one subcommand and returns the process exit code.
async fn run(command: &Commands, session: &mut Session) -> Result<i32> {
    match command {
        Commands::Exec {
            sudo,
            sudo_password_env,
            subsystem,
            forward_agent,
            command_timeout,
            stream,
            command,
        } => {
            let sudo_password = match sudo_password_env {
                Some(var) => Some(
                    SudoPassword::from_env(var)?
                        .with_context(|| format!("Environment variable {var} is not set"))?,
                ),
                None => None,
            };
            let start = StartOptions {
                sudo: *sudo,
                sudo_password,
                invoke_subsystem: *subsystem,
                forward_agent: *forward_agent,
            };
            let read = ReadOptions {
                timeout: parse_timeout(*command_timeout)?,
                stream_during_execution: *stream,
                stream_on_timeout: true,
            };
            let output = session
                .execute_command(&command.join(" "), start, &read)
                .await?;
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                eprintln!("{}", output.stderr);
            }
            Ok(i32::try_from(output.exit_code).unwrap_or(i32::MAX))
        }

        Commands::Shell { commands, delay_ms } => {
            let has_prompt = session.config().prompt.is_some();
            let delay = Duration::from_millis(*delay_ms);
            let shell = session.shell().await?;

            let banner = if has_prompt {
                shell.read_until_prompt(false).await?
            } else {
                shell.read_delayed(Some(delay)).await?
            };
            print!("{banner}");

            for line in commands {
                shell.write(line).await?;
                let output = if has_prompt {
                    shell.read_until_prompt(true).await?
                } else {
                    shell.read_delayed(Some(delay)).await?
                };
                print!("{output}");
            }
            println!();
            Ok(0)
        }

        Commands::Put {
            source,
            destination,
            recursive,
            mode,
            newline,
            scp,
            preserve_times,
        } => {
            let mode = mode
                .as_deref()
                .map(|m| u32::from_str_radix(m.trim_start_matches("0o"), 8))
                .transpose()
                .with_context(|| format!("Invalid mode '{}'", mode.as_deref().unwrap_or("")))?;
            let options = PutOptions {
                mode,
                newline: newline.as_deref().map(str::parse::<Newline>).transpose()?,
                scp: scp.parse::<ScpMode>()?,
                preserve_times: *preserve_times,
                recursive: *recursive,
            };
            let units = if Path::new(source).is_dir() {
                session.put_directory(source, destination, &options).await?
            } else {
                session.put_file(source, destination, &options).await?
            };
            println!("{}", format_transfer_units(&units));
            Ok(0)
        }

        Commands::Get {
            source,
            destination,
            recursive,
            scp,
            preserve_times,
        } => {
            let options = GetOptions {
                scp: scp.parse::<ScpMode>()?,
                preserve_times: *preserve_times,
                recursive: *recursive,
            };
            let is_directory = options.scp != ScpMode::All
                && session.transfers().directory_exists(source).await?;
            let units = if is_directory {
                session.get_directory(source, destination, &options).await?
            } else {
                session.get_file(source, destination, &options).await?
            };
            println!("{}", format_transfer_units(&units));
            Ok(0)
        }

        Commands::Banner => Ok(0),

        Commands::Forward {
            local_port,
            remote,
            bind,
        } => {
            let (host, port) = remote
                .rsplit_once(':')
                .with_context(|| format!("Remote target '{remote}' must be host:port"))?;
            let port: u16 = port
                .parse()
                .with_context(|| format!("Invalid remote port in '{remote}'"))?;

            let local_addr = session
                .start_port_forwarding(*local_port, host, port, *bind)
                .await?;
            println!("Forwarding {local_addr} -> {host}:{port} (Ctrl+C to stop)");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;

            if let Some(handle) = session.forwarding() {
                let stats = handle.stats();
                println!(
                    "{} connections, {} transferred",
                    stats.accepted(),
                    format_bytes(stats.bytes())
                );
            }
            session.stop_port_forwarding().await;
            Ok(0)
        }
    }
}

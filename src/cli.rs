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

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sshdeck",
    version,
    about = "Stateful SSH sessions: commands, shells, SFTP/SCP transfers and port forwarding",
    after_help = "EXAMPLES:\n  Run a command:            sshdeck -H web01 exec uptime\n  Run under sudo:           sshdeck -H web01 exec --sudo -- systemctl restart nginx\n  Drive a shell:            sshdeck -H web01 --prompt '$ ' shell -c 'cd /tmp' -c 'ls'\n  Upload with glob:         sshdeck -H web01 put \"*.log\" /var/log/app/\n  Download a directory:     sshdeck -H web01 get -r /etc/nginx ./backup/\n  Forward a local port:     sshdeck -H bastion forward 5432 db.internal:5432\n  Through a jump host:      sshdeck -H db.internal -J admin@bastion:2222 exec uptime\n  Show the login banner:    sshdeck -H web01 banner"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'H',
        long,
        help = "Target host, or the name of a connection from the configuration file"
    )]
    pub host: String,

    #[arg(
        long,
        help = "Configuration file path [default: ~/.config/sshdeck/config.yaml]"
    )]
    pub config: Option<PathBuf>,

    #[arg(short = 'p', long, help = "SSH port [default: 22]")]
    pub port: Option<u16>,

    #[arg(short = 'u', long, env = "USER", help = "Login user name")]
    pub user: Option<String>,

    #[arg(short = 'i', long, help = "SSH private key file path")]
    pub identity: Option<PathBuf>,

    #[arg(
        short = 'A',
        long,
        help = "Use SSH agent for authentication (Unix/Linux/macOS only)"
    )]
    pub use_agent: bool,

    #[arg(
        long,
        value_name = "VAR",
        help = "Read the login password from environment variable VAR"
    )]
    pub password_env: Option<String>,

    #[arg(
        long,
        default_value = "accept-new",
        help = "Host key checking mode (yes/no/accept-new) [default: accept-new]"
    )]
    pub strict_host_key_checking: String,

    #[arg(long, help = "Known hosts file [default: ~/.ssh/known_hosts]")]
    pub known_hosts: Option<PathBuf>,

    #[arg(
        short = 'J',
        long,
        value_name = "[user@]host[:port]",
        help = "Connect through this jump host, authenticating with the same credentials"
    )]
    pub jump_host: Option<String>,

    #[arg(
        long,
        value_name = "SECS",
        help = "Send a keepalive after SECS idle seconds [default: 0, disabled]"
    )]
    pub keep_alive: Option<u64>,

    #[arg(long, value_name = "FILE", help = "Write SSH protocol debug logs to FILE")]
    pub ssh_log: Option<PathBuf>,

    #[arg(
        long,
        help = "Timeout in seconds for shell reads and as connect timeout floor [default: 3]"
    )]
    pub timeout: Option<f64>,

    #[arg(long, help = "Shell prompt; prefix with REGEXP: for a regular expression")]
    pub prompt: Option<String>,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Execute a command and print its output")]
    Exec {
        #[arg(long, help = "Run the command under sudo")]
        sudo: bool,

        #[arg(
            long,
            value_name = "VAR",
            help = "Pass the sudo password read from environment variable VAR"
        )]
        sudo_password_env: Option<String>,

        #[arg(long, help = "Invoke the command as a subsystem")]
        subsystem: bool,

        #[arg(long, help = "Request agent forwarding")]
        forward_agent: bool,

        #[arg(long, help = "Command timeout in seconds [default: unlimited]")]
        command_timeout: Option<f64>,

        #[arg(long, help = "Log output while the command runs")]
        stream: bool,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    #[command(about = "Write lines to an interactive shell and print what comes back")]
    Shell {
        #[arg(
            short = 'c',
            long = "command",
            help = "Line to write; repeat for more lines"
        )]
        commands: Vec<String>,

        #[arg(
            long,
            default_value = "500",
            help = "Without a prompt, keep reading while output arrives every N ms"
        )]
        delay_ms: u64,
    },

    #[command(about = "Upload local files or a directory")]
    Put {
        #[arg(help = "Local file, glob pattern or directory")]
        source: String,

        #[arg(default_value = ".", help = "Remote destination")]
        destination: String,

        #[arg(short = 'r', long, help = "Descend into subdirectories")]
        recursive: bool,

        #[arg(long, help = "Octal mode for the remote files, e.g. 0644")]
        mode: Option<String>,

        #[arg(long, help = "Convert line endings to LF, CR or CRLF")]
        newline: Option<String>,

        #[arg(long, default_value = "OFF", help = "SCP usage: OFF, TRANSFER or ALL")]
        scp: String,

        #[arg(long, help = "Preserve modification and access times (SCP only)")]
        preserve_times: bool,
    },

    #[command(about = "Download remote files or a directory")]
    Get {
        #[arg(help = "Remote file, glob pattern or directory")]
        source: String,

        #[arg(default_value = ".", help = "Local destination")]
        destination: String,

        #[arg(short = 'r', long, help = "Descend into subdirectories")]
        recursive: bool,

        #[arg(long, default_value = "OFF", help = "SCP usage: OFF, TRANSFER or ALL")]
        scp: String,

        #[arg(long, help = "Preserve modification and access times (SCP only)")]
        preserve_times: bool,
    },

    #[command(about = "Print the banner the server sends before login")]
    Banner,

    #[command(about = "Forward a local port through the session until interrupted")]
    Forward {
        #[arg(help = "Local port to listen on (0 picks a free port)")]
        local_port: u16,

        #[arg(help = "Remote target as host:port")]
        remote: String,

        #[arg(long, help = "Local bind address [default: 127.0.0.1]")]
        bind: Option<IpAddr>,
    },
}

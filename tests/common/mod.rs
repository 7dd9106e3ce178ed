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

//! In-memory stand-ins for the SSH provider used by the integration tests.
//!
//! - `FakeTransport`: shell, scripted commands, SFTP, SCP and direct-tcpip
//! - `MemoryFs`: remote filesystem kept in a map, home at `/home/test`
//! - the SCP endpoint speaks `scp -t` / `scp -f` against the `MemoryFs`

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::{TcpListener, TcpStream};

use sshdeck::config::SessionConfig;
use sshdeck::error::{Result, SessionError};
use sshdeck::transport::{
    CommandChannel, CommandEvent, CommandRequest, DuplexStream as RemoteStream, FileKind,
    RemoteEntry, RemoteFs, RemoteReader, RemoteWriter, TerminalSpec, Transport,
};
use sshdeck::Session;

pub const HOME: &str = "/home/test";
pub const PROMPT: &str = "$ ";
pub const BANNER: &str = "Welcome to the fake host\n";

// ---------------------------------------------------------------------------
// Remote filesystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Node {
    File { data: Vec<u8>, mode: u32, mtime: u32 },
    Dir,
}

type Nodes = Arc<Mutex<BTreeMap<String, Node>>>;

#[derive(Debug)]
pub struct MemoryFs {
    nodes: Nodes,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let fs = Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
        };
        fs.add_dir(HOME);
        fs
    }

    /// Absolute, normalized form of `path`; relative paths start at `HOME`.
    pub fn resolve(path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{HOME}/{path}")
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn parent(path: &str) -> Option<String> {
        if path == "/" {
            return None;
        }
        let (dir, _) = path.rsplit_once('/')?;
        Some(if dir.is_empty() { "/".to_string() } else { dir.to_string() })
    }

    fn name(path: &str) -> String {
        path.rsplit('/').next().unwrap_or_default().to_string()
    }

    pub fn add_dir(&self, path: &str) {
        let path = Self::resolve(path);
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert("/".to_string(), Node::Dir);
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.add_file_with_mode(path, data, 0o644);
    }

    pub fn add_file_with_mode(&self, path: &str, data: &[u8], mode: u32) {
        let path = Self::resolve(path);
        if let Some(parent) = Self::parent(&path) {
            self.add_dir(&parent);
        }
        self.nodes.lock().unwrap().insert(
            path,
            Node::File {
                data: data.to_vec(),
                mode,
                mtime: 1_700_000_000,
            },
        );
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(&Self::resolve(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        match self.nodes.lock().unwrap().get(&Self::resolve(path)) {
            Some(Node::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.nodes.lock().unwrap().get(&Self::resolve(path)),
            Some(Node::Dir)
        )
    }

    pub fn paths(&self) -> Vec<String> {
        self.nodes.lock().unwrap().keys().cloned().collect()
    }

    fn entry(path: &str, node: &Node) -> RemoteEntry {
        match node {
            Node::File { data, mode, mtime } => RemoteEntry {
                name: Self::name(path),
                kind: FileKind::File,
                size: data.len() as u64,
                mode: Some(*mode),
                mtime: Some(*mtime),
                atime: Some(*mtime),
            },
            Node::Dir => RemoteEntry {
                name: Self::name(path),
                kind: FileKind::Directory,
                size: 0,
                mode: Some(0o755),
                mtime: None,
                atime: None,
            },
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| Self::parent(path).as_deref() == Some(dir))
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect()
    }
}

fn not_found(path: &str) -> SessionError {
    SessionError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{path}: no such file"),
    ))
}

struct MemoryWriter {
    nodes: Nodes,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&self.path) {
            Some(Node::File { data, .. }) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(io::ErrorKind::NotFound, "file removed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn stat(&self, path: &str) -> Result<Option<RemoteEntry>> {
        let path = Self::resolve(path);
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(&path)
            .map(|node| Self::entry(&path, node)))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = Self::resolve(path);
        if !self.is_dir(&path) {
            return Err(not_found(&path));
        }
        Ok(self
            .children(&path)
            .iter()
            .map(|(child, node)| Self::entry(child, node))
            .collect())
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader> {
        let data = self.read(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter> {
        let path = Self::resolve(path);
        let parent = Self::parent(&path).ok_or_else(|| not_found(&path))?;
        if !self.is_dir(&parent) {
            return Err(not_found(&parent));
        }
        {
            let mut nodes = self.nodes.lock().unwrap();
            let mode = match nodes.get(&path) {
                Some(Node::File { mode, .. }) => *mode,
                Some(Node::Dir) => return Err(not_found(&path)),
                None => 0o644,
            };
            nodes.insert(
                path.clone(),
                Node::File {
                    data: Vec::new(),
                    mode,
                    mtime: 1_700_000_000,
                },
            );
        }
        Ok(Box::new(MemoryWriter {
            nodes: Arc::clone(&self.nodes),
            path,
        }))
    }

    async fn chmod(&self, path: &str, new_mode: u32) -> Result<()> {
        let path = Self::resolve(path);
        match self.nodes.lock().unwrap().get_mut(&path) {
            Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            Some(Node::Dir) => Ok(()),
            None => Err(not_found(&path)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::resolve(path);
        let parent = Self::parent(&path).ok_or_else(|| not_found(&path))?;
        if !self.is_dir(&parent) {
            return Err(not_found(&parent));
        }
        self.nodes.lock().unwrap().insert(path, Node::Dir);
        Ok(())
    }

    async fn canonicalize(&self, path: &str) -> Result<String> {
        Ok(Self::resolve(path))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Canned behavior of one command.
#[derive(Debug, Clone, Default)]
pub struct CommandScript {
    pub stdout: Vec<Vec<u8>>,
    pub stderr: Vec<Vec<u8>>,
    pub exit_status: Option<u32>,
    /// Never finish after the canned output.
    pub hang: bool,
}

impl CommandScript {
    pub fn output(stdout: &str, stderr: &str, exit_status: u32) -> Self {
        Self {
            stdout: vec![stdout.as_bytes().to_vec()],
            stderr: vec![stderr.as_bytes().to_vec()],
            exit_status: Some(exit_status),
            hang: false,
        }
    }

    pub fn chunks(stdout: &[&[u8]]) -> Self {
        Self {
            stdout: stdout.iter().map(|c| c.to_vec()).collect(),
            exit_status: Some(0),
            ..Self::default()
        }
    }

    pub fn hanging(partial: &str) -> Self {
        Self {
            stdout: vec![partial.as_bytes().to_vec()],
            hang: true,
            ..Self::default()
        }
    }

    pub fn without_exit_status(mut self) -> Self {
        self.exit_status = None;
        self
    }
}

struct FakeCommandChannel {
    command: String,
    events: VecDeque<CommandEvent>,
    hang: bool,
    stdin: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl CommandChannel for FakeCommandChannel {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        self.stdin
            .lock()
            .unwrap()
            .push((self.command.clone(), data.to_vec()));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<CommandEvent>> {
        tokio::task::yield_now().await;
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.events.clear();
        self.hang = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTransport {
    pub fs: Arc<MemoryFs>,
    scripts: Mutex<HashMap<String, CommandScript>>,
    pub requests: Mutex<Vec<CommandRequest>>,
    pub stdin: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub exec_commands: Mutex<Vec<String>>,
    pub shells: Mutex<Vec<TerminalSpec>>,
    pub sftp_opens: AtomicUsize,
    pub tunnels: Mutex<Vec<(String, u16)>>,
    banner: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the behavior of `command`, matched against the full
    /// command line, sudo prefix included.
    pub fn script(&self, command: &str, script: CommandScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stdin_writes(&self) -> Vec<(String, Vec<u8>)> {
        self.stdin.lock().unwrap().clone()
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.exec_commands.lock().unwrap().clone()
    }

    pub fn tunnels(&self) -> Vec<(String, u16)> {
        self.tunnels.lock().unwrap().clone()
    }

    pub fn set_banner(&self, banner: &str) {
        *self.banner.lock().unwrap() = Some(banner.to_string());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_shell(&self, terminal: &TerminalSpec) -> Result<Box<dyn RemoteStream>> {
        self.shells.lock().unwrap().push(terminal.clone());
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(run_fake_shell(server));
        Ok(Box::new(client))
    }

    async fn open_command(&self, request: &CommandRequest) -> Result<Box<dyn CommandChannel>> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.command)
            .cloned()
            .unwrap_or_else(|| CommandScript::output("", "", 0));

        let mut events = VecDeque::new();
        let mut stdout = script.stdout.into_iter();
        let mut stderr = script.stderr.into_iter();
        // interleave the two streams
        loop {
            let out = stdout.next();
            let err = stderr.next();
            if out.is_none() && err.is_none() {
                break;
            }
            if let Some(chunk) = out.filter(|c| !c.is_empty()) {
                events.push_back(CommandEvent::Stdout(chunk));
            }
            if let Some(chunk) = err.filter(|c| !c.is_empty()) {
                events.push_back(CommandEvent::Stderr(chunk));
            }
        }
        if let Some(status) = script.exit_status {
            events.push_back(CommandEvent::ExitStatus(status));
        }

        Ok(Box::new(FakeCommandChannel {
            command: request.command.clone(),
            events,
            hang: script.hang,
            stdin: Arc::clone(&self.stdin),
        }))
    }

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>> {
        self.sftp_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.fs) as Arc<dyn RemoteFs>)
    }

    async fn open_exec_stream(&self, command: &str) -> Result<Box<dyn RemoteStream>> {
        self.exec_commands.lock().unwrap().push(command.to_string());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let fs = Arc::clone(&self.fs);
        let command = command.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_fake_scp(fs, &command, server).await {
                eprintln!("fake scp failed: {e}");
            }
        });
        Ok(Box::new(client))
    }

    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        _originator: SocketAddr,
    ) -> Result<Box<dyn RemoteStream>> {
        self.tunnels.lock().unwrap().push((host.to_string(), port));
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Box::new(stream))
    }

    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn banner(&self) -> Option<String> {
        self.banner.lock().unwrap().clone()
    }
}

/// A session on a fresh [`FakeTransport`], with the prompt set.
pub fn fake_session(host: &str) -> (Session, Arc<FakeTransport>) {
    let transport = FakeTransport::new();
    let config = SessionConfig::new(host).with_prompt(PROMPT.parse().unwrap());
    let session = Session::with_transport(config, "test", transport.clone());
    (session, transport)
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Echoes every line, runs a handful of fake commands and prints the prompt.
///
/// - `echo TEXT`: prints TEXT
/// - `status`: prints BUSY twice, then READY
/// - `utf8`: prints `ä` split across two writes
/// - `color`: prints ANSI colored text
async fn run_fake_shell(server: DuplexStream) -> io::Result<()> {
    let (reader, mut writer) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);
    writer.write_all(BANNER.as_bytes()).await?;
    writer.write_all(PROMPT.as_bytes()).await?;
    let mut status_calls = 0;

    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).into_owned();
        let command = text.trim_end_matches(['\r', '\n']);
        writer.write_all(format!("{command}\n").as_bytes()).await?;

        match command {
            c if c.starts_with("echo ") => {
                writer.write_all(format!("{}\n", &c[5..]).as_bytes()).await?;
            }
            "status" => {
                status_calls += 1;
                let reply: &[u8] = if status_calls < 3 { b"BUSY\n" } else { b"READY\n" };
                writer.write_all(reply).await?;
            }
            "utf8" => {
                writer.write_all(&[0xC3]).await?;
                writer.flush().await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                writer.write_all(&[0xA4, b'\n']).await?;
            }
            "color" => {
                writer.write_all(b"\x1b[31mred\x1b[0m\n").await?;
            }
            _ => {}
        }
        writer.write_all(PROMPT.as_bytes()).await?;
        writer.flush().await?;
    }
}

// ---------------------------------------------------------------------------
// SCP endpoint
// ---------------------------------------------------------------------------

fn unquote(value: &str) -> String {
    match value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        Some(inner) => inner.replace("'\\''", "'"),
        None => value.to_string(),
    }
}

async fn run_fake_scp(fs: Arc<MemoryFs>, command: &str, server: DuplexStream) -> io::Result<()> {
    let mut words = command.splitn(2, ' ');
    if words.next() != Some("scp") {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not scp"));
    }
    let mut rest = words.next().unwrap_or_default();
    let mut sink = false;
    let mut preserve = false;
    while let Some(flag) = rest.split(' ').next().filter(|w| w.starts_with('-')) {
        match flag {
            "-t" => sink = true,
            "-p" => preserve = true,
            _ => {}
        }
        rest = rest[flag.len()..].trim_start();
    }
    let target = unquote(rest);
    let mut stream = BufReader::new(server);

    if sink {
        scp_sink(&fs, &target, &mut stream).await
    } else {
        scp_source(&fs, &target, preserve, &mut stream).await
    }
}

async fn read_status(stream: &mut BufReader<DuplexStream>) -> io::Result<u8> {
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await?;
    Ok(status[0])
}

async fn scp_sink(
    fs: &MemoryFs,
    destination: &str,
    stream: &mut BufReader<DuplexStream>,
) -> io::Result<()> {
    stream.get_mut().write_all(&[0]).await?;
    loop {
        let mut line = Vec::new();
        if stream.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        match text.as_bytes().first() {
            Some(b'T') => stream.get_mut().write_all(&[0]).await?,
            Some(b'C') => {
                let mut fields = text[1..].splitn(3, ' ');
                let mode = u32::from_str_radix(fields.next().unwrap_or("644"), 8).unwrap_or(0o644);
                let size: usize = fields.next().unwrap_or("0").parse().unwrap_or(0);
                let name = fields.next().unwrap_or_default().to_string();
                let target = if fs.is_dir(destination) {
                    format!("{}/{}", MemoryFs::resolve(destination), name)
                } else {
                    MemoryFs::resolve(destination)
                };
                stream.get_mut().write_all(&[0]).await?;

                let mut data = vec![0u8; size];
                stream.read_exact(&mut data).await?;
                read_status(stream).await?;

                let existing_mode = fs.mode(&target);
                fs.add_file_with_mode(&target, &data, existing_mode.unwrap_or(mode));
                stream.get_mut().write_all(&[0]).await?;
            }
            _ => {
                stream
                    .get_mut()
                    .write_all(format!("\x02scp: unexpected '{text}'\n").as_bytes())
                    .await?;
                return Ok(());
            }
        }
        stream.get_mut().flush().await?;
    }
}

async fn scp_source(
    fs: &MemoryFs,
    source: &str,
    preserve: bool,
    stream: &mut BufReader<DuplexStream>,
) -> io::Result<()> {
    read_status(stream).await?;

    let resolved = MemoryFs::resolve(source);
    let files: Vec<String> = if resolved.contains('*') || resolved.contains('?') {
        let (dir, pattern) = resolved.rsplit_once('/').unwrap_or(("", resolved.as_str()));
        let dir = if dir.is_empty() { "/" } else { dir };
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        fs.children(dir)
            .into_iter()
            .filter(|(path, node)| {
                matches!(node, Node::File { .. }) && pattern.matches(&MemoryFs::name(path))
            })
            .map(|(path, _)| path)
            .collect()
    } else if fs.read(&resolved).is_some() {
        vec![resolved]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        stream
            .get_mut()
            .write_all(format!("\x01scp: {source}: No such file or directory\n").as_bytes())
            .await?;
        return Ok(());
    }

    for path in files {
        let data = fs.read(&path).unwrap_or_default();
        let mode = fs.mode(&path).unwrap_or(0o644);
        if preserve {
            stream
                .get_mut()
                .write_all(b"T1700000000 0 1700000000 0\n")
                .await?;
            read_status(stream).await?;
        }
        stream
            .get_mut()
            .write_all(format!("C{:04o} {} {}\n", mode, data.len(), MemoryFs::name(&path)).as_bytes())
            .await?;
        read_status(stream).await?;
        stream.get_mut().write_all(&data).await?;
        stream.get_mut().write_all(&[0]).await?;
        stream.get_mut().flush().await?;
        read_status(stream).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Forwarding target
// ---------------------------------------------------------------------------

/// A local TCP server that closes every connection right away.
pub async fn spawn_closing_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    addr
}

/// A local TCP echo server; returns its address.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rx, mut tx) = socket.split();
                let _ = tokio::io::copy(&mut rx, &mut tx).await;
            });
        }
    });
    addr
}

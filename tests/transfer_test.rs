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

//! Uploads, downloads and remote listings over SFTP and SCP.

mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

use common::fake_session;
use sshdeck::config::Newline;
use sshdeck::transfer::{GetOptions, ListFilter, PutOptions, ScpMode};
use sshdeck::SessionError;

fn local_file(dir: &Path, name: &str, data: &[u8]) -> String {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    path.to_str().unwrap().to_string()
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

fn scp(mode: ScpMode) -> GetOptions {
    GetOptions {
        scp: mode,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_put_new_file_gets_default_mode() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "a.txt", b"hello");

    let units = session
        .put_file(&source, "uploads/", &PutOptions::default())
        .await
        .unwrap();

    assert_eq!(units.len(), 1);
    assert_eq!(units[0].source, source);
    assert_eq!(units[0].destination, "/home/test/uploads/a.txt");
    assert_eq!(transport.fs.read("/home/test/uploads/a.txt").unwrap(), b"hello");
    assert_eq!(transport.fs.mode("/home/test/uploads/a.txt"), Some(0o744));
}

#[tokio::test]
async fn test_put_to_home() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "notes.md", b"# notes");

    let units = session
        .put_file(&source, ".", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(units[0].destination, "/home/test/notes.md");
    assert!(transport.fs.read("/home/test/notes.md").is_some());
}

#[tokio::test]
async fn test_put_existing_file_keeps_mode_unless_given() {
    let (mut session, transport) = fake_session("web01");
    transport
        .fs
        .add_file_with_mode("/home/test/app.conf", b"old", 0o600);
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "app.conf", b"new");

    session
        .put_file(&source, "app.conf", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.fs.read("app.conf").unwrap(), b"new");
    assert_eq!(transport.fs.mode("app.conf"), Some(0o600));

    let options = PutOptions {
        mode: Some(0o640),
        ..Default::default()
    };
    session.put_file(&source, "app.conf", &options).await.unwrap();
    assert_eq!(transport.fs.mode("app.conf"), Some(0o640));
}

#[tokio::test]
async fn test_put_converts_newlines() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "script.bat", b"one\ntwo\r\nthree");

    let options = PutOptions {
        newline: Some(Newline::crlf()),
        ..Default::default()
    };
    let units = session
        .put_file(&source, "script.bat", &options)
        .await
        .unwrap();
    assert_eq!(units[0].newline, Some(Newline::crlf()));
    assert_eq!(
        transport.fs.read("script.bat").unwrap(),
        b"one\r\ntwo\r\nthree"
    );
}

#[tokio::test]
async fn test_put_crlf_then_get_over_sftp_returns_converted_bytes() {
    let (mut session, _transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let original = b"line one\nline two\n\nlast".to_vec();
    let source = local_file(tmp.path(), "upload/notes.txt", &original);

    let options = PutOptions {
        newline: Some("CRLF".parse::<Newline>().unwrap()),
        scp: ScpMode::Off,
        ..Default::default()
    };
    session
        .put_file(&source, "notes.txt", &options)
        .await
        .unwrap();

    let download = tmp.path().join("download").join("notes.txt");
    session
        .get_file("notes.txt", &path_str(&download), &scp(ScpMode::Off))
        .await
        .unwrap();

    let expected = String::from_utf8(original).unwrap().replace('\n', "\r\n");
    assert_eq!(fs::read(&download).unwrap(), expected.as_bytes());
}

#[tokio::test]
async fn test_put_glob_into_directory() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_dir("/home/test/logs");
    let tmp = TempDir::new().unwrap();
    local_file(tmp.path(), "a.log", b"a");
    local_file(tmp.path(), "b.log", b"b");
    local_file(tmp.path(), "c.txt", b"c");

    let pattern = format!("{}/*.log", path_str(tmp.path()));
    let units = session
        .put_file(&pattern, "logs", &PutOptions::default())
        .await
        .unwrap();

    let destinations: Vec<_> = units.iter().map(|u| u.destination.as_str()).collect();
    assert_eq!(
        destinations,
        vec!["/home/test/logs/a.log", "/home/test/logs/b.log"]
    );
    assert!(transport.fs.read("logs/c.txt").is_none());
}

#[tokio::test]
async fn test_put_many_to_single_file_is_ambiguous() {
    let (mut session, _) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    local_file(tmp.path(), "a.log", b"a");
    local_file(tmp.path(), "b.log", b"b");

    let pattern = format!("{}/*.log", path_str(tmp.path()));
    let err = session
        .put_file(&pattern, "/home/test/single.log", &PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AmbiguousDestination { .. }));
}

#[tokio::test]
async fn test_put_without_matches() {
    let (mut session, _) = fake_session("web01");
    let tmp = TempDir::new().unwrap();

    let pattern = format!("{}/*.none", path_str(tmp.path()));
    let err = session
        .put_file(&pattern, ".", &PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoSourceMatch { .. }));
}

#[tokio::test]
async fn test_put_directory_recursion() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    local_file(tmp.path(), "site/index.html", b"<html>");
    local_file(tmp.path(), "site/css/main.css", b"body {}");
    let site = path_str(&tmp.path().join("site"));

    let units = session
        .put_directory(&site, "/home/test/www", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].destination, "/home/test/www/index.html");
    assert!(!transport.fs.is_dir("/home/test/www/css"));

    let options = PutOptions {
        recursive: true,
        ..Default::default()
    };
    let units = session
        .put_directory(&site, "/home/test/full", &options)
        .await
        .unwrap();
    let destinations: Vec<_> = units.iter().map(|u| u.destination.as_str()).collect();
    assert_eq!(
        destinations,
        vec!["/home/test/full/css/main.css", "/home/test/full/index.html"]
    );
    assert_eq!(transport.fs.read("full/css/main.css").unwrap(), b"body {}");
}

#[tokio::test]
async fn test_put_directory_into_existing_directory() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_dir("/home/test/deploy");
    let tmp = TempDir::new().unwrap();
    local_file(tmp.path(), "site/index.html", b"<html>");
    let site = path_str(&tmp.path().join("site"));

    let units = session
        .put_directory(&site, "deploy/", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(units[0].destination, "/home/test/deploy/site/index.html");
}

#[tokio::test]
async fn test_put_empty_directory_reports_unit() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let empty = tmp.path().join("empty");
    fs::create_dir(&empty).unwrap();

    let units = session
        .put_directory(&path_str(&empty), "/home/test/target", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].destination, "/home/test/target");
    assert!(transport.fs.is_dir("/home/test/target"));
}

#[tokio::test]
async fn test_put_directory_missing_source() {
    let (mut session, _) = fake_session("web01");
    let err = session
        .put_directory("/definitely/not/here", ".", &PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PathNotFound { .. }));
}

#[tokio::test]
async fn test_get_file_into_directory() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/data/report.csv", b"a,b\n1,2\n");
    let tmp = TempDir::new().unwrap();

    let units = session
        .get_file("data/report.csv", &path_str(tmp.path()), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(units[0].source, "/home/test/data/report.csv");
    assert_eq!(
        fs::read(tmp.path().join("report.csv")).unwrap(),
        b"a,b\n1,2\n"
    );
}

#[tokio::test]
async fn test_get_file_to_new_name() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/etc/hosts", b"127.0.0.1 localhost\n");
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("nested").join("hosts.copy");

    session
        .get_file("/etc/hosts", &path_str(&target), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"127.0.0.1 localhost\n");
}

#[tokio::test]
async fn test_get_glob() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/data/b.csv", b"b");
    transport.fs.add_file("/home/test/data/a.csv", b"a");
    transport.fs.add_file("/home/test/data/notes.txt", b"n");
    let tmp = TempDir::new().unwrap();

    let units = session
        .get_file("data/*.csv", &path_str(tmp.path()), &GetOptions::default())
        .await
        .unwrap();
    let sources: Vec<_> = units.iter().map(|u| u.source.as_str()).collect();
    assert_eq!(sources, vec!["/home/test/data/a.csv", "/home/test/data/b.csv"]);
    assert!(!tmp.path().join("notes.txt").exists());

    let single = path_str(&tmp.path().join("one.csv"));
    let err = session
        .get_file("data/*.csv", &single, &GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AmbiguousDestination { .. }));

    let err = session
        .get_file("data/*.json", &path_str(tmp.path()), &GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoSourceMatch { .. }));
}

#[tokio::test]
async fn test_get_directory_recursion() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/conf/app.conf", b"app");
    transport.fs.add_file("/home/test/conf/extra/db.conf", b"db");
    let tmp = TempDir::new().unwrap();
    let backup = tmp.path().join("backup");

    let units = session
        .get_directory("conf", &path_str(&backup), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(fs::read(backup.join("app.conf")).unwrap(), b"app");
    assert!(!backup.join("extra").exists());

    let options = GetOptions {
        recursive: true,
        ..Default::default()
    };
    session
        .get_directory("conf/", &path_str(tmp.path()), &options)
        .await
        .unwrap();
    assert_eq!(
        fs::read(tmp.path().join("conf").join("extra").join("db.conf")).unwrap(),
        b"db"
    );
}

#[tokio::test]
async fn test_get_empty_directory_and_missing_directory() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_dir("/home/test/void");
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("void-copy");

    let units = session
        .get_directory("void", &path_str(&target), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].source, "/home/test/void");
    assert!(target.is_dir());

    let err = session
        .get_directory("nowhere", &path_str(tmp.path()), &GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PathNotFound { .. }));
}

#[tokio::test]
async fn test_scp_transfer_mode_moves_data_over_scp() {
    let (mut session, transport) = fake_session("web01");
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "up.txt", b"over scp");

    let options = PutOptions {
        scp: ScpMode::Transfer,
        ..Default::default()
    };
    session.put_file(&source, "up.txt", &options).await.unwrap();
    assert_eq!(transport.fs.read("up.txt").unwrap(), b"over scp");
    assert_eq!(transport.fs.mode("up.txt"), Some(0o744));

    let units = session
        .get_file(
            "up.txt",
            &path_str(&tmp.path().join("down.txt")),
            &scp(ScpMode::Transfer),
        )
        .await
        .unwrap();
    assert_eq!(units[0].source, "/home/test/up.txt");
    assert_eq!(fs::read(tmp.path().join("down.txt")).unwrap(), b"over scp");

    assert_eq!(
        transport.exec_commands(),
        vec![
            "scp -t '/home/test/up.txt'".to_string(),
            "scp -f '/home/test/up.txt'".to_string(),
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_scp_preserve_times() {
    use std::time::{Duration, UNIX_EPOCH};

    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/old.txt", b"old");
    let tmp = TempDir::new().unwrap();

    let options = GetOptions {
        scp: ScpMode::Transfer,
        preserve_times: true,
        ..Default::default()
    };
    let units = session
        .get_file("old.txt", &path_str(tmp.path()), &options)
        .await
        .unwrap();
    assert!(units[0].preserve_times);

    let modified = fs::metadata(tmp.path().join("old.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
}

#[tokio::test]
async fn test_scp_all_mode_skips_sftp() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/data/a.csv", b"a\n");
    transport.fs.add_file("/home/test/data/b.csv", b"b\n");
    let tmp = TempDir::new().unwrap();
    let source = local_file(tmp.path(), "raw.txt", b"line\n");

    let options = PutOptions {
        scp: ScpMode::All,
        newline: Some(Newline::crlf()),
        ..Default::default()
    };
    let units = session
        .put_file(&source, "/home/test/raw.txt", &options)
        .await
        .unwrap();
    assert_eq!(units[0].destination, "/home/test/raw.txt");
    assert_eq!(units[0].newline, None);
    assert_eq!(transport.fs.read("raw.txt").unwrap(), b"line\n");

    let download = tmp.path().join("csv");
    fs::create_dir(&download).unwrap();
    let units = session
        .get_file("data/*.csv", &path_str(&download), &scp(ScpMode::All))
        .await
        .unwrap();
    let sources: Vec<_> = units.iter().map(|u| u.source.as_str()).collect();
    assert_eq!(sources, vec!["data/a.csv", "data/b.csv"]);
    assert_eq!(fs::read(download.join("b.csv")).unwrap(), b"b\n");

    assert_eq!(transport.sftp_opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_scp_all_mode_rejects_directories() {
    let (mut session, _) = fake_session("web01");
    let tmp = TempDir::new().unwrap();

    let options = PutOptions {
        scp: ScpMode::All,
        ..Default::default()
    };
    let err = session
        .put_directory(&path_str(tmp.path()), ".", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CapabilityUnsupported(_)));

    let err = session
        .get_directory("conf", &path_str(tmp.path()), &scp(ScpMode::All))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CapabilityUnsupported(_)));
}

#[tokio::test]
async fn test_list_directory() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/list/b.txt", b"");
    transport.fs.add_file("/home/test/list/a.txt", b"");
    transport.fs.add_file("/home/test/list/c.log", b"");
    transport.fs.add_dir("/home/test/list/sub");
    let mut engine = session.transfers();

    assert_eq!(
        engine.list_directory("list", None, false, ListFilter::All).await.unwrap(),
        vec!["a.txt", "b.txt", "c.log", "sub"]
    );
    assert_eq!(
        engine.list_files("list", Some("*.txt"), false).await.unwrap(),
        vec!["a.txt", "b.txt"]
    );
    assert!(engine
        .list_files("list", Some("*.TXT"), false)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        engine.list_files("list", Some("c*"), true).await.unwrap(),
        vec!["/home/test/list/c.log"]
    );
    assert_eq!(
        engine.list_directories("list", None, false).await.unwrap(),
        vec!["sub"]
    );

    let err = engine.list_files("missing", None, false).await.unwrap_err();
    assert!(matches!(err, SessionError::PathNotFound { .. }));
}

#[tokio::test]
async fn test_exists_checks() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/list/a.txt", b"");
    transport.fs.add_dir("/home/test/list/sub");
    let mut engine = session.transfers();

    assert!(engine.file_exists("list/a.txt").await.unwrap());
    assert!(engine.file_exists("/home/test/list/a.txt").await.unwrap());
    assert!(!engine.file_exists("list/sub").await.unwrap());
    assert!(engine.directory_exists("list/sub").await.unwrap());
    assert!(!engine.directory_exists("list/a.txt").await.unwrap());
    assert!(engine.file_exists("list/*.txt").await.unwrap());
    assert!(!engine.file_exists("list/*.md").await.unwrap());
    assert!(engine.directory_exists("list/s*").await.unwrap());
    assert!(!engine.file_exists("nowhere/*.txt").await.unwrap());
}

#[tokio::test]
async fn test_sftp_client_opened_once() {
    let (mut session, transport) = fake_session("web01");
    transport.fs.add_file("/home/test/x.txt", b"x");

    session.transfers().file_exists("x.txt").await.unwrap();
    session.transfers().directory_exists(".").await.unwrap();
    session
        .transfers()
        .list_files(".", None, false)
        .await
        .unwrap();
    assert_eq!(transport.sftp_opens.load(Ordering::SeqCst), 1);
}

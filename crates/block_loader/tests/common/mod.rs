#![allow(dead_code)]

use anyhow::Result;
use block_loader::{EncodedRecord, EncodedRecordList};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

/// Writes a manifest of `records` lines with `columns` STRING columns. The
/// value of column `c` of record `r` is `"r:c"`.
pub fn write_manifest(dir: &Path, records: usize, columns: usize) -> Result<PathBuf> {
    let mut text = String::from("@");
    text.push_str(&vec!["STRING"; columns].join("\t"));
    text.push('\n');
    for r in 0..records {
        let line: Vec<String> = (0..columns).map(|c| format!("{}:{}", r, c)).collect();
        text.push_str(&line.join("\t"));
        text.push('\n');
    }
    let path = dir.join("manifest.tsv");
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Record number encoded in the first element of a record written by
/// `write_manifest`.
pub fn record_id(record: &EncodedRecord) -> Result<usize> {
    let text = std::str::from_utf8(record.element(0)?)?;
    let id = text.split(':').next().unwrap_or_default();
    Ok(id.parse()?)
}

pub fn block_ids(block: &EncodedRecordList) -> Result<Vec<usize>> {
    block.records().iter().map(record_id).collect()
}

type Handler = dyn Fn(&str) -> (u16, Vec<u8>) + Send + Sync;

/// Minimal HTTP/1.1 server. The handler gets the request target (path and
/// query) and returns the status and body. Every target is recorded.
pub struct FixtureServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl FixtureServer {
    pub fn start<F>(handler: F) -> Result<Self>
    where
        F: Fn(&str) -> (u16, Vec<u8>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = Arc::clone(&requests);
        thread::Builder::new()
            .name("fixture-http".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let _ = serve(stream, handler.as_ref(), &log);
                }
            })?;

        Ok(Self { base_url, requests })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

fn serve(stream: TcpStream, handler: &Handler, log: &Mutex<Vec<String>>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    if let Ok(mut log) = log.lock() {
        log.push(target.clone());
    }
    let (status, body) = handler(&target);
    let reason = if status == 200 { "OK" } else { "Error" };

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    )?;
    stream.write_all(&body)?;
    stream.flush()?;
    Ok(())
}

/// Query parameter `key` of a recorded request target.
pub fn query_param<'a>(target: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

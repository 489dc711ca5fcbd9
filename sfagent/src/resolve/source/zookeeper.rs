/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{BufMut, Bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use yaml_rust::Yaml;

use super::ConfigSource;
use super::file::wildcard_match;
use crate::resolve::error::SourceError;

const DEFAULT_ENDPOINT: &str = "127.0.0.1:2181";
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

const OP_GET_DATA: i32 = 4;
const OP_GET_CHILDREN: i32 = 8;
const ERR_NO_NODE: i32 = -101;
const MAX_FRAME_SIZE: i32 = 4 << 20;

/// ZooKeeper source speaking the client wire protocol directly, read-only:
/// a fresh session per lookup, getData and getChildren requests only. The
/// final path component may contain wildcards, matched against the children
/// of the parent node.
pub(super) struct ZookeeperSource {
    endpoint: String,
    session_timeout: Duration,
}

impl Default for ZookeeperSource {
    fn default() -> Self {
        ZookeeperSource {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl ZookeeperSource {
    pub(super) fn parse(value: &Yaml) -> anyhow::Result<Self> {
        let mut source = ZookeeperSource::default();
        match value {
            Yaml::Hash(map) => {
                sf_yaml::foreach_kv(map, |k, v| match sf_yaml::key::normalize(k).as_str() {
                    "endpoint" | "endpoints" => {
                        source.endpoint = sf_yaml::value::as_string(v)?;
                        Ok(())
                    }
                    "sessiontimeoutseconds" | "timeout" => {
                        source.session_timeout = sf_yaml::humanize::as_duration(v)?;
                        Ok(())
                    }
                    "cachettl" => Ok(()),
                    _ => Err(anyhow!("invalid key {k}")),
                })?;
                Ok(source)
            }
            Yaml::Null => Ok(source),
            _ => Err(anyhow!("the zookeeper source config should be a map")),
        }
    }

    async fn fetch(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let mut session = ZkSession::open(&self.endpoint, self.session_timeout).await?;

        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
        if !name.contains(['*', '?']) {
            let data = session.get_data(path).await?;
            return Ok(BTreeMap::from([(path.to_string(), data)]));
        }

        let parent = if dir.is_empty() { "/" } else { dir };
        let mut children: Vec<String> = session
            .get_children(parent)
            .await?
            .into_iter()
            .filter(|c| wildcard_match(name, c))
            .collect();
        children.sort();

        let mut content = BTreeMap::new();
        for child in children {
            let child_path = format!("{dir}/{child}");
            match session.get_data(&child_path).await {
                Ok(data) => {
                    content.insert(child_path, data);
                }
                // node deleted between the listing and the read
                Err(SourceError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        if content.is_empty() {
            return Err(SourceError::NotFound);
        }
        Ok(content)
    }
}

#[async_trait]
impl ConfigSource for ZookeeperSource {
    async fn get(&self, path: &str) -> Result<BTreeMap<String, Bytes>, SourceError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        match tokio::time::timeout(self.session_timeout, self.fetch(&path)).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::Other(format!(
                "zookeeper lookup of {path} timed out"
            ))),
        }
    }
}

struct ZkSession {
    stream: TcpStream,
    xid: i32,
}

impl ZkSession {
    async fn open(endpoint: &str, session_timeout: Duration) -> Result<Self, SourceError> {
        let stream = TcpStream::connect(endpoint).await?;
        let mut session = ZkSession { stream, xid: 0 };

        let mut req = Vec::with_capacity(44);
        req.put_i32(0); // protocol version
        req.put_i64(0); // last zxid seen
        req.put_i32(session_timeout.as_millis().min(i32::MAX as u128) as i32);
        req.put_i64(0); // session id, always a fresh session
        req.put_i32(16); // password buffer
        req.put_bytes(0, 16);
        session.send_frame(&req).await?;

        // protocol version + negotiated timeout + session id + password,
        // newer servers append a read-only flag byte
        let rsp = session.recv_frame().await?;
        if rsp.len() < 36 {
            return Err(SourceError::Other(
                "zookeeper session handshake rejected".to_string(),
            ));
        }
        Ok(session)
    }

    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), SourceError> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.put_i32(payload.len() as i32);
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>, SourceError> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).await?;
        let len = i32::from_be_bytes(len);
        if !(0..=MAX_FRAME_SIZE).contains(&len) {
            return Err(SourceError::Other(format!(
                "invalid zookeeper frame length {len}"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// One request/reply exchange. Returns the reply payload past the
    /// header on success.
    async fn call(&mut self, opcode: i32, node_path: &str) -> Result<Vec<u8>, SourceError> {
        self.xid += 1;
        let mut req = Vec::with_capacity(13 + node_path.len());
        req.put_i32(self.xid);
        req.put_i32(opcode);
        req.put_i32(node_path.len() as i32);
        req.put_slice(node_path.as_bytes());
        req.put_u8(0); // no watch
        self.send_frame(&req).await?;

        let rsp = self.recv_frame().await?;
        let mut body = rsp.as_slice();
        let _xid = read_i32(&mut body)?;
        let _zxid = read_i64(&mut body)?;
        match read_i32(&mut body)? {
            0 => Ok(body.to_vec()),
            ERR_NO_NODE => Err(SourceError::NotFound),
            err => Err(SourceError::Other(format!(
                "zookeeper error {err} on {node_path}"
            ))),
        }
    }

    async fn get_data(&mut self, node_path: &str) -> Result<Bytes, SourceError> {
        let body = self.call(OP_GET_DATA, node_path).await?;
        let mut body = body.as_slice();
        // data buffer; the trailing stat record is not needed
        let data = read_buffer(&mut body)?;
        Ok(Bytes::from(data))
    }

    async fn get_children(&mut self, node_path: &str) -> Result<Vec<String>, SourceError> {
        let body = self.call(OP_GET_CHILDREN, node_path).await?;
        let mut body = body.as_slice();
        let count = read_i32(&mut body)?;
        if count <= 0 {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for _ in 0..count {
            let name = read_buffer(&mut body)?;
            let name = String::from_utf8(name)
                .map_err(|e| SourceError::Other(format!("invalid child node name: {e}")))?;
            children.push(name);
        }
        Ok(children)
    }
}

fn truncated() -> SourceError {
    SourceError::Other("truncated zookeeper reply".to_string())
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, SourceError> {
    let (head, rest) = buf.split_first_chunk::<4>().ok_or_else(truncated)?;
    *buf = rest;
    Ok(i32::from_be_bytes(*head))
}

fn read_i64(buf: &mut &[u8]) -> Result<i64, SourceError> {
    let (head, rest) = buf.split_first_chunk::<8>().ok_or_else(truncated)?;
    *buf = rest;
    Ok(i64::from_be_bytes(*head))
}

fn read_buffer(buf: &mut &[u8]) -> Result<Vec<u8>, SourceError> {
    let len = read_i32(buf)?;
    if len < 0 {
        // null buffer
        return Ok(Vec::new());
    }
    let len = len as usize;
    if buf.len() < len {
        return Err(truncated());
    }
    let (data, rest) = buf.split_at(len);
    let data = data.to_vec();
    *buf = rest;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn put_buffer(buf: &mut Vec<u8>, data: &[u8]) {
        buf.put_i32(data.len() as i32);
        buf.put_slice(data);
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream
            .write_all(&(payload.len() as i32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; i32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn accept_session(stream: &mut TcpStream) {
        let req = read_frame(stream).await;
        assert_eq!(req.len(), 44);
        let mut rsp = Vec::new();
        rsp.put_i32(0); // protocol version
        rsp.put_i32(10_000); // negotiated timeout
        rsp.put_i64(77); // session id
        put_buffer(&mut rsp, &[0u8; 16]);
        write_frame(stream, &rsp).await;
    }

    /// (xid, opcode, path) of a request frame
    fn parse_request(req: &[u8]) -> (i32, i32, String) {
        let xid = i32::from_be_bytes(req[0..4].try_into().unwrap());
        let opcode = i32::from_be_bytes(req[4..8].try_into().unwrap());
        let plen = i32::from_be_bytes(req[8..12].try_into().unwrap()) as usize;
        let path = String::from_utf8(req[12..12 + plen].to_vec()).unwrap();
        (xid, opcode, path)
    }

    fn reply(xid: i32, err: i32) -> Vec<u8> {
        let mut rsp = Vec::new();
        rsp.put_i32(xid);
        rsp.put_i64(1); // zxid
        rsp.put_i32(err);
        rsp
    }

    async fn listen() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        (endpoint, listener)
    }

    #[tokio::test]
    async fn node_data_lookup() {
        let (endpoint, listener) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_session(&mut stream).await;

            let (xid, opcode, path) = parse_request(&read_frame(&mut stream).await);
            assert_eq!(opcode, OP_GET_DATA);
            assert_eq!(path, "/svc/config");
            let mut rsp = reply(xid, 0);
            put_buffer(&mut rsp, b"a: 1\n");
            rsp.put_bytes(0, 68); // stat record
            write_frame(&mut stream, &rsp).await;
        });

        let source = ZookeeperSource {
            endpoint,
            ..ZookeeperSource::default()
        };
        let content = source.get("/svc/config").await.unwrap();
        assert_eq!(content.get("/svc/config").unwrap().as_ref(), b"a: 1\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_node_is_not_found() {
        let (endpoint, listener) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_session(&mut stream).await;

            let (xid, _, _) = parse_request(&read_frame(&mut stream).await);
            write_frame(&mut stream, &reply(xid, ERR_NO_NODE)).await;
        });

        let source = ZookeeperSource {
            endpoint,
            ..ZookeeperSource::default()
        };
        assert!(matches!(
            source.get("/svc/missing").await,
            Err(SourceError::NotFound)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn wildcard_lists_children() {
        let (endpoint, listener) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_session(&mut stream).await;

            let (xid, opcode, path) = parse_request(&read_frame(&mut stream).await);
            assert_eq!(opcode, OP_GET_CHILDREN);
            assert_eq!(path, "/svc");
            let mut rsp = reply(xid, 0);
            rsp.put_i32(2);
            put_buffer(&mut rsp, b"one.yaml");
            put_buffer(&mut rsp, b"two.txt");
            write_frame(&mut stream, &rsp).await;

            let (xid, opcode, path) = parse_request(&read_frame(&mut stream).await);
            assert_eq!(opcode, OP_GET_DATA);
            assert_eq!(path, "/svc/one.yaml");
            let mut rsp = reply(xid, 0);
            put_buffer(&mut rsp, b"name: one\n");
            rsp.put_bytes(0, 68);
            write_frame(&mut stream, &rsp).await;
        });

        let source = ZookeeperSource {
            endpoint,
            ..ZookeeperSource::default()
        };
        let content = source.get("/svc/*.yaml").await.unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content.get("/svc/one.yaml").unwrap().as_ref(), b"name: one\n");
        server.await.unwrap();
    }
}

//! TOON codec adapter
//!
//! The coordinator treats TOON as an opaque serialization with an
//! encode/decode/round-trip contract. `CommandCodec` wraps the external
//! command-line encoder: stdin carries the JSON payload for encoding or the
//! TOON text for decoding, stdout carries the result, and every call is
//! bounded by a hard timeout. `IndentCodec` is the in-process substitute
//! used when no external command is configured.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{CoordinatorError, Result};

const ENCODE_CACHE_CAP: usize = 1024;

/// Encode/decode seam over the external TOON tooling
#[async_trait]
pub trait ToonCodec: Send + Sync {
    async fn encode(&self, payload: &Value) -> Result<String>;
    async fn decode(&self, toon: &str) -> Result<Value>;
}

/// Normalize encoded text: LF endings, no trailing spaces, non-empty, and
/// visibly not JSON
pub fn normalize_toon(text: &str) -> Result<String> {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let toon = unified
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string();
    if toon.is_empty() {
        return Err(CoordinatorError::codec("empty TOON text"));
    }
    let head = toon.trim_start();
    if head.starts_with('{') || head.starts_with('[') {
        return Err(CoordinatorError::codec("target looks like JSON, TOON expected"));
    }
    Ok(toon)
}

/// sha256 over the canonical JSON bytes of a payload
pub fn payload_digest(payload: &Value) -> [u8; 32] {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

/// External command-line codec invoked per call
pub struct CommandCodec {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCodec {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CoordinatorError::config("empty codec command"))?;
        Ok(CommandCodec {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    async fn run(&self, mode_flag: Option<&str>, stdin_text: &str) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(flag) = mode_flag {
            command.arg(flag);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            CoordinatorError::codec(format!("cannot spawn {}: {err}", self.program))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoordinatorError::codec("codec stdin unavailable"))?;
        let input = stdin_text.to_string();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(input.as_bytes()).await;
            // Dropping stdin closes the pipe so the codec can finish.
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                CoordinatorError::codec(format!(
                    "codec timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|err| CoordinatorError::codec(format!("codec wait failed: {err}")))?;
        writer.abort();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first_line = stderr.lines().next().unwrap_or("codec failed").to_string();
            return Err(CoordinatorError::codec(first_line));
        }
        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| CoordinatorError::codec("codec produced non-UTF-8 output"))?;
        if stdout.trim().is_empty() {
            return Err(CoordinatorError::codec("codec produced empty output"));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl ToonCodec for CommandCodec {
    async fn encode(&self, payload: &Value) -> Result<String> {
        let json = serde_json::to_string(payload)
            .map_err(|err| CoordinatorError::codec(format!("payload serialization: {err}")))?;
        let stdout = self.run(Some("--encode"), &json).await?;
        normalize_toon(&stdout)
    }

    async fn decode(&self, toon: &str) -> Result<Value> {
        let stdout = self.run(None, toon).await?;
        let decoded: Value = serde_json::from_str(stdout.trim())
            .map_err(|err| CoordinatorError::codec(format!("undecodable codec output: {err}")))?;
        if !decoded.is_object() {
            return Err(CoordinatorError::codec("decoded root must be an object"));
        }
        Ok(decoded)
    }
}

/// Deterministic in-process codec: objects as indented `key = value` blocks,
/// lists as counted `key[n]:` blocks with `-` items. Scalars are JSON
/// scalar literals so strings round-trip exactly.
pub struct IndentCodec;

#[async_trait]
impl ToonCodec for IndentCodec {
    async fn encode(&self, payload: &Value) -> Result<String> {
        let map = payload
            .as_object()
            .ok_or_else(|| CoordinatorError::codec("payload root must be an object"))?;
        let mut lines = Vec::new();
        encode_object(map, 0, &mut lines)?;
        normalize_toon(&lines.join("\n"))
    }

    async fn decode(&self, toon: &str) -> Result<Value> {
        let lines = split_lines(toon)?;
        let mut pos = 0;
        let map = parse_object(&lines, &mut pos, 0)?;
        if pos != lines.len() {
            return Err(CoordinatorError::codec(format!(
                "trailing content at line {}",
                lines[pos].number
            )));
        }
        Ok(Value::Object(map))
    }
}

fn encode_object(
    map: &serde_json::Map<String, Value>,
    indent: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    let pad = "  ".repeat(indent);
    for (key, value) in map {
        if key.is_empty() || key.contains([':', '[', ']', '=', '\n']) {
            return Err(CoordinatorError::codec(format!("unencodable key: {key:?}")));
        }
        match value {
            Value::Object(child) => {
                lines.push(format!("{pad}{key}:"));
                encode_object(child, indent + 1, lines)?;
            }
            Value::Array(items) => {
                lines.push(format!("{pad}{key}[{}]:", items.len()));
                let item_pad = "  ".repeat(indent + 1);
                for item in items {
                    match item {
                        Value::Object(child) => {
                            lines.push(format!("{item_pad}-"));
                            encode_object(child, indent + 2, lines)?;
                        }
                        Value::Array(_) => {
                            return Err(CoordinatorError::codec(format!(
                                "nested list under {key} is not encodable"
                            )))
                        }
                        scalar => lines.push(format!("{item_pad}- {}", scalar_literal(scalar)?)),
                    }
                }
            }
            scalar => lines.push(format!("{pad}{key} = {}", scalar_literal(scalar)?)),
        }
    }
    Ok(())
}

fn scalar_literal(value: &Value) -> Result<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
            serde_json::to_string(value)
                .map_err(|err| CoordinatorError::codec(format!("scalar encoding: {err}")))
        }
        _ => Err(CoordinatorError::codec("not a scalar")),
    }
}

struct Line<'a> {
    number: usize,
    indent: usize,
    content: &'a str,
}

fn split_lines(toon: &str) -> Result<Vec<Line<'_>>> {
    let mut lines = Vec::new();
    for (idx, raw) in toon.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let spaces = raw.len() - raw.trim_start_matches(' ').len();
        if spaces % 2 != 0 {
            return Err(CoordinatorError::codec(format!(
                "odd indentation at line {}",
                idx + 1
            )));
        }
        lines.push(Line {
            number: idx + 1,
            indent: spaces / 2,
            content: raw.trim(),
        });
    }
    Ok(lines)
}

fn parse_object(
    lines: &[Line<'_>],
    pos: &mut usize,
    indent: usize,
) -> Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent || line.content.starts_with('-') {
            break;
        }
        if line.indent > indent {
            return Err(CoordinatorError::codec(format!(
                "unexpected indentation at line {}",
                line.number
            )));
        }
        *pos += 1;
        if let Some((key, literal)) = line.content.split_once(" = ") {
            map.insert(key.to_string(), parse_scalar(literal, line.number)?);
        } else if let Some(header) = line.content.strip_suffix(':') {
            if let Some((key, count)) = parse_list_header(header) {
                let items = parse_list(lines, pos, indent + 1)?;
                if items.len() != count {
                    return Err(CoordinatorError::codec(format!(
                        "list {key} declares {count} items, found {}",
                        items.len()
                    )));
                }
                map.insert(key.to_string(), Value::Array(items));
            } else {
                let child = parse_object(lines, pos, indent + 1)?;
                map.insert(header.to_string(), Value::Object(child));
            }
        } else {
            return Err(CoordinatorError::codec(format!(
                "unparseable line {}: {}",
                line.number, line.content
            )));
        }
    }
    Ok(map)
}

fn parse_list_header(header: &str) -> Option<(&str, usize)> {
    let open = header.find('[')?;
    let close = header.strip_suffix(']')?;
    let count = close.get(open + 1..)?.parse().ok()?;
    Some((&header[..open], count))
}

fn parse_list(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent != indent || !line.content.starts_with('-') {
            break;
        }
        *pos += 1;
        if line.content == "-" {
            let child = parse_object(lines, pos, indent + 1)?;
            items.push(Value::Object(child));
        } else if let Some(literal) = line.content.strip_prefix("- ") {
            items.push(parse_scalar(literal, line.number)?);
        } else {
            return Err(CoordinatorError::codec(format!(
                "unparseable list item at line {}",
                line.number
            )));
        }
    }
    Ok(items)
}

fn parse_scalar(literal: &str, line_number: usize) -> Result<Value> {
    serde_json::from_str(literal).map_err(|_| {
        CoordinatorError::codec(format!("invalid scalar at line {line_number}: {literal}"))
    })
}

/// Round-trip-verifying wrapper with a digest-keyed encode cache
#[derive(Clone)]
pub struct ToonGateway {
    inner: Arc<dyn ToonCodec>,
    cache: Arc<Mutex<HashMap<[u8; 32], String>>>,
}

impl std::fmt::Debug for ToonGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToonGateway").finish_non_exhaustive()
    }
}

impl ToonGateway {
    pub fn new(inner: Arc<dyn ToonCodec>) -> Self {
        ToonGateway {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Encode, then decode back and require structural equality
    pub async fn encode_verified(&self, payload: &Value) -> Result<String> {
        let digest = payload_digest(payload);
        if let Some(hit) = self.cache.lock().await.get(&digest) {
            return Ok(hit.clone());
        }
        let toon = self.inner.encode(payload).await?;
        let toon = normalize_toon(&toon)?;
        let decoded = self.inner.decode(&toon).await?;
        if &decoded != payload {
            return Err(CoordinatorError::codec("round-trip mismatch"));
        }
        let mut cache = self.cache.lock().await;
        if cache.len() >= ENCODE_CACHE_CAP {
            cache.clear();
        }
        cache.insert(digest, toon.clone());
        Ok(toon)
    }

    pub async fn decode(&self, toon: &str) -> Result<Value> {
        self.inner.decode(toon).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "famille": {
                "defunt": {
                    "nom": "Jean Durand",
                    "statut_matrimonial": "MARIE",
                    "age_au_deces": 78,
                    "est_handicape": false
                },
                "descendants": {
                    "enfants": [
                        {"nom": "Lucie Durand", "est_mineur": false},
                        {"nom": "Hugo Durand", "est_mineur": true}
                    ]
                }
            },
            "patrimoine": {
                "actifs": [{"libelle": "Maison à Lyon", "valeur": 320000}]
            },
            "quotites": [0.5, 0.25]
        })
    }

    #[tokio::test]
    async fn test_indent_codec_round_trip() {
        let payload = sample_payload();
        let toon = IndentCodec.encode(&payload).await.unwrap();
        assert!(!toon.trim_start().starts_with('{'));
        assert!(toon.contains("enfants[2]:"));
        let decoded = IndentCodec.decode(&toon).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_indent_codec_preserves_number_kinds() {
        let payload = json!({"a": {"ratio": 0.25, "montant": 1500}});
        let toon = IndentCodec.encode(&payload).await.unwrap();
        let decoded = IndentCodec.decode(&toon).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_indent_codec_rejects_count_mismatch() {
        let toon = "enfants[3]:\n  - \"a\"\n  - \"b\"";
        let err = IndentCodec.decode(toon).await.unwrap_err();
        assert!(err.to_string().contains("declares 3"));
    }

    #[tokio::test]
    async fn test_gateway_verifies_and_caches() {
        let gateway = ToonGateway::new(Arc::new(IndentCodec));
        let payload = sample_payload();
        let first = gateway.encode_verified(&payload).await.unwrap();
        let second = gateway.encode_verified(&payload).await.unwrap();
        assert_eq!(first, second);
        let decoded = gateway.decode(&first).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_normalize_toon_rejects_json() {
        assert!(normalize_toon("{\"a\": 1}").is_err());
        assert!(normalize_toon("   \n").is_err());
        let cleaned = normalize_toon("famille:  \r\n  nom = \"X\"\n").unwrap();
        assert_eq!(cleaned, "famille:\n  nom = \"X\"");
    }

    #[test]
    fn test_payload_digest_is_stable() {
        let payload = sample_payload();
        assert_eq!(payload_digest(&payload), payload_digest(&payload));
        assert_ne!(payload_digest(&payload), payload_digest(&json!({"a": 1})));
    }
}

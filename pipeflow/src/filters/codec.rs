//! Encoding stages: gzip, base64 and JSON.
//!
//! The gzip and base64 stages stream their input in chunks and never hold
//! more than one chunk of it in memory. The JSON decoder reads its whole
//! input.

use super::CHUNK_SIZE;
use crate::context::Session;
use crate::errors::Result;
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use base64::engine::GeneralPurpose;
use base64::Engine;
use flate2::Compression;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Compresses input as a single gzip member.
#[derive(Debug, Clone, Copy)]
pub struct GzipEncode {
    level: Compression,
}

impl GzipEncode {
    /// Creates an encoder with the default compression level.
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Sets the compression level, from 0 (store) to 9 (best).
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }
}

impl Default for GzipEncode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for GzipEncode {
    fn name(&self) -> &str {
        "gzip_encode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), self.level);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buf[..n])?;
            let compressed = std::mem::take(encoder.get_mut());
            if !compressed.is_empty() {
                output.write_all(&compressed).await?;
            }
        }
        output.write_all(&encoder.finish()?).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage gzip-compressing its input.
pub fn gzip_encode() -> StageRef {
    Arc::new(GzipEncode::new())
}

/// Decompresses a gzip stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecode;

#[async_trait]
impl Stage for GzipDecode {
    fn name(&self) -> &str {
        "gzip_decode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut decoder = flate2::write::GzDecoder::new(Vec::new());
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut seen = 0usize;

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            seen += n;
            decoder.write_all(&buf[..n])?;
            let plain = std::mem::take(decoder.get_mut());
            if !plain.is_empty() {
                output.write_all(&plain).await?;
            }
        }
        if seen == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty gzip stream").into());
        }
        output.write_all(&decoder.finish()?).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage decompressing gzip input.
pub fn gzip_decode() -> StageRef {
    Arc::new(GzipDecode)
}

/// Base64-encodes input with the given engine.
#[derive(Debug, Clone)]
pub struct Base64Encode {
    engine: GeneralPurpose,
}

#[async_trait]
impl Stage for Base64Encode {
    fn name(&self) -> &str {
        "base64_encode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + 2);

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);
            // Only whole 3-byte groups can be encoded without padding.
            let whole = pending.len() / 3 * 3;
            if whole > 0 {
                output
                    .write_all(self.engine.encode(&pending[..whole]).as_bytes())
                    .await?;
                pending.drain(..whole);
            }
        }
        if !pending.is_empty() {
            output.write_all(self.engine.encode(&pending).as_bytes()).await?;
        }
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage base64-encoding its input, e.g. with
/// `base64::engine::general_purpose::STANDARD`.
pub fn base64_encode(engine: GeneralPurpose) -> StageRef {
    Arc::new(Base64Encode { engine })
}

/// Decodes base64 input with the given engine. Line breaks are skipped.
#[derive(Debug, Clone)]
pub struct Base64Decode {
    engine: GeneralPurpose,
}

#[async_trait]
impl Stage for Base64Decode {
    fn name(&self) -> &str {
        "base64_decode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + 3);

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            pending.extend(buf[..n].iter().filter(|b| !matches!(b, b'\r' | b'\n')));
            let whole = pending.len() / 4 * 4;
            if whole > 0 {
                output.write_all(&self.engine.decode(&pending[..whole])?).await?;
                pending.drain(..whole);
            }
        }
        if !pending.is_empty() {
            output.write_all(&self.engine.decode(&pending)?).await?;
        }
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage decoding base64 input.
pub fn base64_decode(engine: GeneralPurpose) -> StageRef {
    Arc::new(Base64Decode { engine })
}

/// Writes a value as one line of JSON.
pub struct JsonEncode<T> {
    value: T,
}

impl<T> fmt::Debug for JsonEncode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonEncode").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Stage for JsonEncode<T>
where
    T: Serialize + Send + Sync,
{
    fn name(&self) -> &str {
        "json_encode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut bytes = serde_json::to_vec(&self.value)?;
        bytes.push(b'\n');
        let mut output = session.output();
        output.write_all(&bytes).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage writing `value` as JSON followed by a newline.
pub fn json_encode<T>(value: T) -> StageRef
where
    T: Serialize + Send + Sync + 'static,
{
    Arc::new(JsonEncode { value })
}

/// Shared destination for a value decoded by [`json_decode`].
pub struct JsonSlot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> JsonSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Removes and returns the decoded value.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    /// Returns true if a value has been decoded and not yet taken.
    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }

    fn fill(&self, value: T) {
        *self.value.lock() = Some(value);
    }
}

impl<T: Clone> JsonSlot<T> {
    /// Returns a copy of the decoded value.
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }
}

impl<T> Clone for JsonSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for JsonSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSlot")
            .field("filled", &self.is_filled())
            .finish()
    }
}

/// Decodes the first JSON value of the input into a slot.
pub struct JsonDecode<T> {
    slot: JsonSlot<T>,
}

impl<T> fmt::Debug for JsonDecode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonDecode")
            .field("slot", &self.slot)
            .finish()
    }
}

#[async_trait]
impl<T> Stage for JsonDecode<T>
where
    T: DeserializeOwned + Send,
{
    fn name(&self) -> &str {
        "json_decode"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut raw = Vec::new();
        session.input().read_to_end(&mut raw).await?;

        let mut values = serde_json::Deserializer::from_slice(&raw).into_iter::<T>();
        match values.next() {
            Some(value) => {
                self.slot.fill(value?);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no JSON value in input").into()),
        }
    }
}

/// Returns a stage decoding the first JSON value of its input into `slot`.
pub fn json_decode<T>(slot: JsonSlot<T>) -> StageRef
where
    T: DeserializeOwned + Send + 'static,
{
    Arc::new(JsonDecode { slot })
}

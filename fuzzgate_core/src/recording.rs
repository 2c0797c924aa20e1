use crate::provider::FuzzedDataProvider;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to encode recording: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode recording: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("recording is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One value handed out by a provider, in the order the target consumed it.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum RecordedValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    Bytes(Vec<u8>),
    Str(String),
    Remaining(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Recording {
    pub values: Vec<RecordedValue>,
}

impl Recording {
    /// Encodes the recording into printable base64.
    pub fn encode(&self) -> Result<String, RecordingError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        Ok(BASE64.encode(bytes))
    }

    pub fn decode(encoded: &str) -> Result<Self, RecordingError> {
        let bytes = BASE64.decode(encoded.trim())?;
        let (recording, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(recording)
    }
}

/// Forwards to an inner provider and records every value it hands out.
pub struct RecordingProvider<'a> {
    inner: &'a mut dyn FuzzedDataProvider,
    recording: Recording,
}

impl<'a> RecordingProvider<'a> {
    pub fn new(inner: &'a mut dyn FuzzedDataProvider) -> Self {
        Self {
            inner,
            recording: Recording::default(),
        }
    }

    pub fn into_recording(self) -> Recording {
        self.recording
    }

    fn record<T: Clone>(&mut self, value: T, wrap: fn(T) -> RecordedValue) -> T {
        self.recording.values.push(wrap(value.clone()));
        value
    }
}

impl FuzzedDataProvider for RecordingProvider<'_> {
    fn consume_bool(&mut self) -> bool {
        let value = self.inner.consume_bool();
        self.record(value, RecordedValue::Bool)
    }

    fn consume_u8(&mut self) -> u8 {
        let value = self.inner.consume_u8();
        self.record(value, RecordedValue::U8)
    }

    fn consume_u16(&mut self) -> u16 {
        let value = self.inner.consume_u16();
        self.record(value, RecordedValue::U16)
    }

    fn consume_u32(&mut self) -> u32 {
        let value = self.inner.consume_u32();
        self.record(value, RecordedValue::U32)
    }

    fn consume_u64(&mut self) -> u64 {
        let value = self.inner.consume_u64();
        self.record(value, RecordedValue::U64)
    }

    fn consume_i32(&mut self) -> i32 {
        let value = self.inner.consume_i32();
        self.record(value, RecordedValue::I32)
    }

    fn consume_i64(&mut self) -> i64 {
        let value = self.inner.consume_i64();
        self.record(value, RecordedValue::I64)
    }

    fn consume_u64_in_range(&mut self, min: u64, max: u64) -> u64 {
        let value = self.inner.consume_u64_in_range(min, max);
        self.record(value, RecordedValue::U64)
    }

    fn consume_i64_in_range(&mut self, min: i64, max: i64) -> i64 {
        let value = self.inner.consume_i64_in_range(min, max);
        self.record(value, RecordedValue::I64)
    }

    fn consume_bytes(&mut self, max_len: usize) -> Vec<u8> {
        let value = self.inner.consume_bytes(max_len);
        self.record(value, RecordedValue::Bytes)
    }

    fn consume_remaining_as_bytes(&mut self) -> Vec<u8> {
        let value = self.inner.consume_remaining_as_bytes();
        self.record(value, RecordedValue::Bytes)
    }

    fn consume_string(&mut self, max_len: usize) -> String {
        let value = self.inner.consume_string(max_len);
        self.record(value, RecordedValue::Str)
    }

    fn consume_remaining_as_string(&mut self) -> String {
        let value = self.inner.consume_remaining_as_string();
        self.record(value, RecordedValue::Str)
    }

    fn remaining_bytes(&mut self) -> usize {
        let value = self.inner.remaining_bytes();
        self.recording.values.push(RecordedValue::Remaining(value as u64));
        value
    }
}

/// Serves a recording back to a target, value by value.
///
/// # Panics
/// Every primitive panics if the target asks for a different kind of value than was
/// recorded, or for more values than were recorded.
#[derive(Debug, Clone, Default)]
pub struct ReplayProvider {
    values: VecDeque<RecordedValue>,
}

impl ReplayProvider {
    pub fn from_recording(recording: Recording) -> Self {
        Self {
            values: recording.values.into(),
        }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, RecordingError> {
        Recording::decode(encoded).map(Self::from_recording)
    }

    pub fn is_exhausted(&self) -> bool {
        self.values.is_empty()
    }

    fn next(&mut self, requested: &str) -> RecordedValue {
        match self.values.pop_front() {
            Some(value) => value,
            None => panic!(
                "replay exhausted: target requested {requested} past the end of the recording"
            ),
        }
    }
}

fn diverged(requested: &str, recorded: &RecordedValue) -> ! {
    panic!("replay diverged: target requested {requested} but the recording holds {recorded:?}")
}

impl FuzzedDataProvider for ReplayProvider {
    fn consume_bool(&mut self) -> bool {
        match self.next("bool") {
            RecordedValue::Bool(value) => value,
            other => diverged("bool", &other),
        }
    }

    fn consume_u8(&mut self) -> u8 {
        match self.next("u8") {
            RecordedValue::U8(value) => value,
            other => diverged("u8", &other),
        }
    }

    fn consume_u16(&mut self) -> u16 {
        match self.next("u16") {
            RecordedValue::U16(value) => value,
            other => diverged("u16", &other),
        }
    }

    fn consume_u32(&mut self) -> u32 {
        match self.next("u32") {
            RecordedValue::U32(value) => value,
            other => diverged("u32", &other),
        }
    }

    fn consume_u64(&mut self) -> u64 {
        match self.next("u64") {
            RecordedValue::U64(value) => value,
            other => diverged("u64", &other),
        }
    }

    fn consume_i32(&mut self) -> i32 {
        match self.next("i32") {
            RecordedValue::I32(value) => value,
            other => diverged("i32", &other),
        }
    }

    fn consume_i64(&mut self) -> i64 {
        match self.next("i64") {
            RecordedValue::I64(value) => value,
            other => diverged("i64", &other),
        }
    }

    fn consume_u64_in_range(&mut self, min: u64, max: u64) -> u64 {
        match self.next("u64 in range") {
            RecordedValue::U64(value) if (min..=max).contains(&value) => value,
            other => diverged("u64 in range", &other),
        }
    }

    fn consume_i64_in_range(&mut self, min: i64, max: i64) -> i64 {
        match self.next("i64 in range") {
            RecordedValue::I64(value) if (min..=max).contains(&value) => value,
            other => diverged("i64 in range", &other),
        }
    }

    fn consume_bytes(&mut self, max_len: usize) -> Vec<u8> {
        match self.next("bytes") {
            RecordedValue::Bytes(value) if value.len() <= max_len => value,
            other => diverged("bytes", &other),
        }
    }

    fn consume_remaining_as_bytes(&mut self) -> Vec<u8> {
        match self.next("remaining bytes") {
            RecordedValue::Bytes(value) => value,
            other => diverged("remaining bytes", &other),
        }
    }

    fn consume_string(&mut self, max_len: usize) -> String {
        match self.next("string") {
            RecordedValue::Str(value) if value.len() <= max_len.saturating_mul(3) => value,
            other => diverged("string", &other),
        }
    }

    fn consume_remaining_as_string(&mut self) -> String {
        match self.next("remaining string") {
            RecordedValue::Str(value) => value,
            other => diverged("remaining string", &other),
        }
    }

    fn remaining_bytes(&mut self) -> usize {
        match self.next("remaining byte count") {
            RecordedValue::Remaining(value) => value as usize,
            other => diverged("remaining byte count", &other),
        }
    }
}

/// Turns the raw fuzzer input into a stream of typed values.
///
/// Integers are taken from the end of the input and byte sequences from the front,
/// so that mutations of one kind of data disturb the other as little as possible.
/// Once the input is exhausted every primitive returns zero or an empty value.
pub trait FuzzedDataProvider {
    fn consume_bool(&mut self) -> bool;
    fn consume_u8(&mut self) -> u8;
    fn consume_u16(&mut self) -> u16;
    fn consume_u32(&mut self) -> u32;
    fn consume_u64(&mut self) -> u64;
    fn consume_i32(&mut self) -> i32;
    fn consume_i64(&mut self) -> i64;

    /// Returns a value in `min..=max`.
    ///
    /// # Panics
    /// Panics if `min > max`.
    fn consume_u64_in_range(&mut self, min: u64, max: u64) -> u64;

    /// Returns a value in `min..=max`.
    ///
    /// # Panics
    /// Panics if `min > max`.
    fn consume_i64_in_range(&mut self, min: i64, max: i64) -> i64;

    /// Returns at most `max_len` bytes.
    fn consume_bytes(&mut self, max_len: usize) -> Vec<u8>;
    fn consume_remaining_as_bytes(&mut self) -> Vec<u8>;

    /// Returns a string built from at most `max_len` input bytes, replacing invalid UTF-8.
    fn consume_string(&mut self, max_len: usize) -> String;
    fn consume_remaining_as_string(&mut self) -> String;

    fn remaining_bytes(&mut self) -> usize;
}

/// The provider handed to provider-mode targets, re-fed with every new input.
#[derive(Debug, Clone, Default)]
pub struct ByteProvider {
    data: Vec<u8>,
    front: usize,
    back: usize,
}

impl ByteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut provider = Self::new();
        provider.feed(data);
        provider
    }

    /// Replaces the input and rewinds to the start.
    pub fn feed(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.reset();
    }

    /// Rewinds to the start of the current input so it can be consumed again.
    pub fn reset(&mut self) {
        self.front = 0;
        self.back = self.data.len();
    }

    fn take_back(&mut self) -> Option<u8> {
        if self.back == self.front {
            return None;
        }
        self.back -= 1;
        Some(self.data[self.back])
    }

    fn consume_uint(&mut self, size: usize) -> u64 {
        let mut result = 0u64;
        for _ in 0..size {
            match self.take_back() {
                Some(byte) => result = (result << 8) | u64::from(byte),
                None => break,
            }
        }
        result
    }

    /// Draws just enough bytes to cover `range` and folds them into `0..=range`.
    fn consume_offset(&mut self, range: u64) -> u64 {
        let mut result = 0u64;
        let mut offset = 0;
        while offset < u64::BITS && (range >> offset) > 0 {
            match self.take_back() {
                Some(byte) => result = (result << 8) | u64::from(byte),
                None => break,
            }
            offset += 8;
        }
        if range != u64::MAX {
            result %= range + 1;
        }
        result
    }
}

impl FuzzedDataProvider for ByteProvider {
    fn consume_bool(&mut self) -> bool {
        self.consume_u8() & 1 == 1
    }

    fn consume_u8(&mut self) -> u8 {
        self.consume_uint(1) as u8
    }

    fn consume_u16(&mut self) -> u16 {
        self.consume_uint(2) as u16
    }

    fn consume_u32(&mut self) -> u32 {
        self.consume_uint(4) as u32
    }

    fn consume_u64(&mut self) -> u64 {
        self.consume_uint(8)
    }

    fn consume_i32(&mut self) -> i32 {
        self.consume_u32() as i32
    }

    fn consume_i64(&mut self) -> i64 {
        self.consume_u64() as i64
    }

    fn consume_u64_in_range(&mut self, min: u64, max: u64) -> u64 {
        assert!(min <= max, "min ({min}) must not exceed max ({max})");
        min + self.consume_offset(max - min)
    }

    fn consume_i64_in_range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min <= max, "min ({min}) must not exceed max ({max})");
        let offset = self.consume_offset(max.abs_diff(min));
        min.wrapping_add_unsigned(offset)
    }

    fn consume_bytes(&mut self, max_len: usize) -> Vec<u8> {
        let len = max_len.min(self.back - self.front);
        let bytes = self.data[self.front..self.front + len].to_vec();
        self.front += len;
        bytes
    }

    fn consume_remaining_as_bytes(&mut self) -> Vec<u8> {
        let remaining = self.back - self.front;
        self.consume_bytes(remaining)
    }

    fn consume_string(&mut self, max_len: usize) -> String {
        String::from_utf8_lossy(&self.consume_bytes(max_len)).into_owned()
    }

    fn consume_remaining_as_string(&mut self) -> String {
        String::from_utf8_lossy(&self.consume_remaining_as_bytes()).into_owned()
    }

    fn remaining_bytes(&mut self) -> usize {
        self.back - self.front
    }
}

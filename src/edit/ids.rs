//! Identifier and timestamp sources for edit sessions.
//!
//! Identifiers are 8 uppercase hex digits derived from SHA-256 over a seed and a counter, so a
//! fixed seed reproduces the same sequence. Values already present in the document are
//! reserved and never handed out again.

use std::collections::HashSet;

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Largest value Word accepts for `w14:paraId` and `w16cid:durableId` is one below this.
const PARA_ID_LIMIT: u32 = 0x7FFF_FFFF;

#[derive(Clone, Debug)]
pub struct IdSource {
    seed: Vec<u8>,
    counter: u64,
    used: HashSet<u32>,
}

impl IdSource {
    /// A source seeded with `seed`, or with the clock and process id when none is given.
    pub fn new(seed: Option<&str>) -> Self {
        let seed = match seed {
            Some(s) => s.as_bytes().to_vec(),
            None => {
                let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
                format!("{nanos}:{}", std::process::id()).into_bytes()
            }
        };
        Self {
            seed,
            counter: 0,
            used: HashSet::new(),
        }
    }

    fn next_u32(&mut self) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.counter += 1;
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Mark an existing hex identifier as taken. Malformed values are ignored.
    pub fn reserve(&mut self, hex_id: &str) {
        if let Ok(v) = u32::from_str_radix(hex_id.trim(), 16) {
            self.used.insert(v);
        }
    }

    /// A fresh `w14:paraId`/`w14:textId`/`w16cid:durableId` value in `1..0x7FFFFFFF`.
    pub fn para_id(&mut self) -> String {
        loop {
            let v = self.next_u32() & PARA_ID_LIMIT;
            if v == 0 || v == PARA_ID_LIMIT || self.used.contains(&v) {
                continue;
            }
            self.used.insert(v);
            return hex::encode_upper(v.to_be_bytes());
        }
    }

    pub fn durable_id(&mut self) -> String {
        self.para_id()
    }

    /// A fresh revision-session id (`w:rsid*`).
    pub fn rsid(&mut self) -> String {
        loop {
            let v = self.next_u32();
            if self.used.insert(v) {
                return hex::encode_upper(v.to_be_bytes());
            }
        }
    }
}

/// Source of `w:date` values: the wall clock, or a fixed stamp for reproducible output.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    fixed: Option<String>,
}

impl Clock {
    pub fn new(fixed: Option<String>) -> Self {
        Self { fixed }
    }

    pub fn now(&self) -> String {
        match &self.fixed {
            Some(ts) => ts.clone(),
            None => Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

//! Room Subscriptions
//!
//! Rooms the client wants to be in. Keys are written `type:name`
//! (e.g. `scan:abc123`, `global:lobby`) and kept in insertion order so
//! restoration after a reconnect replays joins in the order they were made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-side broadcast group kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Updates for one scan, keyed by scan id
    Scan,
    User,
    #[default]
    Global,
    System,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Scan => "scan",
            RoomType::User => "user",
            RoomType::Global => "global",
            RoomType::System => "system",
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(RoomType::Scan),
            "user" => Ok(RoomType::User),
            "global" => Ok(RoomType::Global),
            "system" => Ok(RoomType::System),
            other => Err(format!("unknown room type: {}", other)),
        }
    }
}

/// A `(type, name)` room key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub room_type: RoomType,
    pub name: String,
}

impl RoomKey {
    pub fn new(room_type: RoomType, name: impl Into<String>) -> Self {
        Self {
            room_type,
            name: name.into(),
        }
    }

    pub fn scan(scan_id: impl Into<String>) -> Self {
        Self::new(RoomType::Scan, scan_id)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_type, self.name)
    }
}

impl FromStr for RoomKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (room_type, name) = s
            .split_once(':')
            .ok_or_else(|| format!("room key must be type:name, got {}", s))?;
        if name.is_empty() {
            return Err(format!("room key has an empty name: {}", s));
        }
        Ok(RoomKey::new(room_type.parse()?, name))
    }
}

/// Insertion-ordered set of desired rooms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSet {
    rooms: Vec<RoomKey>,
}

impl RoomSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the room was already present
    pub fn insert(&mut self, key: RoomKey) -> bool {
        if self.rooms.contains(&key) {
            return false;
        }
        self.rooms.push(key);
        true
    }

    /// Returns false if the room was not present
    pub fn remove(&mut self, key: &RoomKey) -> bool {
        match self.rooms.iter().position(|k| k == key) {
            Some(idx) => {
                self.rooms.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &RoomKey) -> bool {
        self.rooms.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomKey> {
        self.rooms.iter()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

use serde::{Deserialize, Serialize};

use crate::participants::Participant;

/// Wire value asking the server to pick a free seat.
pub const ANY_SEAT: i32 = -1;

pub fn seat_to_wire(seat: Option<u32>) -> i32 {
    seat.map(|index| index as i32).unwrap_or(ANY_SEAT)
}

pub fn seat_from_wire(seat_id: i32) -> Option<u32> {
    u32::try_from(seat_id).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatLock {
    Locked,
    #[default]
    Unlocked,
}

/// A co-host slot. The occupant is a user id; the roster holds the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub index: u32,
    pub lock: SeatLock,
    pub occupant: Option<String>,
}

/// Seat as carried in responses and snapshots, occupant inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub seat_id: u32,
    #[serde(default)]
    pub status: SeatLock,
    #[serde(default)]
    pub user: Option<Participant>,
}

// AEN Event Log
use alloc::vec::Vec;

use super::{ERROR_DESC_LENGTH, EVENT_QUEUE_LENGTH};
use crate::driver::{DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// Entry never written
    Unused,
    NotRetrieved,
    Retrieved,
}

/// One logged controller event
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub sequence_id: u32,
    /// Local time, seconds since the epoch
    pub time_stamp_sec: u32,
    pub aen_code: u16,
    pub severity: u8,
    pub retrieved: Retrieval,
    pub repeat_count: u8,
    pub parameter_len: u8,
    pub parameter_data: [u8; ERROR_DESC_LENGTH],
}

impl Event {
    const EMPTY: Event = Event {
        sequence_id: 0,
        time_stamp_sec: 0,
        aen_code: 0,
        severity: 0,
        retrieved: Retrieval::Unused,
        repeat_count: 0,
        parameter_len: 0,
        parameter_data: [0; ERROR_DESC_LENGTH],
    };

    /// Description text as reported by the controller
    pub fn parameter(&self) -> &[u8] {
        &self.parameter_data[..self.parameter_len as usize]
    }
}

/// Result of reading the log
#[derive(Debug, Clone, Copy)]
pub struct EventFetch {
    pub event: Event,
    /// Unread events were overwritten since the last read
    pub clobbered: bool,
}

/// Bounded circular log of AENs, indexed by sequence number
pub struct EventLog {
    events: Vec<Event>,
    /// Events ever logged; the newest has sequence `logged - 1`
    logged: u32,
    clobbered: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: alloc::vec![Event::EMPTY; EVENT_QUEUE_LENGTH],
            logged: 0,
            clobbered: false,
        }
    }

    /// Append an event, returning its sequence number
    pub fn push(&mut self, aen_code: u16, severity: u8, time_stamp_sec: u32, parameter: &[u8]) -> u32 {
        let sequence_id = self.logged;
        self.logged = self.logged.wrapping_add(1);

        let entry = &mut self.events[sequence_id as usize % EVENT_QUEUE_LENGTH];
        if entry.retrieved == Retrieval::NotRetrieved {
            self.clobbered = true;
        }

        let len = parameter.len().min(ERROR_DESC_LENGTH);
        let mut parameter_data = [0; ERROR_DESC_LENGTH];
        parameter_data[..len].copy_from_slice(&parameter[..len]);
        *entry = Event {
            sequence_id,
            time_stamp_sec,
            aen_code,
            severity,
            retrieved: Retrieval::NotRetrieved,
            repeat_count: 0,
            parameter_len: len as u8,
            parameter_data,
        };
        sequence_id
    }

    pub fn len(&self) -> usize {
        (self.logged as usize).min(EVENT_QUEUE_LENGTH)
    }

    pub fn is_empty(&self) -> bool {
        self.logged == 0
    }

    pub fn is_clobbered(&self) -> bool {
        self.clobbered
    }

    fn oldest(&self) -> u32 {
        self.logged.saturating_sub(EVENT_QUEUE_LENGTH as u32)
    }

    fn newest(&self) -> Option<u32> {
        self.logged.checked_sub(1)
    }

    pub fn first(&mut self) -> Result<EventFetch> {
        self.newest().ok_or(DriverError::NotFound)?;
        Ok(self.fetch(self.oldest()))
    }

    pub fn last(&mut self) -> Result<EventFetch> {
        let newest = self.newest().ok_or(DriverError::NotFound)?;
        Ok(self.fetch(newest))
    }

    /// Event following `sequence_id`; skips forward past overwritten entries
    pub fn next(&mut self, sequence_id: u32) -> Result<EventFetch> {
        let newest = self.newest().ok_or(DriverError::NotFound)?;
        if sequence_id >= newest {
            return Err(DriverError::NotFound);
        }
        let target = (sequence_id + 1).max(self.oldest());
        Ok(self.fetch(target))
    }

    /// Event preceding `sequence_id`
    pub fn previous(&mut self, sequence_id: u32) -> Result<EventFetch> {
        let newest = self.newest().ok_or(DriverError::NotFound)?;
        if sequence_id == 0 || sequence_id - 1 < self.oldest() {
            return Err(DriverError::NotFound);
        }
        let target = (sequence_id - 1).min(newest);
        Ok(self.fetch(target))
    }

    fn fetch(&mut self, sequence_id: u32) -> EventFetch {
        let entry = &mut self.events[sequence_id as usize % EVENT_QUEUE_LENGTH];
        entry.retrieved = Retrieval::Retrieved;
        let event = *entry;
        let clobbered = core::mem::take(&mut self.clobbered);
        EventFetch { event, clobbered }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

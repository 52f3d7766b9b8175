use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use courier_messaging::Headers;

/// Position of a record: (partition, offset).
pub type Position = (usize, usize);

#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub payload: Bytes,
    pub headers: Headers,
    pub timestamp: i64,
}

impl StoredRecord {
    pub fn new(payload: Bytes, headers: Headers) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

        Self {
            payload,
            headers,
            timestamp,
        }
    }
}

#[derive(Debug)]
pub struct GroupState {
    pub generation: u64,
    pub members: Vec<u64>,
    cursors: Vec<usize>,
    redeliver: VecDeque<Position>,
    in_flight: BTreeSet<Position>,
}

impl GroupState {
    fn new(partitions: usize) -> Self {
        Self {
            generation: 0,
            members: Vec::new(),
            cursors: vec![0; partitions],
            redeliver: VecDeque::new(),
            in_flight: BTreeSet::new(),
        }
    }

    /// Partitions owned by `member` in the current generation.
    pub fn assigned(&self, member: u64) -> Vec<usize> {
        let Some(index) = self.members.iter().position(|m| *m == member) else {
            return Vec::new();
        };

        (0..self.cursors.len())
            .filter(|p| p % self.members.len() == index)
            .collect()
    }

    /// Starts a new generation. Records still in flight go back to the front
    /// of the redelivery queue in offset order.
    pub fn bump(&mut self) {
        self.generation += 1;

        let stale = std::mem::take(&mut self.in_flight);
        for position in stale.into_iter().rev() {
            if !self.redeliver.contains(&position) {
                self.redeliver.push_front(position);
            }
        }
    }

    pub fn join(&mut self, member: u64) {
        self.members.push(member);
        self.bump();
    }

    pub fn leave(&mut self, member: u64) {
        self.members.retain(|m| *m != member);
        self.bump();
    }

    /// Takes the next record for a member owning `assigned`.
    ///
    /// Rejected records on owned partitions are handed out before new ones.
    pub fn take_next(&mut self, assigned: &[usize], log: &[Vec<StoredRecord>]) -> Option<Position> {
        if let Some(index) = self.redeliver.iter().position(|(p, _)| assigned.contains(p)) {
            let position = self.redeliver.remove(index)?;
            self.in_flight.insert(position);
            return Some(position);
        }

        for &partition in assigned {
            let offset = self.cursors[partition];
            if offset < log[partition].len() {
                self.cursors[partition] += 1;
                self.in_flight.insert((partition, offset));
                return Some((partition, offset));
            }
        }

        None
    }

    pub fn settle(&mut self, position: Position) {
        self.in_flight.remove(&position);
        self.redeliver.retain(|p| *p != position);
    }

    pub fn reject(&mut self, position: Position) {
        self.in_flight.remove(&position);
        if !self.redeliver.contains(&position) {
            self.redeliver.push_front(position);
        }
    }

    pub fn pending(&self) -> usize {
        self.redeliver.len() + self.in_flight.len()
    }
}

#[derive(Debug)]
pub struct TopicState {
    pub log: Vec<Vec<StoredRecord>>,
    pub groups: HashMap<String, GroupState>,
    round_robin: usize,
}

impl TopicState {
    pub fn new(partitions: usize) -> Self {
        Self {
            log: vec![Vec::new(); partitions.max(1)],
            groups: HashMap::new(),
            round_robin: 0,
        }
    }

    /// Appends a record. Keyed records always land on the same partition.
    pub fn append(&mut self, key: Option<&str>, record: StoredRecord) -> usize {
        let partitions = self.log.len();

        let partition = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % partitions as u64).unwrap_or_default()
            }
            None => {
                self.round_robin = self.round_robin.wrapping_add(1);
                self.round_robin % partitions
            }
        };

        self.log[partition].push(record);
        partition
    }

    pub fn group_mut(&mut self, group: &str) -> &mut GroupState {
        let partitions = self.log.len();
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState::new(partitions))
    }
}

#[derive(Debug, Default)]
pub struct State {
    pub topics: HashMap<String, TopicState>,
    next_member: u64,
}

impl State {
    pub fn next_member(&mut self) -> u64 {
        self.next_member += 1;
        self.next_member
    }
}

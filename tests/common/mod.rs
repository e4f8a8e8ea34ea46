//! Quest domain shared by the integration tests.

#![allow(dead_code)]

use chronicle::{
    Aggregate, DomainEvent, MetadataDefaults, PayloadShape, Store, StoreOptions, StreamIdentity,
    event_set, storage::inmemory,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestStarted {
    pub name: String,
}

impl DomainEvent for QuestStarted {
    const KIND: &'static str = "quest_started";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersJoined {
    pub day: u32,
    pub location: String,
    pub members: Vec<String>,
}

impl DomainEvent for MembersJoined {
    const KIND: &'static str = "members_joined";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersDeparted {
    pub day: u32,
    pub location: String,
    pub members: Vec<String>,
}

impl DomainEvent for MembersDeparted {
    const KIND: &'static str = "members_departed";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterSlayed {
    pub name: String,
}

impl DomainEvent for MonsterSlayed {
    const KIND: &'static str = "monster_slayed";
}

event_set! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum QuestEvent {
        Started(QuestStarted),
        Joined(MembersJoined),
        Departed(MembersDeparted),
        Slayed(MonsterSlayed),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestParty {
    pub name: Option<String>,
    pub members: Vec<String>,
}

impl Aggregate<QuestEvent> for QuestParty {
    const KIND: &'static str = "quest_party";

    fn stream_starters() -> Vec<PayloadShape> {
        vec![PayloadShape::of::<QuestStarted>()]
    }

    fn apply(&mut self, event: &QuestEvent) {
        match event {
            QuestEvent::Started(e) => self.name = Some(e.name.clone()),
            QuestEvent::Joined(e) => self.members.extend(e.members.iter().cloned()),
            QuestEvent::Departed(e) => self.members.retain(|m| !e.members.contains(m)),
            QuestEvent::Slayed(_) => {}
        }
    }
}

/// Monsters slain along the way; only projected when started explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterTally {
    pub slain: Vec<String>,
}

impl Aggregate<QuestEvent> for MonsterTally {
    const KIND: &'static str = "monster_tally";

    fn apply(&mut self, event: &QuestEvent) {
        if let QuestEvent::Slayed(e) = event {
            self.slain.push(e.name.clone());
        }
    }
}

pub type QuestStore = Store<inmemory::Store, QuestEvent>;

pub fn options(identity: StreamIdentity, metadata: MetadataDefaults) -> StoreOptions<QuestEvent> {
    StoreOptions::<QuestEvent>::builder()
        .identity(identity)
        .event_types_from_set()
        .unwrap()
        .inline_projection::<QuestParty>()
        .unwrap()
        .inline_projection::<MonsterTally>()
        .unwrap()
        .metadata(metadata)
        .build()
}

pub fn store(identity: StreamIdentity) -> QuestStore {
    Store::new(inmemory::Store::new(), options(identity, MetadataDefaults::new()))
}

pub fn started(name: &str) -> QuestEvent {
    QuestStarted {
        name: name.to_owned(),
    }
    .into()
}

pub fn joined(day: u32, location: &str, members: &[&str]) -> QuestEvent {
    MembersJoined {
        day,
        location: location.to_owned(),
        members: members.iter().map(|m| (*m).to_owned()).collect(),
    }
    .into()
}

pub fn departed(day: u32, location: &str, members: &[&str]) -> QuestEvent {
    MembersDeparted {
        day,
        location: location.to_owned(),
        members: members.iter().map(|m| (*m).to_owned()).collect(),
    }
    .into()
}

pub fn slayed(name: &str) -> QuestEvent {
    MonsterSlayed {
        name: name.to_owned(),
    }
    .into()
}

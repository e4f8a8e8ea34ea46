//! Integration tests for inline projections.

mod common;

use chronicle::{Error, StreamId, StreamIdentity};
use common::{MonsterTally, QuestParty, departed, joined, slayed, started, store};

#[tokio::test]
async fn snapshot_tracks_stream_version() {
    let store = store(StreamIdentity::AsString);
    let session = store.session();
    let id = StreamId::from("fellowship");

    session
        .start_stream(
            Some(id.clone()),
            [started("Ring"), joined(1, "Shire", &["Frodo", "Sam"])],
        )
        .await
        .unwrap();
    let snapshot = store
        .load_aggregate::<QuestParty>(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.stream_id, id);

    session
        .append(
            &id,
            Some(2),
            [
                joined(3, "Bree", &["Aragorn"]),
                departed(9, "Amon Hen", &["Sam"]),
            ],
        )
        .await
        .unwrap();

    let state = store.fetch_stream_state(&id).await.unwrap().unwrap();
    let snapshot = store
        .load_aggregate::<QuestParty>(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.aggregate_type.as_deref(), Some("quest_party"));
    assert_eq!(snapshot.version, state.version);
    assert_eq!(snapshot.version, 4);
    assert_eq!(
        snapshot.state,
        QuestParty {
            name: Some("Ring".to_owned()),
            members: vec!["Frodo".to_owned(), "Aragorn".to_owned()],
        }
    );
}

#[tokio::test]
async fn snapshot_matches_live_fold() {
    let store = store(StreamIdentity::AsUuid);
    let session = store.session();
    let handle = session
        .start_stream(None, [started("Ring"), joined(1, "Shire", &["Frodo"])])
        .await
        .unwrap();
    for day in 2..6 {
        let walker = format!("walker-{day}");
        session
            .append(&handle.id, None, [joined(day, "Road", &[walker.as_str()])])
            .await
            .unwrap();
    }

    let live = store
        .aggregate_stream::<QuestParty>(&handle.id)
        .await
        .unwrap();
    let snapshot = store
        .load_aggregate::<QuestParty>(&handle.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, live);
    assert_eq!(live.members.len(), 5);
}

#[tokio::test]
async fn rejected_append_leaves_snapshot_untouched() {
    let store = store(StreamIdentity::AsString);
    let session = store.session();
    let id = StreamId::from("fellowship");
    session
        .start_stream(Some(id.clone()), [started("Ring"), joined(1, "Shire", &["Frodo"])])
        .await
        .unwrap();

    let error = session
        .append(&id, Some(1), [joined(2, "Bree", &["Aragorn"])])
        .await
        .unwrap_err();
    assert!(error.is_conflict());

    let snapshot = store
        .load_aggregate::<QuestParty>(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.state.members, vec!["Frodo".to_owned()]);
}

#[tokio::test]
async fn explicit_aggregate_projects_stream_without_starter() {
    let store = store(StreamIdentity::AsString);
    let session = store.session();
    let id = StreamId::from("hunt");

    session
        .start_stream_for::<MonsterTally>(Some(id.clone()), [slayed("Balrog")])
        .await
        .unwrap();
    session
        .append(&id, Some(1), [slayed("Cave troll"), joined(4, "Moria", &["Gimli"])])
        .await
        .unwrap();

    let state = store.fetch_stream_state(&id).await.unwrap().unwrap();
    assert_eq!(state.aggregate_type.as_deref(), Some("monster_tally"));
    let snapshot = store
        .load_aggregate::<MonsterTally>(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 3);
    assert_eq!(snapshot.state.slain, vec!["Balrog", "Cave troll"]);
}

#[tokio::test]
async fn untagged_stream_has_no_snapshot() {
    let store = store(StreamIdentity::AsString);
    let session = store.session();
    let id = StreamId::from("wanderings");

    session
        .start_stream(Some(id.clone()), [joined(1, "Shire", &["Bilbo"])])
        .await
        .unwrap();
    session
        .append(&id, Some(1), [departed(2, "Shire", &["Bilbo"])])
        .await
        .unwrap();

    let state = store.fetch_stream_state(&id).await.unwrap().unwrap();
    assert_eq!(state.aggregate_type, None);
    assert_eq!(state.version, 2);
    assert!(
        store
            .load_aggregate::<QuestParty>(&id)
            .await
            .unwrap()
            .is_none()
    );

    let live = store.aggregate_stream::<QuestParty>(&id).await.unwrap();
    assert!(live.members.is_empty());
}

#[tokio::test]
async fn loading_as_other_aggregate_fails() {
    let store = store(StreamIdentity::AsString);
    let id = StreamId::from("fellowship");
    store
        .session()
        .start_stream(Some(id.clone()), [started("Ring")])
        .await
        .unwrap();

    let error = store.load_aggregate::<MonsterTally>(&id).await.unwrap_err();
    assert!(matches!(
        error,
        Error::AggregateTypeMismatch { ref stream_id, expected: "monster_tally", ref found }
            if *stream_id == id && found == "quest_party"
    ));
}

#[tokio::test]
async fn live_fold_of_missing_stream_fails() {
    let store = store(StreamIdentity::AsString);
    let id = StreamId::from("nowhere");

    let error = store.aggregate_stream::<QuestParty>(&id).await.unwrap_err();
    assert!(matches!(error, Error::StreamNotFound(ref missing) if *missing == id));
    assert!(
        store
            .load_aggregate::<QuestParty>(&id)
            .await
            .unwrap()
            .is_none()
    );
}

mod unregistered {
    use chronicle::{
        Aggregate, Error, MetadataDefaults, Store, StoreOptions, StreamIdentity,
        storage::inmemory,
    };
    use serde::{Deserialize, Serialize};

    use super::common::{QuestEvent, QuestParty, slayed};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct DragonHoard {
        gold: u64,
    }

    impl Aggregate<QuestEvent> for DragonHoard {
        const KIND: &'static str = "dragon_hoard";

        fn apply(&mut self, _event: &QuestEvent) {
            self.gold += 1;
        }
    }

    #[tokio::test]
    async fn start_for_unregistered_aggregate_fails_before_writing() {
        let options = StoreOptions::<QuestEvent>::builder()
            .identity(StreamIdentity::AsString)
            .event_types_from_set()
            .unwrap()
            .inline_projection::<QuestParty>()
            .unwrap()
            .metadata(MetadataDefaults::new())
            .build();
        let store = Store::new(inmemory::Store::new(), options);

        let error = store
            .session()
            .start_stream_for::<DragonHoard>(Some("smaug".into()), [slayed("Smaug")])
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::NoFoldFunctionRegistered { ref aggregate } if aggregate == "dragon_hoard"
        ));
        assert!(
            store
                .fetch_stream_state(&"smaug".into())
                .await
                .unwrap()
                .is_none()
        );
    }
}

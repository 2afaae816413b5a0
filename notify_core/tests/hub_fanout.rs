use std::collections::{BTreeMap, BTreeSet};

use notify_core::{Client, ClientId, ClientMailbox, EventType, Hub, HubStats, Notification, OUTBOUND_CAPACITY};

fn progress(user: &str, text: &str) -> Notification {
    Notification::new(user, EventType::Progress, "transcoder", text).with_video_id("vid-1")
}

fn drain(mailbox: &mut ClientMailbox) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(n) = mailbox.try_recv() {
        out.push(n.description().to_string());
    }
    out
}

#[tokio::test]
async fn clients_of_other_users_never_receive() {
    let (hub, _task) = Hub::spawn();
    let (alice, mut alice_box) = Client::new("alice", OUTBOUND_CAPACITY);
    let (bob, mut bob_box) = Client::new("bob", OUTBOUND_CAPACITY);
    hub.register(alice).unwrap();
    hub.register(bob).unwrap();

    hub.publish(progress("alice", "for alice")).await.unwrap();

    assert_eq!(drain(&mut alice_box), vec!["for alice"]);
    assert!(drain(&mut bob_box).is_empty());
}

#[tokio::test]
async fn every_connection_of_a_user_gets_one_copy_in_publish_order() {
    let (hub, _task) = Hub::spawn();
    let mut boxes = Vec::new();
    for _ in 0..3 {
        let (client, mailbox) = Client::new("carol", OUTBOUND_CAPACITY);
        hub.register(client).unwrap();
        boxes.push(mailbox);
    }

    for i in 0..5 {
        let report = hub.publish(progress("carol", &format!("step {i}"))).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.evicted, 0);
    }

    let expected: Vec<String> = (0..5).map(|i| format!("step {i}")).collect();
    for mailbox in &mut boxes {
        assert_eq!(drain(mailbox), expected);
    }
}

#[tokio::test]
async fn notifications_after_unregister_are_not_delivered() {
    let (hub, _task) = Hub::spawn();
    let (client, mut mailbox) = Client::new("dan", OUTBOUND_CAPACITY);
    let key = client.key().clone();
    hub.register(client).unwrap();

    hub.publish(progress("dan", "before")).await.unwrap();
    hub.unregister(&key).unwrap();
    let report = hub.publish(progress("dan", "after")).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(drain(&mut mailbox), vec!["before"]);
    assert!(mailbox.is_closed());
}

#[tokio::test]
async fn full_outbound_queue_evicts_only_the_slow_client() {
    let (hub, _task) = Hub::spawn();
    let (slow, slow_box) = Client::new("erin", OUTBOUND_CAPACITY);
    let (fast, mut fast_box) = Client::new("erin", OUTBOUND_CAPACITY);
    let (other_user, mut other_box) = Client::new("frank", OUTBOUND_CAPACITY);
    hub.register(slow).unwrap();
    hub.register(fast).unwrap();
    hub.register(other_user).unwrap();

    for i in 0..OUTBOUND_CAPACITY {
        let report = hub.publish(progress("erin", &format!("n{i}"))).await.unwrap();
        assert_eq!(report.delivered, 2);
        fast_box.try_recv().unwrap();
    }
    assert_eq!(slow_box.pending(), OUTBOUND_CAPACITY);

    let report = hub.publish(progress("erin", "overflow")).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.evicted, 1);

    assert!(slow_box.is_closed());
    assert!(!fast_box.is_closed());
    assert_eq!(drain(&mut fast_box), vec!["overflow"]);
    assert!(drain(&mut other_box).is_empty());
    assert_eq!(hub.stats().await.unwrap(), HubStats { users: 2, clients: 2 });

    // The hub loop is still serving after the eviction.
    let report = hub.publish(progress("erin", "later")).await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn hundred_clients_across_ten_users_get_exactly_their_user_events() {
    let (hub, _task) = Hub::spawn();
    let mut registered: BTreeMap<String, BTreeSet<ClientId>> = BTreeMap::new();
    let mut mailboxes = Vec::new();

    for i in 0..100 {
        let user = format!("user-{}", i % 10);
        let (client, mailbox) = Client::new(user.clone(), OUTBOUND_CAPACITY);
        registered.entry(user).or_default().insert(client.id());
        hub.register(client).unwrap();
        mailboxes.push(mailbox);
    }

    for user in registered.keys() {
        let report = hub.publish(progress(user, user)).await.unwrap();
        assert_eq!(report.delivered, 10);
    }

    let mut received: BTreeMap<String, BTreeSet<ClientId>> = BTreeMap::new();
    for mailbox in &mut mailboxes {
        let got = drain(mailbox);
        assert_eq!(got.len(), 1, "each client gets exactly one event");
        assert_eq!(got[0], mailbox.key().user_id(), "no cross-user leakage");
        received
            .entry(got[0].clone())
            .or_default()
            .insert(mailbox.key().id());
    }
    assert_eq!(received, registered);
}

#[tokio::test]
async fn concurrent_unregisters_tear_down_once() {
    let (hub, _task) = Hub::spawn();
    let (client, mailbox) = Client::new("gina", OUTBOUND_CAPACITY);
    let key = client.key().clone();
    hub.register(client).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let hub = hub.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move { hub.unregister(&key) }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(hub.stats().await.unwrap(), HubStats::default());
    assert!(mailbox.is_closed());
}

#[tokio::test]
async fn register_racing_publish_from_another_task_is_visible_once_awaited() {
    let (hub, _task) = Hub::spawn();
    let (client, mut mailbox) = Client::new("hank", OUTBOUND_CAPACITY);

    let registrar = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.register(client) })
    };
    registrar.await.unwrap().unwrap();

    let report = hub.publish(progress("hank", "seen")).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(drain(&mut mailbox), vec!["seen"]);
}

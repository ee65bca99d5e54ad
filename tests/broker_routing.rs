use std::sync::Arc;

use dslink_broker::Broker;
use dslink_broker::client::{ChannelClient, Client, Outbound};
use dslink_broker::config::BrokerConfig;
use dslink_broker::error::BrokerError;
use dslink_broker::logger::{LogLevel, Logger, MemoryLogger};
use dslink_broker::node::ListReply;
use dslink_broker::stream::StreamHandle;
use link_protocol::{Envelope, Handshake, Method, Request, Response, SUBSCRIPTION_RID, StreamState, SubscribePath};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

type Rx = UnboundedReceiver<Outbound>;

fn broker() -> (Broker, MemoryLogger) {
    let memory = MemoryLogger::new();
    let broker = Broker::new(BrokerConfig::default(), Logger(Box::new(memory.clone()))).unwrap();
    (broker, memory)
}

fn responder_link(ds_id: &str) -> (Arc<ChannelClient>, Rx) {
    ChannelClient::new(Handshake::new(ds_id, false, true))
}

fn requester_link(ds_id: &str) -> (Arc<ChannelClient>, Rx) {
    ChannelClient::new(Handshake::new(ds_id, true, false))
}

fn requests(rx: &mut Rx) -> Vec<Request> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Requests(batch) = msg {
            out.extend(batch);
        }
    }
    out
}

fn responses(rx: &mut Rx) -> Vec<Response> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Responses(batch) = msg {
            out.extend(batch);
        }
    }
    out
}

fn updates(rx: &mut Rx) -> Vec<Value> {
    responses(rx)
        .into_iter()
        .filter(|r| r.rid == SUBSCRIPTION_RID)
        .flat_map(|r| r.updates.unwrap_or_default())
        .collect()
}

fn as_dyn(client: &Arc<ChannelClient>) -> Arc<dyn Client> {
    client.clone()
}

fn send_responses(broker: &Broker, link: &Arc<ChannelClient>, responses: Vec<Response>) {
    let envelope = Envelope {
        responses,
        ..Envelope::default()
    };
    broker.handle_message(&as_dyn(link), envelope);
}

fn send_requests(broker: &Broker, link: &Arc<ChannelClient>, requests: Vec<Request>) {
    let envelope = Envelope {
        requests,
        ..Envelope::default()
    };
    broker.handle_message(&as_dyn(link), envelope);
}

fn key_hash(c: char) -> String {
    std::iter::repeat_n(c, 43).collect()
}

#[tokio::test]
async fn fan_out_follows_the_current_subscriber_set() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();

    let (b, mut b_rx) = ChannelClient::requester("b");
    let (c, mut c_rx) = ChannelClient::requester("c");
    let (d, mut d_rx) = ChannelClient::requester("d");
    let path = "/downstream/linkA/sensor";
    let hb = broker.subscribe(path, b.clone(), 11).unwrap().unwrap();
    let hc = broker.subscribe(path, c.clone(), 22).unwrap().unwrap();
    let hd = broker.subscribe(path, d.clone(), 33).unwrap().unwrap();

    let sent = requests(&mut link_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Subscribe);
    assert_eq!(sent[0].paths.len(), 1);
    assert_eq!(sent[0].paths[0].path, "/sensor");
    let upstream = sent[0].paths[0].sid;

    let ts = "2024-05-01T12:00:00.000Z";
    send_responses(&broker, &link, vec![Response::subscription_updates(vec![json!([upstream, 42, ts])])]);
    assert_eq!(updates(&mut b_rx), vec![json!([11, 42, ts])]);
    assert_eq!(updates(&mut c_rx), vec![json!([22, 42, ts])]);
    assert_eq!(updates(&mut d_rx), vec![json!([33, 42, ts])]);

    broker.unsubscribe(&hd, d.id());
    assert!(requests(&mut link_rx).is_empty());

    send_responses(&broker, &link, vec![Response::subscription_updates(vec![json!([upstream, 43, ts])])]);
    assert_eq!(updates(&mut b_rx), vec![json!([11, 43, ts])]);
    assert_eq!(updates(&mut c_rx), vec![json!([22, 43, ts])]);
    assert!(updates(&mut d_rx).is_empty());

    broker.unsubscribe(&hb, b.id());
    assert!(requests(&mut link_rx).is_empty());
    broker.unsubscribe(&hc, c.id());
    let sent = requests(&mut link_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Unsubscribe);
    assert_eq!(sent[0].sids, vec![upstream]);
}

#[tokio::test]
async fn unsubscribing_a_stranger_is_a_no_op() {
    let (broker, memory) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();

    let (b, _b_rx) = ChannelClient::requester("b");
    let (stranger, _s_rx) = ChannelClient::requester("s");
    let handle = broker.subscribe("/downstream/linkA/sensor", b.clone(), 1).unwrap().unwrap();
    requests(&mut link_rx);

    broker.unsubscribe(&handle, stranger.id());
    broker.unsubscribe(&handle, stranger.id());
    assert!(requests(&mut link_rx).is_empty());
    assert_eq!(memory.count(LogLevel::Error), 0);

    let stats = broker.tree().link("linkA").unwrap();
    let stats = stats.as_link().unwrap().processor().responder().stats();
    assert_eq!(stats.subscriptions, 1);
}

#[tokio::test]
async fn invoke_round_trips_to_the_callers_rid() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();

    let (a, mut a_rx) = ChannelClient::requester("a");
    let (other, mut other_rx) = ChannelClient::requester("other");
    let mut params = serde_json::Map::new();
    params.insert("speed".into(), json!(3));

    let mine = broker
        .invoke("/downstream/linkA/motor/start", a.clone(), 7, Some(params), Some("write".into()))
        .unwrap()
        .unwrap();
    broker
        .invoke("/downstream/linkA/motor/start", other.clone(), 7, None, None)
        .unwrap();
    broker
        .invoke("/downstream/linkA/motor/stop", a.clone(), 8, None, None)
        .unwrap();

    let sent = requests(&mut link_rx);
    assert_eq!(sent.len(), 3);
    let rids: std::collections::HashSet<_> = sent.iter().map(|r| r.rid).collect();
    assert_eq!(rids.len(), 3);
    assert!(!rids.contains(&0));
    let first = sent.iter().find(|r| r.rid == mine.upstream).unwrap();
    assert_eq!(first.method, Method::Invoke);
    assert_eq!(first.path.as_deref(), Some("/motor/start"));
    assert_eq!(first.params.as_ref().unwrap()["speed"], json!(3));
    assert_eq!(first.permit.as_deref(), Some("write"));

    let terminal = Response::closed(mine.upstream).with_updates(vec![json!(["started"])]);
    send_responses(&broker, &link, vec![terminal]);

    let got = responses(&mut a_rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].rid, 7);
    assert_eq!(got[0].stream, Some(StreamState::Closed));
    assert_eq!(got[0].updates, Some(vec![json!(["started"])]));
    assert!(responses(&mut other_rx).is_empty());
}

#[tokio::test]
async fn set_and_remove_carry_their_fields() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();
    let (a, mut a_rx) = ChannelClient::requester("a");

    let set = broker
        .set("/downstream/linkA/setpoint", a.clone(), 1, json!(21.5), None)
        .unwrap()
        .unwrap();
    let remove = broker
        .remove("/downstream/linkA/old", a.clone(), 2, Some("config".into()))
        .unwrap()
        .unwrap();

    let sent = requests(&mut link_rx);
    assert_eq!(sent[0], Request::set(set.upstream, "/setpoint", json!(21.5)));
    assert_eq!(
        sent[1],
        Request::remove(remove.upstream, "/old").with_permit(Some("config".into()))
    );

    send_responses(&broker, &link, vec![Response::closed(remove.upstream), Response::closed(set.upstream)]);
    let rids: Vec<_> = responses(&mut a_rx).iter().map(|r| r.rid).collect();
    assert_eq!(rids, vec![2, 1]);
}

#[tokio::test]
async fn disconnect_purges_calls_and_resubscribes_once() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();

    let (a, mut a_rx) = ChannelClient::requester("a");
    broker.invoke("/downstream/linkA/slow", a.clone(), 5, None, None).unwrap();
    let sub = broker
        .subscribe("/downstream/linkA/sensor", a.clone(), 9)
        .unwrap()
        .unwrap();
    requests(&mut link_rx);

    broker.disconnect(link.id());
    let got = responses(&mut a_rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].rid, 5);
    assert_eq!(got[0].stream, Some(StreamState::Closed));
    assert_eq!(got[0].error.as_ref().unwrap().kind, "disconnected");

    let node = broker.tree().link("linkA").unwrap();
    let stats = node.as_link().unwrap().processor().responder().stats();
    assert_eq!((stats.generic, stats.subscriptions), (0, 1));

    assert_eq!(
        broker.invoke("/downstream/linkA/slow", a.clone(), 6, None, None),
        Err(BrokerError::LinkDisconnected("linkA".into()))
    );

    let (again, mut again_rx) = responder_link("linkA");
    broker.connect(again.clone()).unwrap();
    let sent = requests(&mut again_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Subscribe);
    assert_eq!(sent[0].paths, vec![SubscribePath::new("/sensor", sub.upstream)]);

    send_responses(&broker, &again, vec![Response::subscription_updates(vec![json!([sub.upstream, 1, "t"])])]);
    assert_eq!(updates(&mut a_rx), vec![json!([9, 1, "t"])]);
}

#[tokio::test]
async fn link_root_shows_disconnected_ts_only_while_detached() {
    let (broker, _) = broker();
    let (link, _link_rx) = ChannelClient::new(Handshake::new("linkA", false, true).with_link_data(json!({"site": "north"})));
    broker.connect(link.clone()).unwrap();
    let (a, _a_rx) = ChannelClient::requester("a");

    let has = |reply: ListReply, key: &str| match reply {
        ListReply::Snapshot(rsp) => rsp.updates.unwrap().iter().any(|u| u[0] == key),
        ListReply::Pending(_) => panic!("link root is answered locally"),
    };

    assert!(!has(broker.list("/downstream/linkA", a.clone(), 1).unwrap(), "disconnectedTs"));
    broker.disconnect(link.id());
    let reply = broker.list("/downstream/linkA", a.clone(), 2).unwrap();
    assert!(has(reply.clone(), "disconnectedTs"));
    assert!(has(reply, "$linkData"));

    let (again, _again_rx) = responder_link("linkA");
    broker.connect(again).unwrap();
    assert!(!has(broker.list("/downstream/linkA", a.clone(), 3).unwrap(), "disconnectedTs"));

    match broker.list("/downstream", a, 4).unwrap() {
        ListReply::Snapshot(rsp) => {
            let updates = rsp.updates.unwrap();
            assert!(updates.contains(&json!(["linkA", {"$is": "dsa/link"}])));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn identity_is_reserved_by_the_first_handshake() {
    let (broker, memory) = broker();
    let (first, _r1) = responder_link(&format!("linkA-{}", key_hash('a')));
    let node = broker.connect(first.clone()).unwrap();
    assert_eq!(node.path(), "/downstream/linkA");

    let (imposter, _r2) = responder_link(&format!("linkA-{}", key_hash('b')));
    assert!(matches!(
        broker.connect(imposter.clone()),
        Err(BrokerError::IdentityMismatch { .. })
    ));
    assert_eq!(node.as_link().unwrap().client(), Some(first.id()));

    broker.disconnect(first.id());
    assert!(matches!(
        broker.connect(imposter),
        Err(BrokerError::IdentityMismatch { .. })
    ));
    assert!(!node.as_link().unwrap().is_connected());
    assert!(memory.count(LogLevel::Warn) >= 2);
}

#[tokio::test]
async fn second_live_connection_is_rejected() {
    let (broker, _) = broker();
    let (first, mut first_rx) = responder_link("linkA");
    broker.connect(first.clone()).unwrap();
    let (a, _a_rx) = ChannelClient::requester("a");
    broker.subscribe("/downstream/linkA/x", a, 1).unwrap();
    requests(&mut first_rx);

    let (second, mut second_rx) = responder_link("linkA");
    assert!(matches!(
        broker.connect(second.clone()),
        Err(BrokerError::ProtocolViolation(_))
    ));
    assert!(requests(&mut second_rx).is_empty());

    // the rejected session's disconnect must not detach the good one
    broker.disconnect(second.id());
    let node = broker.tree().link("linkA").unwrap();
    assert_eq!(node.as_link().unwrap().client(), Some(first.id()));
}

#[tokio::test]
async fn stale_responses_are_dropped_with_a_warning() {
    let (broker, memory) = broker();
    let (link, _link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();

    send_responses(&broker, &link, vec![Response::closed(999)]);
    assert_eq!(memory.count(LogLevel::Warn), 1);

    broker.disconnect(link.id());
    send_responses(&broker, &link, vec![Response::closed(1)]);
    assert_eq!(memory.count(LogLevel::Warn), 2);
}

#[tokio::test]
async fn remote_list_shares_one_upstream_stream() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();
    let (a, mut a_rx) = ChannelClient::requester("a");
    let (b, mut b_rx) = ChannelClient::requester("b");

    let ha = match broker.list("/downstream/linkA/sensor", a.clone(), 4).unwrap() {
        ListReply::Pending(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    let sent = requests(&mut link_rx);
    assert_eq!(sent, vec![Request::list(ha.upstream, "/sensor")]);

    send_responses(
        &broker,
        &link,
        vec![Response::open(ha.upstream, vec![json!(["$is", "node"]), json!(["$type", "number"])])],
    );
    assert_eq!(responses(&mut a_rx)[0].rid, 4);

    let hb = match broker.list("/downstream/linkA/sensor", b.clone(), 1).unwrap() {
        ListReply::Pending(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(hb, ha);
    assert!(requests(&mut link_rx).is_empty());
    let joined = responses(&mut b_rx);
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].updates.as_ref().unwrap().len(), 2);

    broker.close(&ha, a.id());
    assert!(requests(&mut link_rx).is_empty());
    broker.close(&hb, b.id());
    assert_eq!(requests(&mut link_rx), vec![Request::close(ha.upstream)]);
}

#[tokio::test]
async fn links_can_act_as_requesters() {
    let (broker, _) = broker();
    let (responder, mut responder_rx) = responder_link("linkA");
    let (requester, mut requester_rx) = requester_link("linkB");
    broker.connect(responder.clone()).unwrap();
    let b_node = broker.connect(requester.clone()).unwrap();
    assert!(!b_node.is_accessible());

    send_requests(
        &broker,
        &requester,
        vec![Request::subscribe(1, vec![SubscribePath::new("/downstream/linkA/sensor", 10)])],
    );
    assert_eq!(responses(&mut requester_rx), vec![Response::closed(1)]);
    let upstream = requests(&mut responder_rx)[0].paths[0].sid;

    send_responses(&broker, &responder, vec![Response::subscription_updates(vec![json!([upstream, 7, "t"])])]);
    assert_eq!(updates(&mut requester_rx), vec![json!([10, 7, "t"])]);

    send_requests(&broker, &requester, vec![Request::unsubscribe(2, vec![10])]);
    assert_eq!(responses(&mut requester_rx), vec![Response::closed(2)]);
    let sent = requests(&mut responder_rx);
    assert_eq!(sent[0].method, Method::Unsubscribe);

    send_requests(&broker, &requester, vec![Request::invoke(3, "/downstream/linkA/reset", None)]);
    let invoke = requests(&mut responder_rx).remove(0);
    assert_eq!(invoke.path.as_deref(), Some("/reset"));
    send_responses(&broker, &responder, vec![Response::closed(invoke.rid)]);
    assert_eq!(responses(&mut requester_rx), vec![Response::closed(3)]);

    // requester-only links cannot be addressed
    send_requests(&broker, &requester, vec![Request::invoke(4, "/downstream/linkB/x", None)]);
    let got = responses(&mut requester_rx);
    assert_eq!(got[0].rid, 4);
    assert_eq!(got[0].error.as_ref().unwrap().kind, "invalidPath");

    send_requests(&broker, &requester, vec![Request::set(5, "/", json!(1))]);
    let got = responses(&mut requester_rx);
    assert_eq!(got[0].error.as_ref().unwrap().kind, "notImplemented");

    send_requests(&broker, &requester, vec![Request::list(6, "relative")]);
    let got = responses(&mut requester_rx);
    assert_eq!(got[0].error.as_ref().unwrap().kind, "invalidPath");
}

#[tokio::test]
async fn responder_only_links_may_not_send_requests() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();
    send_requests(&broker, &link, vec![Request::list(1, "/")]);
    let got = responses(&mut link_rx);
    assert_eq!(got[0].rid, 1);
    assert_eq!(got[0].error.as_ref().unwrap().kind, "invalidRequest");
}

#[tokio::test]
async fn requester_disconnect_releases_its_streams() {
    let (broker, _) = broker();
    let (responder, mut responder_rx) = responder_link("linkA");
    let (requester, _requester_rx) = requester_link("linkB");
    broker.connect(responder.clone()).unwrap();
    broker.connect(requester.clone()).unwrap();

    send_requests(
        &broker,
        &requester,
        vec![
            Request::subscribe(1, vec![SubscribePath::new("/downstream/linkA/sensor", 10)]),
            Request::list(2, "/downstream/linkA/sensor"),
        ],
    );
    let sent = requests(&mut responder_rx);
    assert_eq!(sent.len(), 2);
    let list_rid = sent.iter().find(|r| r.method == Method::List).unwrap().rid;

    broker.disconnect(requester.id());
    let sent = requests(&mut responder_rx);
    let methods: Vec<_> = sent.iter().map(|r| r.method).collect();
    assert!(methods.contains(&Method::Unsubscribe));
    assert!(sent.contains(&Request::close(list_rid)));

    let stats = broker.tree().link("linkA").unwrap();
    let stats = stats.as_link().unwrap().processor().responder().stats();
    assert_eq!((stats.subscriptions, stats.lists), (0, 0));
}

#[tokio::test]
async fn removed_links_close_their_streams() {
    let (broker, _) = broker();
    let (link, _link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();
    let (a, mut a_rx) = ChannelClient::requester("a");
    broker.list("/downstream/linkA/x", a.clone(), 3).unwrap();
    broker.subscribe("/downstream/linkA/y", a.clone(), 4).unwrap();
    broker.invoke("/downstream/linkA/z", a.clone(), 5, None, None).unwrap();

    broker.remove_link("linkA").unwrap();
    let got = responses(&mut a_rx);
    let rids: std::collections::HashSet<_> = got.iter().map(|r| r.rid).collect();
    assert_eq!(rids, [3, 5].into_iter().collect());
    assert!(got.iter().all(|r| r.is_closed()));

    assert!(broker.tree().link("linkA").is_none());
    assert!(matches!(
        broker.subscribe("/downstream/linkA/y", a, 6),
        Err(BrokerError::NodeNotFound(_))
    ));
    assert!(broker.remove_link("linkA").is_err());
}

fn tracked_by(broker: &Broker, name: &str) -> usize {
    let node = broker.tree().link(name).unwrap();
    node.as_link().unwrap().processor().requester().tracked()
}

#[tokio::test]
async fn removing_a_requester_link_releases_its_subscriptions() {
    let (broker, _) = broker();
    let (responder, mut responder_rx) = responder_link("linkA");
    let (requester, mut requester_rx) = requester_link("linkB");
    broker.connect(responder.clone()).unwrap();
    broker.connect(requester.clone()).unwrap();

    send_requests(
        &broker,
        &requester,
        vec![Request::subscribe(1, vec![SubscribePath::new("/downstream/linkA/sensor", 10)])],
    );
    let upstream = requests(&mut responder_rx)[0].paths[0].sid;
    responses(&mut requester_rx);

    broker.remove_link("linkB").unwrap();
    let sent = requests(&mut responder_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Unsubscribe);
    assert_eq!(sent[0].sids, vec![upstream]);

    let node = broker.tree().link("linkA").unwrap();
    assert_eq!(node.as_link().unwrap().processor().responder().stats().subscriptions, 0);

    // the transport's own hang-up arrives later and finds nothing left
    broker.disconnect(requester.id());
    send_responses(&broker, &responder, vec![Response::subscription_updates(vec![json!([upstream, 42, "t"])])]);
    assert!(updates(&mut requester_rx).is_empty());
}

#[tokio::test]
async fn completed_calls_are_no_longer_tracked() {
    let (broker, _) = broker();
    let (responder, mut responder_rx) = responder_link("linkA");
    let (requester, mut requester_rx) = requester_link("linkB");
    broker.connect(responder.clone()).unwrap();
    broker.connect(requester.clone()).unwrap();

    for rid in 1..=50 {
        send_requests(&broker, &requester, vec![Request::invoke(rid, "/downstream/linkA/ping", None)]);
        let upstream = requests(&mut responder_rx)[0].rid;
        send_responses(&broker, &responder, vec![Response::closed(upstream)]);
    }
    assert_eq!(responses(&mut requester_rx).len(), 50);
    assert_eq!(tracked_by(&broker, "linkB"), 0);

    // an open stream stays tracked until its terminal response
    send_requests(&broker, &requester, vec![Request::invoke(60, "/downstream/linkA/feed", None)]);
    let upstream = requests(&mut responder_rx)[0].rid;
    send_responses(&broker, &responder, vec![Response::open(upstream, vec![json!([1])])]);
    assert_eq!(tracked_by(&broker, "linkB"), 1);

    broker.disconnect(responder.id());
    assert_eq!(tracked_by(&broker, "linkB"), 0);
    assert_eq!(responses(&mut requester_rx).len(), 2);
}

#[tokio::test]
async fn set_without_a_value_is_rejected() {
    let (broker, _) = broker();
    let (responder, mut responder_rx) = responder_link("linkA");
    let (requester, mut requester_rx) = requester_link("linkB");
    broker.connect(responder.clone()).unwrap();
    broker.connect(requester.clone()).unwrap();

    let missing: Envelope = serde_json::from_value(json!({
        "requests": [{"rid": 3, "method": "set", "path": "/downstream/linkA/x"}]
    }))
    .unwrap();
    broker.handle_message(&as_dyn(&requester), missing);
    let got = responses(&mut requester_rx);
    assert_eq!(got[0].rid, 3);
    assert_eq!(got[0].error.as_ref().unwrap().kind, "invalidRequest");
    assert!(requests(&mut responder_rx).is_empty());

    let null: Envelope = serde_json::from_value(json!({
        "requests": [{"rid": 4, "method": "set", "path": "/downstream/linkA/x", "value": null}]
    }))
    .unwrap();
    broker.handle_message(&as_dyn(&requester), null);
    let sent = requests(&mut responder_rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, Some(Value::Null));
    assert!(responses(&mut requester_rx).is_empty());
}

#[tokio::test]
async fn unsubscribe_ignores_other_stream_kinds() {
    let (broker, _) = broker();
    let (link, mut link_rx) = responder_link("linkA");
    broker.connect(link.clone()).unwrap();
    let (a, _a_rx) = ChannelClient::requester("a");

    let sub = broker
        .subscribe("/downstream/linkA/sensor", a.clone(), 1)
        .unwrap()
        .unwrap();
    requests(&mut link_rx);

    let list_like = StreamHandle::new("linkA", "/sensor", Method::List, sub.upstream);
    broker.unsubscribe(&list_like, a.id());
    assert!(requests(&mut link_rx).is_empty());
    let node = broker.tree().link("linkA").unwrap();
    assert_eq!(node.as_link().unwrap().processor().responder().stats().subscriptions, 1);

    broker.unsubscribe(&sub, a.id());
    assert_eq!(requests(&mut link_rx)[0].method, Method::Unsubscribe);
}

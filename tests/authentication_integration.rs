//! Integration tests for the authenticated node-facing API.
//!
//! Tests:
//! - Bootstrap: CreateNode returns the broker's public key
//! - Unknown public key: rejected, nothing stored
//! - Bad HMAC: rejected, nothing delivered
//! - Full node session: pull an instruction, push its result

use std::collections::HashSet;
use std::sync::Arc;

use fleetbroker::client::ClientAuth;
use fleetbroker::server::{AuthenticationInterceptor, Broker, FleetServicer, UnaryService, ACCESS_DENIED};
use fleetbroker::shared::crypto::{self, KeyPair};
use fleetbroker::state::{InMemoryState, State};
use fleetbroker::types::{
    CreateNodeRequest, CreateNodeResponse, DeleteNodeRequest, Metadata, Node, PullTaskInsRequest,
    PullTaskInsResponse, PushTaskResRequest, PushTaskResResponse, Request, RpcRequest, Task,
    TaskIns, TaskRes, AUTH_TOKEN_HEADER, PUBLIC_KEY_HEADER,
};
use fleetbroker::{Code, Status};
use pretty_assertions::assert_eq;

struct Harness {
    broker: Broker,
    fleet: AuthenticationInterceptor<FleetServicer>,
    node_keys: KeyPair,
}

async fn harness() -> Harness {
    let broker = Broker::new(Arc::new(InMemoryState::in_memory()));
    let node_keys = KeyPair::generate();
    let fleet = broker
        .authenticated_fleet_servicer(KeyPair::generate(), &HashSet::from([node_keys.public_bytes()]))
        .await
        .unwrap();
    Harness {
        broker,
        fleet,
        node_keys,
    }
}

fn with_public_key<T: Into<RpcRequest>>(message: T, keys: &KeyPair) -> Request<RpcRequest> {
    let mut request = Request::new(message.into());
    request
        .metadata_mut()
        .insert(PUBLIC_KEY_HEADER, crypto::encode_base64(&keys.public_bytes()));
    request
}

/// Runs the CreateNode bootstrap and returns the node plus its signer.
async fn bootstrap(h: &Harness) -> (Node, ClientAuth) {
    let response = h
        .fleet
        .call(with_public_key(CreateNodeRequest {}, &h.node_keys))
        .await
        .unwrap();
    let (metadata, message) = response.into_parts();
    let node = CreateNodeResponse::try_from(message).unwrap().node;
    let auth = ClientAuth::from_response_metadata(h.node_keys.clone(), &metadata).unwrap();
    (node, auth)
}

#[tokio::test]
async fn bootstrap_reveals_the_broker_key() {
    let h = harness().await;
    let response = h
        .fleet
        .call(with_public_key(CreateNodeRequest {}, &h.node_keys))
        .await
        .unwrap();

    let advertised = response.metadata().get(PUBLIC_KEY_HEADER).unwrap();
    assert_eq!(
        crypto::decode_base64(advertised).unwrap(),
        h.fleet.key_pair().public_bytes()
    );
}

#[tokio::test]
async fn unknown_public_key_is_rejected_without_side_effects() {
    let h = harness().await;
    let stranger = KeyPair::generate();

    let err = h
        .fleet
        .call(with_public_key(CreateNodeRequest {}, &stranger))
        .await
        .unwrap_err();

    assert_eq!(err, Status::unauthenticated(ACCESS_DENIED));
    assert!(h.broker.state().get_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_hmac_is_rejected() {
    let h = harness().await;
    let (node, _) = bootstrap(&h).await;
    h.broker
        .state()
        .store_task_ins(TaskIns::new(1, Task::new(node)))
        .await
        .unwrap();

    let mut request = with_public_key(
        PullTaskInsRequest {
            node,
            task_ids: Vec::new(),
        },
        &h.node_keys,
    );
    request
        .metadata_mut()
        .insert(AUTH_TOKEN_HEADER, crypto::encode_base64(&[0u8; 32]));

    let err = h.fleet.call(request).await.unwrap_err();
    assert_eq!(err.code, Code::Unauthenticated);
    assert_eq!(err.message, ACCESS_DENIED);

    // Still undelivered.
    let pending = h.broker.state().get_task_ins(Some(node.node_id), None).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn token_signed_with_another_key_is_rejected() {
    let h = harness().await;
    let (node, _) = bootstrap(&h).await;
    let impostor = ClientAuth::new(KeyPair::generate(), h.fleet.key_pair().public()).unwrap();

    let mut request = Request::new(RpcRequest::from(DeleteNodeRequest { node }));
    impostor.sign(&mut request).unwrap();
    request
        .metadata_mut()
        .insert(PUBLIC_KEY_HEADER, crypto::encode_base64(&h.node_keys.public_bytes()));

    let err = h.fleet.call(request).await.unwrap_err();
    assert_eq!(err.code, Code::Unauthenticated);
    assert!(h.broker.state().get_nodes().await.unwrap().contains(&node.node_id));
}

#[tokio::test]
async fn signed_node_session_round_trip() {
    let h = harness().await;
    let (node, auth) = bootstrap(&h).await;
    let ins_id = h
        .broker
        .state()
        .store_task_ins(TaskIns::new(1, Task::new(node)))
        .await
        .unwrap();

    let mut pull = Request::new(RpcRequest::from(PullTaskInsRequest {
        node,
        task_ids: Vec::new(),
    }));
    auth.sign(&mut pull).unwrap();
    let pulled = PullTaskInsResponse::try_from(h.fleet.call(pull).await.unwrap().into_inner()).unwrap();
    assert_eq!(pulled.task_ins_list.len(), 1);
    assert_eq!(pulled.task_ins_list[0].task_id, Some(ins_id));

    let result = TaskRes::new(
        1,
        Task::new(Node::anonymous())
            .with_producer(node)
            .with_ancestry([ins_id.to_string()]),
    );
    let mut push = Request::new(RpcRequest::from(PushTaskResRequest {
        task_res_list: vec![result],
    }));
    auth.sign(&mut push).unwrap();
    let pushed = PushTaskResResponse::try_from(h.fleet.call(push).await.unwrap().into_inner()).unwrap();
    assert_eq!(pushed.results.len(), 1);

    let results = h
        .broker
        .state()
        .get_task_res(&HashSet::from([ins_id]), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let mut delete = Request::new(RpcRequest::from(DeleteNodeRequest { node }));
    auth.sign(&mut delete).unwrap();
    h.fleet.call(delete).await.unwrap();
    assert!(h.broker.state().get_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn keys_added_after_construction_are_trusted() {
    let state: Arc<dyn State> = Arc::new(InMemoryState::in_memory());
    let fleet = AuthenticationInterceptor::new(
        FleetServicer::new(Arc::clone(&state)),
        Arc::clone(&state),
        KeyPair::generate(),
        &HashSet::new(),
    )
    .await
    .unwrap();
    let late = KeyPair::generate();
    state.store_client_public_key(&late.public_bytes()).await.unwrap();

    let response = fleet
        .call(with_public_key(CreateNodeRequest {}, &late))
        .await
        .unwrap();
    assert_ne!(response.metadata(), &Metadata::new());
}

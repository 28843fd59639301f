use serde_json::json;
use slb_protocol::{RpcError, RpcErrorCode, RpcRequest, RpcResponse};

#[test]
fn request_round_trips_through_json() {
    let req = RpcRequest {
        method: "status".into(),
        params: Some(json!({})),
        id: json!(42),
    };
    let line = serde_json::to_string(&req).unwrap();
    let back: RpcRequest = serde_json::from_str(&line).unwrap();
    assert_eq!(back.method, "status");
    assert_eq!(back.id, json!(42));
}

#[test]
fn method_not_found_maps_to_standard_code() {
    let resp = RpcResponse::err(
        json!(1),
        RpcError::new(RpcErrorCode::MethodNotFound, "no such method: frobnicate"),
    );
    assert_eq!(resp.error.unwrap().code, -32601);
}

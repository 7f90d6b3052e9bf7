mod common;

use axum::http::{Method, StatusCode};
use common::{sample_app, send_empty, send_json, ANONYMOUS, EDITOR};
use entity_rest::UnresolvedIds;
use serde_json::json;

const MEMBER: &[(&str, &str)] = &[("x-user-id", "bob")];

#[tokio::test]
async fn acl_grants_view_to_everyone_and_writes_to_editors() {
    let app = sample_app(UnresolvedIds::Ignore).await;

    let (status, _) = send_json(&app, Method::POST, "/tags", json!({"label": "math"}), ANONYMOUS).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_json(&app, Method::POST, "/tags", json!({"label": "math"}), MEMBER).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send_json(&app, Method::POST, "/tags", json!({"label": "math"}), EDITOR).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!(1));

    for headers in [ANONYMOUS, MEMBER, EDITOR] {
        let (status, body) = send_empty(&app, Method::GET, "/tags/1", headers).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"id": 1, "label": "math"}));
        let (status, _) = send_empty(&app, Method::GET, "/tags", headers).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send_empty(&app, Method::GET, "/tags/count", headers).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn denied_writes_never_reach_the_store() {
    let app = sample_app(UnresolvedIds::Ignore).await;

    let (status, body) = send_empty(&app, Method::DELETE, "/tags/999", ANONYMOUS).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
    let (status, _) = send_json(&app, Method::PUT, "/tags/999", json!({"label": "x"}), MEMBER).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_json(&app, Method::POST, "/tags/auto", json!({"id": 3, "label": "x"}), MEMBER).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, count) = send_empty(&app, Method::GET, "/tags/count", ANONYMOUS).await;
    assert_eq!(count, json!(0));

    let (status, _) = send_empty(&app, Method::DELETE, "/tags/999", EDITOR).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn entities_without_acl_are_open() {
    let app = sample_app(UnresolvedIds::Ignore).await;

    let (status, id) = send_json(&app, Method::POST, "/addresses", json!({"street": "Rue du Lac"}), ANONYMOUS).await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/addresses/{}", id);
    let (status, _) = send_json(&app, Method::PUT, &uri, json!({"street": "Quai"}), ANONYMOUS).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send_json(&app, Method::POST, "/addresses/auto", json!({"id": 9}), ANONYMOUS).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send_empty(&app, Method::DELETE, &uri, ANONYMOUS).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

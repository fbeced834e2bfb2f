use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use skillbee_postgrest::{PostgrestClient, PostgrestError, SortOrder};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Row {
    id: String,
    role: String,
}

fn table(server: &MockServer, name: &str) -> PostgrestClient {
    PostgrestClient::new(&server.uri(), "anon-key", name, Client::new())
}

#[tokio::test]
async fn execute_sends_filters_and_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(header("apikey", "anon-key"))
        .and(query_param("select", "id,role"))
        .and(query_param("role", "eq.tasker"))
        .and(query_param("order", "created_at.desc"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "u1", "role": "tasker" },
            { "id": "u2", "role": "tasker" }
        ])))
        .mount(&server)
        .await;

    let rows: Vec<Row> = table(&server, "profiles")
        .select("id,role")
        .eq("role", "tasker")
        .order("created_at", SortOrder::Descending)
        .limit(5)
        .execute()
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].id, "u2");
}

#[tokio::test]
async fn single_maps_no_rows_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(header("accept", "application/vnd.pgrst.object+json"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "message": "JSON object requested, multiple (or no) rows returned",
            "details": "The result contains 0 rows",
            "hint": null
        })))
        .mount(&server)
        .await;

    let client = table(&server, "profiles").eq("id", "missing");
    let err = client.single::<Row>().await.unwrap_err();
    assert!(err.is_not_found());

    let maybe: Option<Row> = client.maybe_single().await.unwrap();
    assert!(maybe.is_none());
}

#[tokio::test]
async fn other_failures_are_not_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "42501",
            "message": "permission denied for table profiles",
            "details": null,
            "hint": null
        })))
        .mount(&server)
        .await;

    let err = table(&server, "profiles")
        .eq("id", "u1")
        .maybe_single::<Row>()
        .await
        .unwrap_err();

    match err {
        PostgrestError::ApiError { details, status } => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(details.code.as_deref(), Some("42501"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn unparsed_error_body_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = table(&server, "bookings").execute::<Row>().await.unwrap_err();
    assert!(matches!(
        err,
        PostgrestError::UnparsedApiError { ref message, .. } if message == "bad gateway"
    ));
}

#[tokio::test]
async fn upsert_merges_on_conflict_column() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasker_verifications"))
        .and(query_param("on_conflict", "user_id"))
        .and(header(
            "prefer",
            "resolution=merge-duplicates,return=representation",
        ))
        .and(body_json(json!({ "user_id": "u1", "status": "pending" })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!([{ "user_id": "u1", "status": "pending" }])),
        )
        .mount(&server)
        .await;

    let rows: Vec<serde_json::Value> = table(&server, "tasker_verifications")
        .upsert(json!({ "user_id": "u1", "status": "pending" }), "user_id")
        .await
        .unwrap();
    assert_eq!(rows[0]["status"], "pending");
}

#[tokio::test]
async fn update_requires_a_filter() {
    let server = MockServer::start().await;
    let err = table(&server, "profiles")
        .update::<_, serde_json::Value>(json!({ "role": "admin" }))
        .await
        .unwrap_err();
    assert!(matches!(err, PostgrestError::InvalidParameters(_)));
}

#[tokio::test]
async fn update_uses_bearer_token_when_given() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u1"))
        .and(header("Authorization", "Bearer user-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": "u1", "role": "tasker" }])),
        )
        .mount(&server)
        .await;

    let rows: Vec<Row> = table(&server, "profiles")
        .with_auth("user-token")
        .unwrap()
        .eq("id", "u1")
        .update(json!({ "verification_status": "pending" }))
        .await
        .unwrap();
    assert_eq!(rows[0].role, "tasker");
}

#[tokio::test]
async fn count_reads_content_range_total() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/rest/v1/tasker_verifications"))
        .and(query_param("status", "eq.pending"))
        .and(header("prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-range", "*/7"))
        .mount(&server)
        .await;

    let total = table(&server, "tasker_verifications")
        .eq("status", "pending")
        .count()
        .await
        .unwrap();
    assert_eq!(total, 7);
}

#[tokio::test]
async fn rpc_posts_params_to_function() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/approve_tasker"))
        .and(body_json(json!({ "p_user_id": "u1" })))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = PostgrestClient::rpc(
        &server.uri(),
        "anon-key",
        "approve_tasker",
        json!({ "p_user_id": "u1" }),
        Client::new(),
    );
    let result: Option<serde_json::Value> = client.call_rpc().await.unwrap();
    assert!(result.is_none());
}

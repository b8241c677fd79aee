mod common;

use axum::http::StatusCode;
use common::{app, app_with, send, send_raw, Call, MemoryAccessor};
use insac_sdk::error::ConstraintKind;
use insac_sdk::query::FilterOp;
use insac_sdk::{AccessError, Settings};
use serde_json::{json, Value};
use std::sync::Arc;

fn seeded() -> Arc<MemoryAccessor> {
    let acc = Arc::new(MemoryAccessor::new());
    acc.seed("persona", json!({ "id": 1, "nombre": "Ana Quispe", "ci": 12345678 }));
    acc.seed("persona", json!({ "id": 2, "nombre": "Luis Mamani", "ci": 7654321 }));
    acc.seed("estudiante", json!({ "id": 7, "ru": 15, "id_persona": 1 }));
    acc.seed("estudiante", json!({ "id": 8, "ru": 16, "id_persona": 2 }));
    acc.seed("auxiliar", json!({ "id": 1, "especialidad": "Física", "id_estudiante": 7 }));
    for (id, nombre) in [(1, "Borges"), (2, "Cortázar"), (3, "Arguedas"), (4, "Tamayo"), (5, "Mistral")] {
        acc.seed("autor", json!({ "id": id, "nombre": nombre, "nacionalidad": null, "activo": true, "deleted_at": null }));
    }
    acc
}

#[tokio::test]
async fn create_passes_exactly_the_coerced_fields() {
    let acc = seeded();
    let (status, body) = send(
        app(acc.clone()),
        "POST",
        "/api/v1/auxiliares",
        Some(json!({ "especialidad": "Matemáticas", "id_estudiante": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = acc
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Create(entity, fields) => Some((entity, fields)),
            _ => None,
        })
        .expect("create called");
    assert_eq!(created.0, "auxiliar");
    assert_eq!(Value::Object(created.1), json!({ "especialidad": "Matemáticas", "id_estudiante": 7 }));
    assert_eq!(body["data"]["especialidad"], json!("Matemáticas"));
    assert_eq!(body["data"]["id_estudiante"], json!(7));
    assert!(body["data"]["_fecha_creacion"].is_string());
    assert!(body.get("metadata").is_none());
}

#[tokio::test]
async fn get_missing_names_entity_field_and_value() {
    let (status, body) = send(app(seeded()), "GET", "/api/v1/autores/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("'autor'"));
    assert!(message.contains("id"));
    assert!(message.contains("999"));
}

#[tokio::test]
async fn foreign_key_rejection_is_a_conflict() {
    let acc = seeded();
    *acc.create_failure.lock().unwrap() = Some(AccessError::Constraint {
        kind: ConstraintKind::ForeignKey,
        message: "(estudiante.persona.ci)=(12345678)".into(),
    });
    let (status, body) = send(
        app(acc),
        "POST",
        "/api/v1/auxiliares",
        Some(json!({ "especialidad": "Química", "id_estudiante": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], json!("conflict"));
    assert!(body["error"]["message"].as_str().unwrap().contains("(estudiante.persona.ci)=(12345678)"));
}

#[tokio::test]
async fn unknown_filter_never_reaches_accessor() {
    let acc = seeded();
    let (status, body) = send(app(acc.clone()), "GET", "/api/v1/autores?edad=40", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["fields"][0]["field"], json!("edad"));
    assert!(acc.calls().is_empty());
}

#[tokio::test]
async fn missing_required_field_is_named() {
    let acc = seeded();
    let (status, body) = send(app(acc.clone()), "POST", "/api/v1/personas", Some(json!({ "ci": 1 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["error"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["field"].as_str())
        .collect();
    assert_eq!(fields, vec!["nombre"]);
    assert!(acc.calls().is_empty());
}

#[tokio::test]
async fn integer_filters_are_coerced_to_numbers() {
    let acc = seeded();
    let (status, body) = send(app(acc.clone()), "GET", "/api/v1/estudiantes?ru=15&id_persona[gte]=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let Some(Call::FindMany(_, options)) = acc.calls().into_iter().next() else {
        panic!("find_many not called");
    };
    assert_eq!(options.filters.len(), 2);
    assert_eq!(options.filters[0].value, json!(15));
    assert_eq!(options.filters[1].op, FilterOp::Gte);
    assert_eq!(options.filters[1].value, json!(1));
}

#[tokio::test]
async fn repeated_reads_are_byte_identical() {
    let acc = seeded();
    let (_, first) = send_raw(app(acc.clone()), "GET", "/api/v1/custom/estudiantes", None).await;
    let (_, second) = send_raw(app(acc), "GET", "/api/v1/custom/estudiantes", None).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn list_metadata_follows_pagination_law() {
    for (query, returned, total_pages) in [("limit=2&page=2", 2, 3), ("limit=2&page=3", 1, 3), ("limit=10", 5, 1)] {
        let (status, body) = send(app(seeded()), "GET", &format!("/api/v1/autores?{}", query), None).await;
        assert_eq!(status, StatusCode::OK);
        let m = &body["metadata"];
        assert_eq!(m["total_count"], json!(5));
        assert_eq!(m["count_returned"], json!(returned));
        assert_eq!(m["total_pages"], json!(total_pages));
        let (page, limit) = (m["page"].as_u64().unwrap(), m["limit"].as_u64().unwrap());
        assert!(page * limit >= m["count_returned"].as_u64().unwrap());
    }
}

#[tokio::test]
async fn custom_template_nests_relations_in_declared_order() {
    let (status, body) = send(app(seeded()), "GET", "/api/v1/custom/estudiantes?ru=15", None).await;
    assert_eq!(status, StatusCode::OK);
    let row = &body["data"][0];
    let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["id", "ru", "persona", "auxiliares"]);
    assert_eq!(row["persona"], json!({ "nombre": "Ana Quispe", "ci": 12345678 }));
    assert_eq!(row["auxiliares"], json!([{ "especialidad": "Física" }]));
    assert_eq!(body["metadata"]["total_count"], json!(1));
}

#[tokio::test]
async fn default_get_includes_to_one_relation_and_timestamps() {
    let (status, body) = send(app(seeded()), "GET", "/api/v1/estudiantes/7", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["persona"]["nombre"], json!("Ana Quispe"));
    assert!(data["_fecha_creacion"].is_string());
    assert!(data.get("created_at").is_none());
}

#[tokio::test]
async fn soft_delete_then_restore() {
    let acc = seeded();
    let (status, _) = send(app(acc.clone()), "DELETE", "/api/v1/autores/2", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(app(acc.clone()), "GET", "/api/v1/autores/2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(app(acc.clone()), "PUT", "/api/v1/autores/2/restore", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
    let (status, body) = send(app(acc), "GET", "/api/v1/autores/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nombre"], json!("Cortázar"));
}

#[tokio::test]
async fn update_is_partial_and_missing_row_is_not_found() {
    let acc = seeded();
    let (status, _) = send(app(acc.clone()), "PUT", "/api/v1/autores/3", Some(json!({ "nacionalidad": "boliviana" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(app(acc.clone()), "GET", "/api/v1/autores/3", None).await;
    assert_eq!(body["data"]["nombre"], json!("Arguedas"));
    assert_eq!(body["data"]["nacionalidad"], json!("boliviana"));

    let (status, _) = send(app(acc), "PUT", "/api/v1/autores/404", Some(json!({ "nombre": "X" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn computed_fields_cannot_be_written() {
    let acc = seeded();
    let (status, body) = send(
        app(acc.clone()),
        "POST",
        "/api/v1/autores",
        Some(json!({ "nombre": "Tamayo", "_fecha_creacion": "2020-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["fields"][0]["field"], json!("_fecha_creacion"));
    assert!(acc.calls().is_empty());
}

#[tokio::test]
async fn strict_route_rejects_unknown_body_keys() {
    let acc = seeded();
    let (status, body) = send(
        app(acc.clone()),
        "POST",
        "/api/v1/custom/autores",
        Some(json!({ "nombre": "Mistral", "apodo": "Lucila" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["fields"][0]["field"], json!("apodo"));

    let (status, body) = send(app(acc), "POST", "/api/v1/autores", Some(json!({ "nombre": "Mistral", "apodo": "Lucila" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"].get("apodo").is_none());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (status, body) = send_raw(app(seeded()), "POST", "/api/v1/autores", Some("{\"nombre\":".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], json!("bad_request"));
}

#[tokio::test]
async fn limit_is_clamped_to_settings() {
    let acc = seeded();
    let settings = Settings {
        default_limit: 2,
        max_limit: 3,
        ..Settings::default()
    };
    let (_, body) = send(app_with(acc.clone(), settings.clone()), "GET", "/api/v1/autores", None).await;
    assert_eq!(body["metadata"]["limit"], json!(2));
    let (_, body) = send(app_with(acc, settings), "GET", "/api/v1/autores?limit=50", None).await;
    assert_eq!(body["metadata"]["limit"], json!(3));
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn health_and_version() {
    let (status, body) = send(app(seeded()), "GET", "/health", None).await;
    assert_eq!((status, body), (StatusCode::OK, json!({ "status": "ok" })));
    let (status, body) = send(app(seeded()), "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("insac-sdk"));
}

#[tokio::test]
async fn page_beyond_offset_range_is_rejected_before_access() {
    let acc = seeded();
    let (status, body) = send(app(acc.clone()), "GET", "/api/v1/autores?page=18446744073709551615", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["fields"][0]["field"], json!("page"));
    assert!(acc.calls().is_empty());
}

//! Streaming helper for iterating Qdrant's scroll endpoint without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Value, json};

use super::qdrant::{QdrantBackend, status_error, stringify_point_id};
use super::types::{ScrollResponse, StoreError, StoredObject};

const DEFAULT_SCROLL_LIMIT: usize = 512;

/// Stream every object of a collection, page by page.
pub fn stream_objects<'a>(
    backend: &'a QdrantBackend,
    collection: &'a str,
) -> impl Stream<Item = Result<StoredObject, StoreError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;

        loop {
            let body = json!({
                "with_payload": true,
                "with_vector": false,
                "limit": DEFAULT_SCROLL_LIMIT,
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = backend
                .request(Method::POST, &format!("collections/{collection}/points/scroll"))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let Some(id) = point.id {
                        yield StoredObject {
                            id: stringify_point_id(id),
                            properties: point.payload.unwrap_or_default(),
                        };
                    }
                }

                match result.next_page_offset {
                    Some(Value::Null) | None => break,
                    Some(next) => offset = Some(next),
                }
            } else {
                let error = status_error(collection, response).await;
                tracing::error!(collection, error = %error, "Failed to scroll collection");
                Err(error)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{pin_mut, stream::StreamExt};
    use httpmock::{Method::POST, MockServer};

    fn backend(server: &MockServer) -> QdrantBackend {
        QdrantBackend {
            client: reqwest::Client::builder()
                .user_agent("brochure-rag-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn stream_objects_collects_multiple_pages() {
        let server = MockServer::start_async().await;
        let backend = backend(&server);

        let first_page = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/Originals_docs/points/scroll")
                    .body_contains("\"offset\":null");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": "a", "payload": { "type": "text", "content": "one" } }
                        ],
                        "next_page_offset": "b"
                    }
                }));
            })
            .await;

        let second_page = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/Originals_docs/points/scroll")
                    .body_contains("\"offset\":\"b\"");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": "b", "payload": { "type": "table", "content": "two" } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let stream = stream_objects(&backend, "Originals_docs");
        pin_mut!(stream);
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.expect("object"));
        }

        first_page.assert();
        second_page.assert();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].properties["content"], "two");
    }

    #[tokio::test]
    async fn stream_objects_surfaces_missing_collection() {
        let server = MockServer::start_async().await;
        let backend = backend(&server);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/ghost/points/scroll");
                then.status(404).body("{}");
            })
            .await;

        let stream = stream_objects(&backend, "ghost");
        pin_mut!(stream);
        let first = stream.next().await.expect("one item");
        assert!(matches!(first, Err(StoreError::CollectionNotFound(_))));
        assert!(stream.next().await.is_none());
    }
}

// End-to-end fabric tests: store through the storage engine, read the
// same content back through the retrieval engine.

use super::common::{create_test_fabric, full_analysis, storage_request};
use crate::models::SemanticAnalysisResult;
use crate::services::RetrievalQuery;

fn search_query(user_id: &str, keywords: &[&str]) -> RetrievalQuery {
    let mut analysis = SemanticAnalysisResult::with_intent("search");
    analysis.keywords = keywords.iter().map(|k| k.to_string()).collect();
    RetrievalQuery {
        user_id: user_id.to_string(),
        session_id: String::new(),
        workspace_id: String::new(),
        analysis,
        max_results: 10,
        min_relevance: 0.0,
        request_id: String::new(),
    }
}

#[tokio::test]
async fn store_then_retrieve_through_the_fabric() {
    let fabric = create_test_fabric();

    let stored = fabric
        .storage
        .store(
            storage_request("u1", "fixed the eviction bug"),
            Some(full_analysis(
                "eviction bugfix",
                "Redis",
                "the cache was evicting on access time instead of insertion time",
            )),
        )
        .await
        .unwrap();

    assert!(stored.success);
    assert!(stored.timeline_stored && stored.knowledge_stored && stored.vector_stored);

    let outcome = fabric
        .retrieval
        .retrieve(search_query("u1", &["eviction"]))
        .await;

    assert!(outcome.engines_used.contains(&"timeline".to_string()));
    assert!(outcome
        .results
        .iter()
        .any(|r| r.title == "eviction bugfix"));
}

#[tokio::test]
async fn users_do_not_see_each_others_timeline() {
    let fabric = create_test_fabric();

    fabric
        .storage
        .store(
            storage_request("alice", "private note"),
            Some(full_analysis("alice secret plan", "Planning", "only alice should read this")),
        )
        .await
        .unwrap();

    let outcome = fabric
        .retrieval
        .retrieve(search_query("bob", &["secret"]))
        .await;

    assert!(outcome
        .results
        .iter()
        .all(|r| r.title != "alice secret plan"));
}

#[tokio::test]
async fn repeated_request_id_is_served_from_cache() {
    let fabric = create_test_fabric();

    fabric
        .storage
        .store(
            storage_request("u1", "deploy notes"),
            Some(full_analysis("deploy notes", "CI", "rolled out the canary to ten percent")),
        )
        .await
        .unwrap();

    let mut query = search_query("u1", &["deploy"]);
    query.request_id = "fabric-req-1".to_string();

    let first = fabric.retrieval.retrieve(query.clone()).await;
    let second = fabric.retrieval.retrieve(query).await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.results.len(), second.results.len());
}

#[tokio::test]
async fn storage_metrics_accumulate_across_requests() {
    let fabric = create_test_fabric();

    for i in 0..3 {
        fabric
            .storage
            .store(
                storage_request("u1", "note"),
                Some(full_analysis(&format!("note {i}"), "Notes", "some prose to remember here")),
            )
            .await
            .unwrap();
    }

    let stats = fabric.storage.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.timeline_stored, 3);
    assert_eq!(stats.vector_stored, 3);
    assert_eq!(stats.errors, 0);
}

//! End-to-end tests for the database facade.
//!
//! Run with: cargo test

use ember_db::{
    Database, DatabaseConfig, DistanceMetric, EmberDbError, IndexType, Metadata, SearchParams,
    VectorId,
};
use std::collections::HashSet;
use tempfile::tempdir;

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn axis_db(dimension: u32, count: usize) -> Database {
    // Vectors at [i, 0, ...] so distances from the origin are exactly i
    let db = Database::new(DatabaseConfig::new(dimension)).unwrap();
    for i in 0..count {
        let mut v = vec![0.0; dimension as usize];
        v[0] = i as f32;
        db.add(v, Metadata::new()).unwrap();
    }
    db
}

#[test]
fn add_and_retrieve() {
    let db = Database::new(DatabaseConfig::new(4).metric(DistanceMetric::L2)).unwrap();

    let a = db.add(vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    let b = db.add(vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();
    let c = db.add(vec![0.0, 0.0, 1.0, 0.0], Metadata::new()).unwrap();

    assert!(a.as_u64() > 0);
    assert_eq!(db.size(), 3);

    let results = db.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, a);
    assert!(results[0].score.abs() < 1e-6);

    assert!(results[1].id == b || results[1].id == c);
    assert!((results[1].score - std::f32::consts::SQRT_2).abs() < 1e-5);
}

#[test]
fn ids_are_unique_and_positive() {
    let db = Database::new(DatabaseConfig::new(2)).unwrap();
    let mut seen = HashSet::new();
    for i in 0..50 {
        let id = db.add(vec![i as f32, 0.0], Metadata::new()).unwrap();
        assert!(id.as_u64() > 0);
        assert!(seen.insert(id));
    }

    let batch_ids = db
        .add_batch(vec![vec![100.0, 0.0], vec![101.0, 0.0]], Vec::new())
        .unwrap();
    for id in batch_ids {
        assert!(seen.insert(id));
    }
}

#[test]
fn search_returns_exactly_k() {
    let db = axis_db(4, 50);
    for k in [1, 5, 10, 50] {
        let results = db.search(&[0.0; 4], k).unwrap();
        assert_eq!(results.len(), k);
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
    }
}

#[test]
fn brute_force_is_exact() {
    // The k-th result's distance bounds everything not returned
    let db = axis_db(3, 30);
    let results = db.search(&[0.5, 0.0, 0.0], 5).unwrap();

    let returned: HashSet<u64> = results.iter().map(|r| r.id.as_u64()).collect();
    let worst = results.last().unwrap().score;

    // Ids are 1..=30 for vectors at [0..30); everything outside the
    // result set must be at least as far as the worst returned hit
    for raw_id in 1..=30u64 {
        if !returned.contains(&raw_id) {
            let coord = (raw_id - 1) as f32;
            let distance = (coord - 0.5).abs();
            assert!(distance >= worst - 1e-6);
        }
    }
}

#[test]
fn boundary_behaviors() {
    // D = 1
    let db = Database::new(DatabaseConfig::new(1)).unwrap();
    let id = db.add(vec![0.25], Metadata::new()).unwrap();
    let results = db.search(&[0.25], 1).unwrap();
    assert_eq!(results[0].id, id);

    // k = 0
    assert!(db.search(&[0.25], 0).unwrap().is_empty());

    // k > N
    let results = db.search(&[0.25], 100).unwrap();
    assert_eq!(results.len(), 1);

    // Wrong dimension fails
    assert!(matches!(
        db.add(vec![1.0, 2.0], Metadata::new()),
        Err(EmberDbError::DimensionMismatch { expected: 1, actual: 2 })
    ));
}

#[test]
fn self_match_is_best() {
    for metric in [
        DistanceMetric::L2,
        DistanceMetric::InnerProduct,
        DistanceMetric::Cosine,
    ] {
        let db = Database::new(DatabaseConfig::new(3).metric(metric)).unwrap();
        db.add(vec![0.3, -0.2, 0.9], Metadata::new()).unwrap();
        db.add(vec![-0.5, 0.1, 0.2], Metadata::new()).unwrap();
        let target = vec![0.8, 0.4, -0.1];
        let id = db.add(target.clone(), Metadata::new()).unwrap();

        let results = db.search(&target, 3).unwrap();
        match metric {
            DistanceMetric::L2 | DistanceMetric::Cosine => {
                assert_eq!(results[0].id, id, "self match should win under {metric}");
                assert!(results[0].score.abs() < 1e-5);
            }
            DistanceMetric::InnerProduct => {
                // Inner product has no self-match guarantee in general, but
                // no other stored vector may beat the self score
                let self_score: f32 = target.iter().map(|x| x * x).sum();
                let best = results[0].score;
                assert!(best >= self_score - 1e-5);
            }
        }
    }
}

#[test]
fn metadata_filter_with_overfetch() {
    // Scenario: 100 vectors, the 5 farthest from the reference are "rare"
    let db = Database::new(DatabaseConfig::new(2)).unwrap();
    let mut rare_ids = Vec::new();

    for i in 0..100 {
        let metadata = if i >= 95 {
            meta(&[("label", "rare")])
        } else {
            meta(&[("label", "common")])
        };
        let id = db.add(vec![i as f32, 0.0], metadata).unwrap();
        if i >= 95 {
            rare_ids.push(id);
        }
    }

    let results = db
        .filtered_search(&[0.0, 0.0], &SearchParams::with_k(5), |m| {
            m.get("label").map(String::as_str) == Some("rare")
        })
        .unwrap();

    assert_eq!(results.len(), 5);
    // Best-first: nearest rare vector (i = 95) leads
    let got: Vec<VectorId> = results.iter().map(|r| r.id).collect();
    assert_eq!(got, rare_ids);

    let stats = db.last_search_stats();
    assert_eq!(stats.final_results, 5);
    assert!(stats.total_candidates > 5);
}

#[test]
fn filtered_search_accept_all_matches_knn() {
    let db = axis_db(2, 40);
    let plain = db.search(&[7.0, 0.0], 9).unwrap();
    let filtered = db
        .filtered_search(&[7.0, 0.0], &SearchParams::with_k(9), |_| true)
        .unwrap();

    assert_eq!(
        plain.iter().map(|r| r.id).collect::<Vec<_>>(),
        filtered.iter().map(|r| r.id).collect::<Vec<_>>()
    );
}

#[test]
fn persistence_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::new(DatabaseConfig::new(4).metric(DistanceMetric::L2)).unwrap();
    let a = db
        .add(vec![1.0, 0.0, 0.0, 0.0], meta(&[("name", "alpha")]))
        .unwrap();
    db.add(vec![0.0, 1.0, 0.0, 0.0], meta(&[("name", "beta")]))
        .unwrap();
    db.add(vec![0.0, 0.0, 1.0, 0.0], Metadata::new()).unwrap();

    let before = db.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    db.save(&path).unwrap();

    let restored = Database::load(&path).unwrap();
    assert_eq!(restored.size(), 3);
    assert_eq!(restored.dimension(), 4);
    assert_eq!(restored.get_metadata(a).unwrap()["name"], "alpha");

    let after = restored.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(
        before.iter().map(|r| r.id).collect::<Vec<_>>(),
        after.iter().map(|r| r.id).collect::<Vec<_>>()
    );
}

#[test]
fn persistence_survives_missing_index_blob() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let db = Database::new(DatabaseConfig::new(4)).unwrap();
    let a = db.add(vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    db.add(vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();
    db.add(vec![0.0, 0.0, 1.0, 0.0], Metadata::new()).unwrap();
    db.save(&path).unwrap();

    std::fs::remove_file(dir.path().join("db.vectors.anns")).unwrap();

    let restored = Database::load(&path).unwrap();
    assert_eq!(restored.size(), 3);
    assert_eq!(restored.stats()["rebuilt_on_load"], 1.0);

    let results = restored.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(results[0].id, a);
    assert!(results[0].score.abs() < 1e-6);
    assert!((results[1].score - std::f32::consts::SQRT_2).abs() < 1e-5);
}

#[test]
fn training_gate() {
    let config = DatabaseConfig::new(4)
        .anns_algorithm("ivf_flat")
        .nlist(16);
    let db = Database::new(config).unwrap();

    for i in 0..15 {
        db.add(vec![i as f32, (i % 3) as f32, 0.0, 0.0], Metadata::new())
            .unwrap();
    }
    assert!(!db.is_trained());
    assert!(matches!(
        db.search(&[0.0; 4], 5),
        Err(EmberDbError::NotTrained)
    ));

    db.add(vec![15.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    db.build_index().unwrap();
    assert!(db.is_trained());

    let params = SearchParams::with_k(5).nprobe(16);
    let results = db.search_with_params(&[0.0; 4], &params).unwrap();
    assert_eq!(results.len(), 5);
}

#[test]
fn ivf_persistence_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let config = DatabaseConfig::new(2)
        .index_type(IndexType::IvfFlat)
        .nlist(4);
    let db = Database::new(config).unwrap();
    for i in 0..40 {
        db.add(
            vec![(i % 8) as f32, (i / 8) as f32],
            meta(&[("i", &i.to_string())]),
        )
        .unwrap();
    }
    db.build_index().unwrap();

    let params = SearchParams::with_k(5).nprobe(4);
    let before = db.search_with_params(&[1.0, 1.0], &params).unwrap();
    db.save(&path).unwrap();

    let restored = Database::load(&path).unwrap();
    assert!(restored.is_trained());
    assert_eq!(restored.stats()["rebuilt_on_load"], 0.0);

    let after = restored.search_with_params(&[1.0, 1.0], &params).unwrap();
    assert_eq!(
        before.iter().map(|r| r.id).collect::<HashSet<_>>(),
        after.iter().map(|r| r.id).collect::<HashSet<_>>()
    );
}

#[test]
fn hnsw_hint_falls_back_to_brute_force() {
    // No HNSW backend ships; the hint resolves to an unregistered name and
    // the store substitutes brute force
    let config = DatabaseConfig::new(2).index_type(IndexType::Hnsw);
    let db = Database::new(config).unwrap();
    assert_eq!(db.stats()["fallback_used"], 1.0);

    let a = db.add(vec![1.0, 0.0], Metadata::new()).unwrap();
    let results = db.search(&[1.0, 0.0], 1).unwrap();
    assert_eq!(results[0].id, a);
}

#[test]
fn backend_fallback() {
    let config = DatabaseConfig::new(4).anns_algorithm("nonexistent");
    let db = Database::new(config).unwrap();

    let stats = db.stats();
    assert_eq!(stats["fallback_used"], 1.0);

    // Behaves exactly like brute force
    let a = db.add(vec![1.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    let results = db.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(results[0].id, a);
}

#[test]
fn hybrid_weights() {
    let db = Database::new(DatabaseConfig::new(1)).unwrap();
    let a = db.add(vec![0.0], Metadata::new()).unwrap();
    let b = db.add(vec![1.0], meta(&[("text", "needle")])).unwrap();

    let results = db
        .hybrid_search(&[0.0], &SearchParams::with_k(2), "needle", 0.7, 0.3)
        .unwrap();

    // Normalized vector scores are [1.0, 0.0], text scores [0.0, 1.0]:
    // 0.7 * 1.0 beats 0.3 * 1.0
    assert_eq!(results[0].id, a);
    assert!((results[0].score - 0.7).abs() < 1e-6);
    assert_eq!(results[1].id, b);
    assert!((results[1].score - 0.3).abs() < 1e-6);
}

#[test]
fn range_search_within_radius() {
    let db = axis_db(2, 20);
    let results = db
        .range_search(&[0.0, 0.0], 3.5, &SearchParams::default())
        .unwrap();

    assert_eq!(results.len(), 4); // distances 0, 1, 2, 3
    for pair in results.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
}

#[test]
fn rerank_respects_new_scores() {
    let db = Database::new(DatabaseConfig::new(2)).unwrap();
    let mut ids = Vec::new();
    for i in 0..10 {
        let id = db
            .add(vec![i as f32, 0.0], meta(&[("boost", &(10 - i).to_string())]))
            .unwrap();
        ids.push(id);
    }

    // New score ignores the vector distance entirely: order by "boost"
    let results = db
        .search_with_rerank(
            &[0.0, 0.0],
            &SearchParams::with_k(3),
            |_query, metadata, _score| {
                metadata
                    .get("boost")
                    .and_then(|b| b.parse::<f32>().ok())
                    .unwrap_or(f32::MAX)
            },
            10,
        )
        .unwrap();

    // Smallest boost value ranks first under an ascending metric
    assert_eq!(results[0].id, ids[9]);
    assert_eq!(results.len(), 3);
}

#[test]
fn cosine_metric_orientation() {
    let db = Database::new(DatabaseConfig::new(2).metric(DistanceMetric::Cosine)).unwrap();
    let aligned = db.add(vec![2.0, 0.0], Metadata::new()).unwrap();
    db.add(vec![0.0, 3.0], Metadata::new()).unwrap();

    let results = db.search(&[1.0, 0.0], 2).unwrap();
    assert_eq!(results[0].id, aligned);
    assert!(results[0].score.abs() < 1e-6);
    assert!((results[1].score - 1.0).abs() < 1e-6);
}

#[test]
fn concurrent_adds_and_searches() {
    use std::sync::Arc;
    use std::thread;

    let db = Arc::new(Database::new(DatabaseConfig::new(4)).unwrap());
    for i in 0..100 {
        db.add(vec![i as f32, 0.0, 0.0, 0.0], Metadata::new())
            .unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..4 {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                if t % 2 == 0 {
                    db.add(vec![(1000 + t * 50 + i) as f32, 0.0, 0.0, 0.0], Metadata::new())
                        .unwrap();
                } else {
                    let results = db.search(&[5.0, 0.0, 0.0, 0.0], 3).unwrap();
                    assert_eq!(results.len(), 3);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.size(), 200);
}

#[test]
fn metadata_set_get_set_is_idempotent() {
    let db = Database::new(DatabaseConfig::new(2)).unwrap();
    let id = db.add(vec![1.0, 1.0], meta(&[("k", "v")])).unwrap();

    let fetched = db.get_metadata(id).unwrap();
    db.set_metadata(id, fetched.clone()).unwrap();
    assert_eq!(db.get_metadata(id).unwrap(), fetched);
}
